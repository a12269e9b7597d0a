//! Core bridge subsystems - snapshots, state reading, input, events, waits.
//!
//! These modules hold the observation and manipulation machinery,
//! independent of the HTTP transport.

pub mod diff;
pub mod events;
pub mod font;
pub mod input;
pub mod refs;
pub mod screenshot;
pub mod snapshot;
pub mod state;
pub mod wait;

// Re-exports for convenience
pub use events::{BridgeEvent, EventAccumulator, Watch};
pub use refs::RefMap;
pub use snapshot::{count_nodes, take_snapshot, NodeRecord, Snapshot};
