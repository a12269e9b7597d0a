//! SCENEBRIDGE - in-process runtime control bridge
//!
//! Embeds in a game engine's frame loop and exposes a JSON-over-HTTP
//! protocol on loopback so an external automation client can observe the
//! scene tree, inject input, capture annotated screenshots and await
//! conditions.

// Bridge orchestration (routes, continuations, tick loop)
pub mod bridge;

// Subsystems
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod serialize;
pub mod server;
pub mod sim;
pub mod value;

// Re-export commonly used types
pub use bridge::RuntimeBridge;
pub use config::BridgeConfig;
pub use core::{EventAccumulator, RefMap, Snapshot};
pub use engine::{Engine, InstanceId, Scene};
pub use error::BridgeError;
pub use value::{EngineValue, ValueKind};
