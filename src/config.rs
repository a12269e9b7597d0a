//! Bridge configuration.
//!
//! Process-wide constants with serde support so an embedding can load them
//! from its own settings file. Defaults match the shipped protocol; tests
//! shrink the caps to exercise truncation and budget paths.

use serde::{Deserialize, Serialize};

/// Name of the bridge's own node in the scene tree. Snapshots and the event
/// accumulator skip it so the bridge never observes itself.
pub const BRIDGE_NODE_NAME: &str = "SceneBridge";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Loopback host; the bridge never accepts remote connections.
    pub host: String,
    /// Editor bridge port (reserved; the editor side is a separate process).
    pub editor_port: u16,
    /// Runtime bridge port. `0` binds an ephemeral port (tests).
    pub runtime_port: u16,

    /// Default snapshot traversal depth.
    pub max_snapshot_depth: u32,
    /// Hard cap on nodes visited per snapshot.
    pub max_node_count: usize,

    pub screenshot_width: u32,
    pub screenshot_height: u32,
    /// JPEG quality in 0.0..=1.0.
    pub screenshot_quality: f32,
    /// Budget on the base64-encoded screenshot payload.
    pub max_base64_len: usize,

    /// Event accumulator buffer cap; oldest entries are evicted.
    pub max_events: usize,

    /// Idle/total connection lifetime before force-close.
    pub connection_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            editor_port: 9899,
            runtime_port: 9898,
            max_snapshot_depth: 12,
            max_node_count: 2000,
            screenshot_width: 640,
            screenshot_height: 360,
            screenshot_quality: 0.75,
            max_base64_len: 3_000_000,
            max_events: 200,
            connection_timeout_secs: 30,
        }
    }
}
