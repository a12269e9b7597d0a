//! Bridge error type.
//!
//! Handler failures never cross the HTTP boundary as errors; route code turns
//! them into structured `{error}` bodies. `BridgeError` exists for the
//! engine-facing seams where a typed failure is useful.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// The ref or path did not resolve to a live, in-tree node.
    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// The node exists but lacks the requested capability.
    #[error("{class} has no {what} '{name}'")]
    CapabilityMissing {
        class: String,
        what: &'static str,
        name: String,
    },

    /// A value could not be converted for the receiving property.
    #[error("cannot convert value for '{property}': {reason}")]
    BadValue { property: String, reason: String },

    /// The engine rejected an operation.
    #[error("engine: {0}")]
    Engine(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    pub fn capability(class: impl Into<String>, what: &'static str, name: impl Into<String>) -> Self {
        BridgeError::CapabilityMissing {
            class: class.into(),
            what,
            name: name.into(),
        }
    }
}
