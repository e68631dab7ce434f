//! Engine-level error types.
//!
//! Per-combination problems never surface here: they become
//! [`Violation`](crate::collector::Violation)s. These errors abort the run of a
//! single device only.

use thiserror::Error;

use crate::space::{Axis, StreamFormat};

/// Errors raised while building or querying the configuration space.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpaceError {
    /// A required axis domain is empty; the device cannot be verified.
    #[error("device reports an empty {axis} domain")]
    UnsupportedDevice { axis: Axis },
    /// A stream format was referenced that the device never declared.
    #[error("stream format {0} is not declared by the device")]
    UnknownFormat(StreamFormat),
}

/// Errors that abort one device's verification run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error(transparent)]
    Space(#[from] SpaceError),
    #[error("template #{index} is malformed: {reason}")]
    MalformedTemplate { index: usize, reason: String },
    #[error("device capabilities unavailable: {0}")]
    CapabilitiesUnavailable(String),
    #[error("verification aborted: {0}")]
    Aborted(String),
}

/// Errors loading an [`EngineConfig`](crate::engine::EngineConfig) from disk.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    /// The config parsed but would leave nothing to check.
    #[error("invalid {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}
