//! Error types for the debugging core.

use smol_str::SmolStr;
use thiserror::Error;

use crate::engine::ValidationReport;
use crate::identity::NodeId;

#[derive(Debug, Error)]
pub enum DebugError {
    #[error("invalid config: {0}")]
    InvalidConfig(SmolStr),

    #[error("a run is already in progress")]
    AlreadyRunning,

    #[error("no run is in progress")]
    NotRunning,

    #[error("program failed validation: {0}")]
    Validation(ValidationReport),

    #[error("no node is selected")]
    NoSelection,

    #[error("no design node '{0}'")]
    UnknownNode(NodeId),

    #[error("node '{0}' has no source location")]
    NoSourceSpan(NodeId),

    #[error("no tracking record at index {0}")]
    UnknownLogEntry(usize),

    #[error("no validation error at index {0}")]
    UnknownValidationError(usize),

    #[error("validation error {0} does not name a node")]
    UnlocatedValidationError(usize),

    #[error("failed to spawn execution thread: {0}")]
    WorkerSpawn(SmolStr),

    #[error("execution thread did not exit within {waited_ms} ms")]
    WorkerStuck { waited_ms: u64 },

    #[error("execution thread panicked")]
    WorkerPanicked,
}

/// Failure reported by an event subscriber. Caught at the sink boundary.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct SubscriberError(pub SmolStr);

impl SubscriberError {
    pub fn new(message: impl Into<SmolStr>) -> Self {
        Self(message.into())
    }
}
