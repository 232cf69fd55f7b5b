//! Error taxonomy for the brain core.
//!
//! Storage errors are always fatal to the calling operation and propagate.
//! Provider errors are recovered locally by the Decision Engine's fallback
//! cascade and never reach callers of `make_decision`/`get_consensus_decision`.

use crate::shared::TaskStatus;

/// Result alias for Brain Store and everything built on it.
pub type BrainResult<T> = Result<T, BrainError>;

/// Errors raised by the Brain Store and the subsystems that own it.
#[derive(Debug, thiserror::Error)]
pub enum BrainError {
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("invalid task transition for {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("session error: {0}")]
    Session(String),
}

/// Errors raised by a cognitive tool. Tool failures never abort a cycle; the
/// engine folds them into the cycle outcome and keeps going.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("no tool registered for action: {0}")]
    UnknownAction(String),

    #[error("tool execution failed: {0}")]
    Failed(String),
}

/// Errors raised by an LLM provider call. Consumed by the Decision Engine's
/// cascade; one provider failing moves on to the next untried provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("provider error: {0}")]
    Other(String),
}
