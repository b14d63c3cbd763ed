use thiserror::Error;

/// Error types for step state machine operations
#[derive(Error, Debug)]
pub enum StateMachineError {
    #[error("Invalid state transition for step {step_id} from {from} on {event}")]
    InvalidTransition {
        step_id: String,
        from: String,
        event: String,
    },

    #[error("Unknown step: {0}")]
    UnknownStep(String),

    #[error("Persistence operation failed: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error types for run persistence
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Failed to save run {run_id}: {reason}")]
    SaveFailed { run_id: String, reason: String },

    #[error("Failed to load run {run_id}: {reason}")]
    LoadFailed { run_id: String, reason: String },

    #[error("Run {run_id} is terminal and cannot be overwritten")]
    TerminalRunImmutable { run_id: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Helper function to create internal errors
pub fn internal_error(msg: impl Into<String>) -> StateMachineError {
    StateMachineError::Internal(msg.into())
}
