//! Error types for the runbook orchestrator.

use crate::config::ConfigurationError;
use crate::models::runbook::ValidationError;
use crate::state_machine::errors::{PersistenceError, StateMachineError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Runbook validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("State machine error: {0}")]
    StateMachine(#[from] StateMachineError),
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("Run not found: {0}")]
    RunNotFound(String),
    #[error("Run {run_id} does not belong to runbook {runbook_id}")]
    RunbookMismatch { run_id: String, runbook_id: String },
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Orchestration error: {0}")]
    Orchestration(String),
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(error: serde_json::Error) -> Self {
        OrchestratorError::InvalidInput(format!("JSON serialization error: {error}"))
    }
}

impl From<serde_yaml::Error> for OrchestratorError {
    fn from(error: serde_yaml::Error) -> Self {
        OrchestratorError::InvalidInput(format!("YAML parse error: {error}"))
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
