//! # Execution Context
//!
//! Information handed to the step executor and to custom step handlers for a
//! single attempt.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Context for one step attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepContext {
    /// Run this attempt belongs to
    pub run_id: Uuid,

    /// Runbook the run was created from
    pub runbook_id: String,

    /// Step being executed
    pub step_id: String,

    /// Current attempt number (1-based)
    pub attempt_number: u32,

    /// Maximum number of attempts the retry policy allows
    pub max_attempts: u32,

    /// Time limit for this attempt
    pub timeout: Duration,

    /// Substitution variables supplied when the run was triggered
    pub variables: HashMap<String, String>,
}

impl StepContext {
    pub fn new(run_id: Uuid, runbook_id: impl Into<String>, step_id: impl Into<String>) -> Self {
        Self {
            run_id,
            runbook_id: runbook_id.into(),
            step_id: step_id.into(),
            attempt_number: 1,
            max_attempts: 1,
            timeout: Duration::from_secs(crate::constants::defaults::STEP_TIMEOUT_SECONDS),
            variables: HashMap::new(),
        }
    }

    pub fn with_attempt(mut self, attempt_number: u32, max_attempts: u32) -> Self {
        self.attempt_number = attempt_number;
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_variables(mut self, variables: HashMap<String, String>) -> Self {
        self.variables = variables;
        self
    }

    pub fn is_final_attempt(&self) -> bool {
        self.attempt_number >= self.max_attempts
    }
}
