//! # Orchestration Types
//!
//! Core types shared across the orchestration components: how a step attempt
//! ended, how its failure is classified, and what the retry engine decided.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a failed step attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// May succeed if attempted again (dataset not ready, flaky portal)
    Transient,
    /// Will not succeed on retry (malformed payload, rejected input)
    Permanent,
    /// The attempt exceeded its time limit
    Timeout,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Permanent => write!(f, "permanent"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// Result of one step attempt as reported by the step executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded,
    Failed { kind: FailureKind, detail: String },
}

impl StepOutcome {
    pub fn transient(detail: impl Into<String>) -> Self {
        Self::Failed {
            kind: FailureKind::Transient,
            detail: detail.into(),
        }
    }

    pub fn permanent(detail: impl Into<String>) -> Self {
        Self::Failed {
            kind: FailureKind::Permanent,
            detail: detail.into(),
        }
    }

    pub fn timeout(detail: impl Into<String>) -> Self {
        Self::Failed {
            kind: FailureKind::Timeout,
            detail: detail.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// What the retry policy engine decided for a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Schedule another attempt no earlier than the given instant
    RetryAt(DateTime<Utc>),
    /// Mark the step terminally Failed
    GiveUp,
}

impl RetryDecision {
    pub fn will_retry(&self) -> bool {
        matches!(self, Self::RetryAt(_))
    }
}
