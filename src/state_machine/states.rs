use serde::{Deserialize, Serialize};
use std::fmt;

/// Step state definitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Initial state, dependencies not yet satisfied
    #[default]
    Pending,
    /// Failed transiently and scheduled for another attempt at `next_eligible_at`
    Waiting,
    /// Dependencies satisfied, awaiting a dispatch slot
    Ready,
    /// Dispatched to the step executor
    Running,
    /// Completed successfully
    Succeeded,
    /// Terminally failed (retry budget exhausted or permanent failure)
    Failed,
    /// Will never run: upstream failure, cancellation or run timeout
    Skipped,
}

impl StepStatus {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    /// Check if this is an active state (step is being executed)
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Check if this step satisfies a dependent's dependency edge
    pub fn satisfies_dependencies(&self, optional: bool) -> bool {
        match self {
            Self::Succeeded => true,
            Self::Skipped => optional,
            _ => false,
        }
    }

    /// Check if a dependent of a step in this state can never start
    pub fn blocks_dependents(&self, optional: bool) -> bool {
        match self {
            Self::Failed => true,
            Self::Skipped => !optional,
            _ => false,
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Waiting => write!(f, "waiting"),
            Self::Ready => write!(f, "ready"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl std::str::FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "waiting" => Ok(Self::Waiting),
            "ready" => Ok(Self::Ready),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            _ => Err(format!("Invalid step status: {s}")),
        }
    }
}

/// Run-level status, derived from the step states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created but the orchestrator loop has not started
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid run status: {s}")),
        }
    }
}

/// Why a step ended up Skipped
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    UpstreamFailed { dependency: String },
    Cancelled,
    RunTimedOut,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpstreamFailed { dependency } => write!(f, "upstream failed ({dependency})"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::RunTimedOut => write!(f, "run timed out"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_status_terminal_check() {
        assert!(StepStatus::Succeeded.is_terminal());
        assert!(StepStatus::Failed.is_terminal());
        assert!(StepStatus::Skipped.is_terminal());
        assert!(!StepStatus::Pending.is_terminal());
        assert!(!StepStatus::Waiting.is_terminal());
        assert!(!StepStatus::Ready.is_terminal());
        assert!(!StepStatus::Running.is_terminal());
    }

    #[test]
    fn test_dependency_satisfaction() {
        assert!(StepStatus::Succeeded.satisfies_dependencies(false));
        assert!(StepStatus::Skipped.satisfies_dependencies(true));
        assert!(!StepStatus::Skipped.satisfies_dependencies(false));
        assert!(!StepStatus::Waiting.satisfies_dependencies(true));
        assert!(StepStatus::Failed.blocks_dependents(true));
        assert!(!StepStatus::Skipped.blocks_dependents(true));
    }

    #[test]
    fn test_status_string_conversion() {
        assert_eq!(StepStatus::Waiting.to_string(), "waiting");
        assert_eq!("skipped".parse::<StepStatus>().unwrap(), StepStatus::Skipped);
        assert!("complete".parse::<StepStatus>().is_err());
        assert_eq!("cancelled".parse::<RunStatus>().unwrap(), RunStatus::Cancelled);
    }

    #[test]
    fn test_skip_reason_serde() {
        let reason = SkipReason::UpstreamFailed {
            dependency: "load_ledger".to_string(),
        };
        let json = serde_json::to_value(&reason).unwrap();
        assert_eq!(json["reason"], "upstream_failed");
        assert_eq!(json["dependency"], "load_ledger");
        assert_eq!(SkipReason::Cancelled.to_string(), "cancelled");
    }
}
