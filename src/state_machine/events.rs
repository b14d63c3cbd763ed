use super::states::SkipReason;
use crate::models::run_instance::StepError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Events that can trigger step state transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StepEvent {
    /// Dependencies hold (and any retry delay has elapsed)
    MarkReady,
    /// Dispatch to the step executor; opens a new attempt
    Start,
    /// The current attempt succeeded
    Succeed,
    /// The current attempt failed and the retry engine scheduled another one
    ScheduleRetry {
        error: StepError,
        retry_at: DateTime<Utc>,
    },
    /// The current attempt failed and the retry engine gave up
    Fail(StepError),
    /// The step will never run
    Skip(SkipReason),
}

impl StepEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::MarkReady => "mark_ready",
            Self::Start => "start",
            Self::Succeed => "succeed",
            Self::ScheduleRetry { .. } => "schedule_retry",
            Self::Fail(_) => "fail",
            Self::Skip(_) => "skip",
        }
    }

    /// Extract the error if this is a failure event
    pub fn error(&self) -> Option<&StepError> {
        match self {
            Self::ScheduleRetry { error, .. } | Self::Fail(error) => Some(error),
            _ => None,
        }
    }

    /// Human-readable detail attached to the emitted state-change event
    pub fn detail(&self) -> Option<String> {
        match self {
            Self::ScheduleRetry { error, retry_at } => {
                Some(format!("{error}; retry at {}", retry_at.to_rfc3339()))
            }
            Self::Fail(error) => Some(error.to_string()),
            Self::Skip(reason) => Some(reason.to_string()),
            _ => None,
        }
    }
}
