use crate::constants::events;
use crate::models::run_instance::RunSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single persisted state change, for a step or for the run itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    pub run_id: Uuid,
    /// `None` for run-level transitions
    pub step_id: Option<String>,
    pub from_status: String,
    pub to_status: String,
    pub timestamp: DateTime<Utc>,
    pub detail: Option<String>,
    /// The step asked for notification on this kind of transition
    #[serde(default)]
    pub notify: bool,
}

impl StateChange {
    pub fn is_run_level(&self) -> bool {
        self.step_id.is_none()
    }
}

/// Events delivered to the Notification System and Monitoring Service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum OrchestrationEvent {
    StepTransitioned(StateChange),
    RunTransitioned(StateChange),
    RunCompleted(RunSummary),
}

impl OrchestrationEvent {
    pub fn from_change(change: StateChange) -> Self {
        if change.is_run_level() {
            Self::RunTransitioned(change)
        } else {
            Self::StepTransitioned(change)
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::StepTransitioned(_) => events::STEP_TRANSITIONED,
            Self::RunTransitioned(_) => events::RUN_TRANSITIONED,
            Self::RunCompleted(_) => events::RUN_COMPLETED,
        }
    }

    pub fn run_id(&self) -> Uuid {
        match self {
            Self::StepTransitioned(change) | Self::RunTransitioned(change) => change.run_id,
            Self::RunCompleted(summary) => summary.run_id,
        }
    }
}
