//! # Run Instance
//!
//! One execution of a runbook. A run owns one [`StepState`] per step and an
//! append-only log of every transition; once terminal it is kept as an immutable
//! historical record.

use crate::models::runbook::RunbookDefinition;
use crate::orchestration::types::FailureKind;
use crate::state_machine::states::{RunStatus, SkipReason, StepStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use uuid::Uuid;

/// Classified failure recorded against a step attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    pub kind: FailureKind,
    pub detail: String,
}

impl StepError {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn transient(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::Transient, detail)
    }

    pub fn permanent(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::Permanent, detail)
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

/// How a single attempt ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    Failed { error: StepError },
    /// The attempt never reported back (cancellation, process restart)
    Interrupted { reason: String },
}

/// One dispatch of a step to the executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub number: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<AttemptOutcome>,
}

/// Mutable per-step record, written only by the orchestrator loop
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StepState {
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    pub attempt_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<StepError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_eligible_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attempts: Vec<AttemptRecord>,
}

impl StepState {
    /// The attempt that is currently open, if any
    pub fn open_attempt_mut(&mut self) -> Option<&mut AttemptRecord> {
        self.attempts
            .last_mut()
            .filter(|attempt| attempt.finished_at.is_none())
    }

    /// Whether a Waiting step's backoff has elapsed
    pub fn is_eligible_at(&self, now: DateTime<Utc>) -> bool {
        self.next_eligible_at.map_or(true, |at| at <= now)
    }
}

/// Entry in a run's append-only transition log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub sequence: u64,
    /// `None` for run-level transitions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub from_status: String,
    pub to_status: String,
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Parameters supplied when a run is triggered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    pub triggered_by: String,
    #[serde(default)]
    pub variables: HashMap<String, String>,
}

impl Default for RunRequest {
    fn default() -> Self {
        Self {
            triggered_by: "manual".to_string(),
            variables: HashMap::new(),
        }
    }
}

impl RunRequest {
    pub fn triggered_by(source: impl Into<String>) -> Self {
        Self {
            triggered_by: source.into(),
            variables: HashMap::new(),
        }
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }
}

/// One execution of a runbook definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInstance {
    pub run_id: Uuid,
    pub runbook_id: String,
    pub runbook_version: String,
    pub status: RunStatus,
    pub triggered_by: String,
    #[serde(default)]
    pub variables: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancel_requested: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_detail: Option<String>,
    /// Step ids in definition order
    pub step_order: Vec<String>,
    pub steps: BTreeMap<String, StepState>,
    #[serde(default)]
    pub transitions: Vec<TransitionRecord>,
}

impl RunInstance {
    pub fn new(definition: &RunbookDefinition, request: RunRequest, now: DateTime<Utc>) -> Self {
        let step_order: Vec<String> = definition
            .steps()
            .iter()
            .map(|step| step.id.clone())
            .collect();
        let steps = step_order
            .iter()
            .map(|id| (id.clone(), StepState::default()))
            .collect();

        Self {
            run_id: Uuid::new_v4(),
            runbook_id: definition.id.clone(),
            runbook_version: definition.version.clone(),
            status: RunStatus::Pending,
            triggered_by: request.triggered_by,
            variables: request.variables,
            created_at: now,
            started_at: None,
            finished_at: None,
            cancel_requested: false,
            terminal_detail: None,
            step_order,
            steps,
            transitions: Vec::new(),
        }
    }

    pub fn step(&self, id: &str) -> Option<&StepState> {
        self.steps.get(id)
    }

    pub fn step_status(&self, id: &str) -> Option<StepStatus> {
        self.steps.get(id).map(|state| state.status)
    }

    /// Steps in definition order
    pub fn ordered_steps(&self) -> impl Iterator<Item = (&str, &StepState)> {
        self.step_order
            .iter()
            .filter_map(|id| self.steps.get(id).map(|state| (id.as_str(), state)))
    }

    pub fn all_steps_terminal(&self) -> bool {
        self.steps.values().all(|state| state.status.is_terminal())
    }

    /// Recompute the run status from the step states
    ///
    /// Any Failed step fails the run, optional or not; `optional` only lets a
    /// Skipped step satisfy its dependents.
    pub fn derive_status(&self) -> RunStatus {
        if self.status.is_terminal() {
            return self.status;
        }
        if self.started_at.is_none() {
            return RunStatus::Pending;
        }
        if !self.all_steps_terminal() {
            return RunStatus::Running;
        }
        if self.cancel_requested {
            return RunStatus::Cancelled;
        }

        let failed = self.steps.values().any(|state| {
            state.status == StepStatus::Failed
                || state.skip_reason == Some(SkipReason::RunTimedOut)
        });
        if failed {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        }
    }

    pub fn count_with_status(&self, status: StepStatus) -> usize {
        self.steps
            .values()
            .filter(|state| state.status == status)
            .count()
    }

    pub fn progress_percentage(&self) -> f64 {
        if self.steps.is_empty() {
            return 100.0;
        }
        let finished = self
            .steps
            .values()
            .filter(|state| state.status.is_terminal())
            .count();
        finished as f64 / self.steps.len() as f64 * 100.0
    }

    pub fn summary(&self) -> RunSummary {
        let steps = self
            .ordered_steps()
            .map(|(id, state)| StepSummary {
                step_id: id.to_string(),
                status: state.status,
                attempts: state.attempt_count,
                skip_reason: state.skip_reason.clone(),
                last_error: match state.status {
                    StepStatus::Failed => state.last_error.as_ref().map(ToString::to_string),
                    _ => None,
                },
            })
            .collect();

        RunSummary {
            run_id: self.run_id,
            runbook_id: self.runbook_id.clone(),
            status: self.status,
            triggered_by: self.triggered_by.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
            progress_percentage: self.progress_percentage(),
            detail: self.terminal_detail.clone(),
            steps,
        }
    }
}

/// Final per-run report handed to the notification system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub runbook_id: String,
    pub status: RunStatus,
    pub triggered_by: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub progress_percentage: f64,
    pub detail: Option<String>,
    pub steps: Vec<StepSummary>,
}

impl RunSummary {
    pub fn step(&self, id: &str) -> Option<&StepSummary> {
        self.steps.iter().find(|step| step.step_id == id)
    }

    pub fn failed_steps(&self) -> impl Iterator<Item = &StepSummary> {
        self.steps
            .iter()
            .filter(|step| step.status == StepStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSummary {
    pub step_id: String,
    pub status: StepStatus,
    pub attempts: u32,
    pub skip_reason: Option<SkipReason>,
    /// Last recorded error, present only for Failed steps
    pub last_error: Option<String>,
}
