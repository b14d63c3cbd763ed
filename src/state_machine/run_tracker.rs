//! # Run State Tracker
//!
//! Authoritative record of one run. Every step transition is validated against
//! the step state machine, appended to the transition log, folded into the derived
//! run status and persisted before the resulting [`StateChange`]s are handed back
//! for publication.

use super::{
    errors::{internal_error, StateMachineError, StateMachineResult},
    events::StepEvent,
    persistence::RunStore,
    states::{RunStatus, SkipReason, StepStatus},
    step_state_machine::determine_target_state,
};
use crate::events::types::StateChange;
use crate::models::run_instance::{
    AttemptOutcome, AttemptRecord, RunInstance, RunRequest, StepState, TransitionRecord,
};
use crate::models::runbook::RunbookDefinition;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

/// Single writer of a [`RunInstance`]
pub struct RunStateTracker {
    run: RunInstance,
    definition: Arc<RunbookDefinition>,
    store: Arc<dyn RunStore>,
}

impl std::fmt::Debug for RunStateTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunStateTracker")
            .field("run_id", &self.run.run_id)
            .field("runbook_id", &self.run.runbook_id)
            .field("status", &self.run.status)
            .finish()
    }
}

impl RunStateTracker {
    /// Create a new run and persist its initial snapshot
    pub async fn create(
        definition: Arc<RunbookDefinition>,
        request: RunRequest,
        store: Arc<dyn RunStore>,
        now: DateTime<Utc>,
    ) -> StateMachineResult<Self> {
        let run = RunInstance::new(&definition, request, now);
        store.save(&run).await?;
        debug!(run_id = %run.run_id, runbook_id = %run.runbook_id, "Created run");
        Ok(Self {
            run,
            definition,
            store,
        })
    }

    /// Continue tracking a previously persisted run
    pub fn restore(
        run: RunInstance,
        definition: Arc<RunbookDefinition>,
        store: Arc<dyn RunStore>,
    ) -> StateMachineResult<Self> {
        for step in definition.steps() {
            if !run.steps.contains_key(&step.id) {
                return Err(StateMachineError::UnknownStep(step.id.clone()));
            }
        }
        Ok(Self {
            run,
            definition,
            store,
        })
    }

    pub fn run(&self) -> &RunInstance {
        &self.run
    }

    pub fn definition(&self) -> &Arc<RunbookDefinition> {
        &self.definition
    }

    pub fn status(&self) -> RunStatus {
        self.run.status
    }

    pub fn is_terminal(&self) -> bool {
        self.run.status.is_terminal()
    }

    pub fn step_state(&self, step_id: &str) -> StateMachineResult<&StepState> {
        self.run
            .steps
            .get(step_id)
            .ok_or_else(|| StateMachineError::UnknownStep(step_id.to_string()))
    }

    pub fn step_status(&self, step_id: &str) -> StateMachineResult<StepStatus> {
        self.step_state(step_id).map(|state| state.status)
    }

    /// Move the run from Pending to Running
    pub async fn mark_run_started(
        &mut self,
        now: DateTime<Utc>,
    ) -> StateMachineResult<Vec<StateChange>> {
        self.ensure_mutable()?;
        if self.run.started_at.is_none() {
            self.run.started_at = Some(now);
        }
        let changes = self.refresh_run_status(now).into_iter().collect();
        self.persist().await?;
        Ok(changes)
    }

    /// Apply one step event and persist the result
    pub async fn apply(
        &mut self,
        step_id: &str,
        event: StepEvent,
        now: DateTime<Utc>,
    ) -> StateMachineResult<Vec<StateChange>> {
        let changes = self.record(step_id, &event, now)?;
        self.persist().await?;
        Ok(changes)
    }

    /// Apply several step events and persist once
    ///
    /// Stops at the first invalid event without persisting.
    pub async fn apply_all(
        &mut self,
        events: Vec<(String, StepEvent)>,
        now: DateTime<Utc>,
    ) -> StateMachineResult<Vec<StateChange>> {
        if events.is_empty() {
            return Ok(Vec::new());
        }
        let mut changes = Vec::new();
        for (step_id, event) in &events {
            changes.extend(self.record(step_id, event, now)?);
        }
        self.persist().await?;
        Ok(changes)
    }

    /// Skip every non-terminal step with the given reason
    pub async fn skip_remaining(
        &mut self,
        reason: SkipReason,
        now: DateTime<Utc>,
    ) -> StateMachineResult<Vec<StateChange>> {
        let events = self
            .run
            .ordered_steps()
            .filter(|(_, state)| !state.status.is_terminal())
            .map(|(id, _)| (id.to_string(), StepEvent::Skip(reason.clone())))
            .collect::<Vec<_>>();

        let mut changes = Vec::new();
        for (step_id, event) in &events {
            changes.extend(self.record(step_id, event, now)?);
        }
        changes.extend(self.refresh_run_status(now));
        self.persist().await?;
        Ok(changes)
    }

    /// Cancel the run: every unfinished step is skipped and the run ends Cancelled
    pub async fn cancel(&mut self, now: DateTime<Utc>) -> StateMachineResult<Vec<StateChange>> {
        self.ensure_mutable()?;
        self.run.cancel_requested = true;
        if self.run.started_at.is_none() {
            self.run.started_at = Some(now);
        }
        self.run.terminal_detail = Some("cancelled".to_string());
        self.skip_remaining(SkipReason::Cancelled, now).await
    }

    /// Record the reason a run ended, ahead of the final transition
    pub fn set_terminal_detail(&mut self, detail: impl Into<String>) {
        if !self.is_terminal() {
            self.run.terminal_detail = Some(detail.into());
        }
    }

    fn ensure_mutable(&self) -> StateMachineResult<()> {
        if self.run.status.is_terminal() {
            return Err(internal_error(format!(
                "run {} is already {}",
                self.run.run_id, self.run.status
            )));
        }
        Ok(())
    }

    fn record(
        &mut self,
        step_id: &str,
        event: &StepEvent,
        now: DateTime<Utc>,
    ) -> StateMachineResult<Vec<StateChange>> {
        self.ensure_mutable()?;

        let notify_policy = self
            .definition
            .step(step_id)
            .map(|spec| spec.notify)
            .ok_or_else(|| StateMachineError::UnknownStep(step_id.to_string()))?;

        let state = self
            .run
            .steps
            .get_mut(step_id)
            .ok_or_else(|| StateMachineError::UnknownStep(step_id.to_string()))?;

        let from = state.status;
        let to = determine_target_state(step_id, from, event)?;

        match event {
            StepEvent::MarkReady => {
                state.next_eligible_at = None;
            }
            StepEvent::Start => {
                state.attempt_count += 1;
                state.attempts.push(AttemptRecord {
                    number: state.attempt_count,
                    started_at: now,
                    finished_at: None,
                    outcome: None,
                });
            }
            StepEvent::Succeed => {
                close_attempt(state, AttemptOutcome::Succeeded, now);
                state.next_eligible_at = None;
            }
            StepEvent::ScheduleRetry { error, retry_at } => {
                close_attempt(
                    state,
                    AttemptOutcome::Failed {
                        error: error.clone(),
                    },
                    now,
                );
                state.last_error = Some(error.clone());
                state.next_eligible_at = Some(*retry_at);
            }
            StepEvent::Fail(error) => {
                close_attempt(
                    state,
                    AttemptOutcome::Failed {
                        error: error.clone(),
                    },
                    now,
                );
                state.last_error = Some(error.clone());
                state.next_eligible_at = None;
            }
            StepEvent::Skip(reason) => {
                close_attempt(
                    state,
                    AttemptOutcome::Interrupted {
                        reason: reason.to_string(),
                    },
                    now,
                );
                state.skip_reason = Some(reason.clone());
                state.next_eligible_at = None;
            }
        }
        state.status = to;

        let notify = match event {
            StepEvent::Start => notify_policy.on_start,
            StepEvent::Succeed => notify_policy.on_success,
            StepEvent::Fail(_) => notify_policy.on_failure,
            StepEvent::Skip(SkipReason::UpstreamFailed { .. }) => notify_policy.on_failure,
            _ => false,
        };

        let detail = event.detail();
        self.push_transition(
            Some(step_id.to_string()),
            from.to_string(),
            to.to_string(),
            event.event_type(),
            detail.clone(),
            now,
        );

        debug!(
            run_id = %self.run.run_id,
            step_id = %step_id,
            from = %from,
            to = %to,
            event = event.event_type(),
            "Step transitioned"
        );

        let mut changes = vec![StateChange {
            run_id: self.run.run_id,
            step_id: Some(step_id.to_string()),
            from_status: from.to_string(),
            to_status: to.to_string(),
            timestamp: now,
            detail,
            notify,
        }];
        changes.extend(self.refresh_run_status(now));
        Ok(changes)
    }

    fn refresh_run_status(&mut self, now: DateTime<Utc>) -> Option<StateChange> {
        let from = self.run.status;
        let to = self.run.derive_status();
        if from == to {
            return None;
        }

        self.run.status = to;
        if to.is_terminal() {
            self.run.finished_at = Some(now);
        }
        let detail = self.run.terminal_detail.clone().filter(|_| to.is_terminal());
        self.push_transition(
            None,
            from.to_string(),
            to.to_string(),
            "derive_status",
            detail.clone(),
            now,
        );

        info!(
            run_id = %self.run.run_id,
            runbook_id = %self.run.runbook_id,
            from = %from,
            to = %to,
            "Run transitioned"
        );

        Some(StateChange {
            run_id: self.run.run_id,
            step_id: None,
            from_status: from.to_string(),
            to_status: to.to_string(),
            timestamp: now,
            detail,
            notify: to.is_terminal(),
        })
    }

    fn push_transition(
        &mut self,
        step_id: Option<String>,
        from_status: String,
        to_status: String,
        event: &str,
        detail: Option<String>,
        now: DateTime<Utc>,
    ) {
        let sequence = self.run.transitions.len() as u64 + 1;
        self.run.transitions.push(TransitionRecord {
            sequence,
            step_id,
            from_status,
            to_status,
            event: event.to_string(),
            detail,
            timestamp: now,
        });
    }

    async fn persist(&self) -> StateMachineResult<()> {
        self.store.save(&self.run).await?;
        Ok(())
    }
}

fn close_attempt(state: &mut StepState, outcome: AttemptOutcome, now: DateTime<Utc>) {
    if let Some(attempt) = state.open_attempt_mut() {
        attempt.finished_at = Some(now);
        attempt.outcome = Some(outcome);
    }
}
