//! # Workflow Coordinator
//!
//! ## Architecture: Main Orchestration Engine
//!
//! The WorkflowCoordinator drives runs of a runbook from creation to a terminal status.
//! Each run is owned by exactly one control task, which is the only writer of its
//! [`RunStateTracker`]; step attempts execute concurrently in a `JoinSet` and report
//! back to that task.
//!
//! ## Key Responsibilities
//!
//! - **Step Discovery**: readiness, blocked dependents and elapsed backoffs come from
//!   the pure functions in `viable_step_discovery`
//! - **Concurrent Execution**: ready steps are dispatched up to the concurrency limit,
//!   each attempt bounded by its step timeout
//! - **Retry Handling**: failed attempts go through the backoff calculator
//! - **Event Coordination**: every persisted transition is published, followed by a
//!   final run summary
//! - **Cancellation, Global Timeout and Resume**
//!
//! ## Usage
//!
//! ```rust,no_run
//! use runbook_orchestrator::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example(
//! #     coordinator: WorkflowCoordinator,
//! #     definition: Arc<RunbookDefinition>,
//! # ) -> Result<(), OrchestratorError> {
//! let handle = coordinator
//!     .start_run(definition, RunRequest::triggered_by("scheduler"))
//!     .await?;
//! let summary = handle.wait().await?;
//! println!("run {} finished {}", summary.run_id, summary.status);
//! # Ok(())
//! # }
//! ```

use crate::client::context::StepContext;
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::events::{EventPublisher, EventPublisherConfig, OrchestrationEvent, StateChange};
use crate::logging::{log_error, log_run_operation, log_step_operation};
use crate::models::run_instance::{RunRequest, RunSummary, StepError};
use crate::models::runbook::{RunbookDefinition, StepSpec};
use crate::orchestration::backoff_calculator::BackoffCalculator;
use crate::orchestration::clock::Clock;
use crate::orchestration::step_executor::StepExecutor;
use crate::orchestration::types::{RetryDecision, StepOutcome};
use crate::orchestration::viable_step_discovery::{
    blocked_steps, earliest_wakeup, eligible_retries, ready_steps, running_count,
    topological_ready,
};
use crate::state_machine::events::StepEvent;
use crate::state_machine::persistence::RunStore;
use crate::state_machine::run_tracker::RunStateTracker;
use crate::state_machine::states::{SkipReason, StepStatus};
use crate::validation::validate_run_variables;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Detail recorded for a step that was mid-attempt when the previous process stopped
const INTERRUPTED_BY_RESTART: &str = "interrupted by restart";

/// Handle to a run executing on its own control task
#[derive(Debug)]
pub struct RunHandle {
    run_id: Uuid,
    cancel: watch::Sender<bool>,
    join: JoinHandle<Result<RunSummary>>,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Request cancellation; the run ends Cancelled unless it already finished
    pub fn cancel(&self) {
        // the control task may already be gone, in which case there is nothing to cancel
        let _ = self.cancel.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the run to reach a terminal status
    pub async fn wait(self) -> Result<RunSummary> {
        let RunHandle { cancel, join, .. } = self;
        let joined = join.await;
        drop(cancel);
        joined.map_err(|error| {
            OrchestratorError::Orchestration(format!("run control task failed: {error}"))
        })?
    }
}

/// Drives runbook runs against a set of collaborators
#[derive(Clone)]
pub struct WorkflowCoordinator {
    config: Arc<OrchestratorConfig>,
    executor: Arc<StepExecutor>,
    store: Arc<dyn RunStore>,
    clock: Arc<dyn Clock>,
    publisher: EventPublisher,
    backoff: BackoffCalculator,
}

impl std::fmt::Debug for WorkflowCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowCoordinator")
            .field("config", &self.config)
            .field("executor", &self.executor)
            .field("clock", &self.clock)
            .finish()
    }
}

impl WorkflowCoordinator {
    pub fn new(
        config: OrchestratorConfig,
        executor: StepExecutor,
        store: Arc<dyn RunStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let publisher = EventPublisher::new(EventPublisherConfig {
            buffer_size: config.events.buffer_size,
        });
        let backoff = BackoffCalculator::new(config.backoff.clone());
        Self {
            config: Arc::new(config),
            executor: Arc::new(executor),
            store,
            clock,
            publisher,
            backoff,
        }
    }

    /// Share an existing publisher instead of the one built from configuration
    pub fn with_publisher(mut self, publisher: EventPublisher) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Create a run and drive it on a new control task
    #[instrument(skip(self, definition, request), fields(runbook_id = %definition.id))]
    pub async fn start_run(
        &self,
        definition: Arc<RunbookDefinition>,
        request: RunRequest,
    ) -> Result<RunHandle> {
        validate_run_variables(&request.variables).map_err(OrchestratorError::InvalidInput)?;
        let tracker =
            RunStateTracker::create(definition, request, self.store.clone(), self.clock.now())
                .await?;
        Ok(self.spawn(tracker))
    }

    /// Create a run and drive it to completion on the calling task
    #[instrument(skip(self, definition, request), fields(runbook_id = %definition.id))]
    pub async fn execute_run(
        &self,
        definition: Arc<RunbookDefinition>,
        request: RunRequest,
    ) -> Result<RunSummary> {
        validate_run_variables(&request.variables).map_err(OrchestratorError::InvalidInput)?;
        let tracker =
            RunStateTracker::create(definition, request, self.store.clone(), self.clock.now())
                .await?;
        let (_cancel, cancel_rx) = watch::channel(false);
        RunLoop::new(self.clone(), tracker, cancel_rx).drive().await
    }

    /// Continue a persisted run after a restart
    ///
    /// Succeeded steps are never executed again. Steps that were mid-attempt are
    /// treated as a transient failure of that attempt and go through the retry policy.
    #[instrument(skip(self, definition), fields(runbook_id = %definition.id))]
    pub async fn resume_run(
        &self,
        definition: Arc<RunbookDefinition>,
        run_id: Uuid,
    ) -> Result<RunHandle> {
        let run = self
            .store
            .load(run_id)
            .await?
            .ok_or_else(|| OrchestratorError::RunNotFound(run_id.to_string()))?;

        if run.runbook_id != definition.id {
            return Err(OrchestratorError::RunbookMismatch {
                run_id: run_id.to_string(),
                runbook_id: definition.id.clone(),
            });
        }

        log_run_operation(
            "resume",
            run_id,
            &definition.id,
            &run.status.to_string(),
            None,
        );
        let tracker = RunStateTracker::restore(run, definition, self.store.clone())?;
        Ok(self.spawn(tracker))
    }

    fn spawn(&self, tracker: RunStateTracker) -> RunHandle {
        let run_id = tracker.run().run_id;
        let (cancel, cancel_rx) = watch::channel(false);
        let run_loop = RunLoop::new(self.clone(), tracker, cancel_rx);
        let join = tokio::spawn(run_loop.drive());
        RunHandle {
            run_id,
            cancel,
            join,
        }
    }
}

/// What woke the control task
enum Wake {
    Completed(std::result::Result<(String, StepOutcome), tokio::task::JoinError>),
    Timer,
    CancelRequested,
    CancelDropped,
    Nothing,
}

/// Control task state for a single run
struct RunLoop {
    coordinator: WorkflowCoordinator,
    tracker: RunStateTracker,
    definition: Arc<RunbookDefinition>,
    in_flight: JoinSet<(String, StepOutcome)>,
    cancel_rx: watch::Receiver<bool>,
    cancel_open: bool,
    concurrency: usize,
    global_deadline: Option<DateTime<Utc>>,
}

impl RunLoop {
    fn new(
        coordinator: WorkflowCoordinator,
        tracker: RunStateTracker,
        cancel_rx: watch::Receiver<bool>,
    ) -> Self {
        let definition = tracker.definition().clone();
        let configured = coordinator.config.execution.max_concurrent_steps;
        let concurrency = definition
            .max_parallel_steps
            .map_or(configured, |limit| limit.min(configured))
            .max(1);
        Self {
            coordinator,
            tracker,
            definition,
            in_flight: JoinSet::new(),
            cancel_rx,
            cancel_open: true,
            concurrency,
            global_deadline: None,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.coordinator.clock.now()
    }

    fn run_id(&self) -> Uuid {
        self.tracker.run().run_id
    }

    fn publish(&self, changes: Vec<StateChange>) {
        for change in changes {
            self.coordinator
                .publisher
                .publish(OrchestrationEvent::from_change(change));
        }
    }

    async fn drive(mut self) -> Result<RunSummary> {
        let finished_before = self.tracker.is_terminal();
        if !finished_before {
            let now = self.now();
            let changes = self.tracker.mark_run_started(now).await?;
            self.publish(changes);
            log_run_operation(
                "start",
                self.run_id(),
                &self.definition.id,
                &self.tracker.status().to_string(),
                None,
            );
            self.global_deadline = self.compute_global_deadline();
            self.recover_interrupted_steps().await?;
        }

        let result = self.run_to_completion().await;
        self.in_flight.abort_all();

        if let Err(error) = result {
            log_error(
                "workflow_coordinator",
                "drive",
                &error.to_string(),
                Some(&format!("run_id={}", self.run_id())),
            );
            return Err(error);
        }

        let summary = self.tracker.run().summary();
        log_run_operation(
            "complete",
            summary.run_id,
            &summary.runbook_id,
            &summary.status.to_string(),
            summary.detail.as_deref(),
        );
        // a resumed terminal run already announced its summary
        if !finished_before {
            self.coordinator
                .publisher
                .publish(OrchestrationEvent::RunCompleted(summary.clone()));
        }
        Ok(summary)
    }

    fn compute_global_deadline(&self) -> Option<DateTime<Utc>> {
        let timeout = self.definition.global_timeout?;
        let started_at = self.tracker.run().started_at?;
        chrono::Duration::from_std(timeout)
            .ok()
            .and_then(|timeout| started_at.checked_add_signed(timeout))
    }

    async fn run_to_completion(&mut self) -> Result<()> {
        while !self.tracker.is_terminal() {
            if self.cancel_open && *self.cancel_rx.borrow_and_update() {
                self.cancel().await?;
                break;
            }
            if self.global_deadline.is_some_and(|deadline| self.now() >= deadline) {
                self.time_out().await?;
                break;
            }

            self.advance().await?;
            if self.tracker.is_terminal() {
                break;
            }

            let wake_at = match (earliest_wakeup(&self.tracker.run().steps), self.global_deadline)
            {
                (Some(retry), Some(deadline)) => Some(retry.min(deadline)),
                (retry, deadline) => retry.or(deadline),
            };

            if self.in_flight.is_empty() && wake_at.is_none() {
                self.recover_stalled().await?;
                continue;
            }

            match self.wait_for_wake(wake_at).await {
                Wake::Completed(Ok((step_id, outcome))) => {
                    self.process_outcome(&step_id, outcome).await?;
                }
                Wake::Completed(Err(join_error)) => {
                    warn!(run_id = %self.run_id(), error = %join_error, "Step task ended abnormally");
                }
                Wake::CancelRequested => {
                    self.cancel().await?;
                }
                Wake::CancelDropped => {
                    self.cancel_open = false;
                }
                Wake::Timer | Wake::Nothing => {}
            }
        }
        Ok(())
    }

    async fn wait_for_wake(&mut self, wake_at: Option<DateTime<Utc>>) -> Wake {
        let clock = self.coordinator.clock.clone();
        let has_in_flight = !self.in_flight.is_empty();
        let sleep_target = wake_at.unwrap_or_else(|| clock.now());

        tokio::select! {
            Some(joined) = self.in_flight.join_next(), if has_in_flight => Wake::Completed(joined),
            _ = clock.sleep_until(sleep_target), if wake_at.is_some() => Wake::Timer,
            changed = self.cancel_rx.changed(), if self.cancel_open => match changed {
                Ok(()) if *self.cancel_rx.borrow() => Wake::CancelRequested,
                Ok(()) => Wake::Nothing,
                Err(_) => Wake::CancelDropped,
            },
            else => Wake::Nothing,
        }
    }

    /// Skip blocked dependents, promote ready steps and elapsed retries, then dispatch
    async fn advance(&mut self) -> Result<()> {
        // skips cascade, so repeat until no Pending step is blocked
        loop {
            let blocked = blocked_steps(&self.definition, &self.tracker.run().steps)
                .into_iter()
                .map(|blocked| {
                    (
                        blocked.step.id.clone(),
                        StepEvent::Skip(SkipReason::UpstreamFailed {
                            dependency: blocked.blocking_dependency.to_string(),
                        }),
                    )
                })
                .collect::<Vec<_>>();
            if blocked.is_empty() {
                break;
            }
            for (step_id, _) in &blocked {
                debug!(run_id = %self.run_id(), step_id = %step_id, "Skipping step with failed upstream");
            }
            let now = self.now();
            let changes = self.tracker.apply_all(blocked, now).await?;
            self.publish(changes);
        }
        if self.tracker.is_terminal() {
            return Ok(());
        }

        let now = self.now();
        let steps = &self.tracker.run().steps;
        let promotions = topological_ready(&self.definition, steps)
            .into_iter()
            .chain(eligible_retries(&self.definition, steps, now))
            .map(|spec| (spec.id.clone(), StepEvent::MarkReady))
            .collect::<Vec<_>>();
        let changes = self.tracker.apply_all(promotions, now).await?;
        self.publish(changes);

        let slots = self
            .concurrency
            .saturating_sub(running_count(&self.tracker.run().steps));
        let dispatchable = ready_steps(&self.definition, &self.tracker.run().steps)
            .into_iter()
            .take(slots)
            .cloned()
            .collect::<Vec<_>>();
        for spec in dispatchable {
            self.dispatch(spec).await?;
        }
        Ok(())
    }

    async fn dispatch(&mut self, spec: StepSpec) -> Result<()> {
        let now = self.now();
        let changes = self.tracker.apply(&spec.id, StepEvent::Start, now).await?;
        self.publish(changes);

        let run = self.tracker.run();
        let attempt = self.tracker.step_state(&spec.id)?.attempt_count;
        let policy = self.coordinator.backoff.policy_for(&spec, &self.definition);
        let timeout = spec
            .timeout()
            .unwrap_or_else(|| self.coordinator.config.execution.step_timeout());
        let context = StepContext::new(run.run_id, run.runbook_id.clone(), spec.id.clone())
            .with_attempt(attempt, policy.max_attempts)
            .with_timeout(timeout)
            .with_variables(run.variables.clone());

        log_step_operation(
            "dispatch",
            run.run_id,
            &spec.id,
            Some(attempt),
            &StepStatus::Running.to_string(),
            None,
        );

        let executor = self.coordinator.executor.clone();
        self.in_flight.spawn(async move {
            let outcome = execute_bounded(&executor, &spec, &context, timeout).await;
            (spec.id, outcome)
        });
        Ok(())
    }

    async fn process_outcome(&mut self, step_id: &str, outcome: StepOutcome) -> Result<()> {
        let state = self.tracker.step_state(step_id)?;
        if state.status != StepStatus::Running {
            // late result for a step that was cancelled or skipped meanwhile
            debug!(run_id = %self.run_id(), step_id = %step_id, status = %state.status, "Discarding late step result");
            return Ok(());
        }
        let attempt = state.attempt_count;

        let event = match outcome {
            StepOutcome::Succeeded => StepEvent::Succeed,
            StepOutcome::Failed { kind, detail } => {
                self.failure_event(step_id, StepError::new(kind, detail))?
            }
        };

        log_step_operation(
            "complete_attempt",
            self.run_id(),
            step_id,
            Some(attempt),
            event.event_type(),
            event.detail().as_deref(),
        );

        let now = self.now();
        let changes = self.tracker.apply(step_id, event, now).await?;
        self.publish(changes);
        Ok(())
    }

    /// Ask the retry engine what a failed attempt leads to
    fn failure_event(&self, step_id: &str, error: StepError) -> Result<StepEvent> {
        let spec = self
            .definition
            .step(step_id)
            .ok_or_else(|| OrchestratorError::Orchestration(format!("unknown step {step_id}")))?;
        let state = self.tracker.step_state(step_id)?;
        let policy = self.coordinator.backoff.policy_for(spec, &self.definition);

        Ok(
            match self
                .coordinator
                .backoff
                .decide(state, policy, error.kind, self.now())
            {
                RetryDecision::RetryAt(retry_at) => StepEvent::ScheduleRetry { error, retry_at },
                RetryDecision::GiveUp => StepEvent::Fail(error),
            },
        )
    }

    /// Steps left Running by a previous process have no task behind them
    async fn recover_interrupted_steps(&mut self) -> Result<()> {
        let interrupted = self
            .tracker
            .run()
            .ordered_steps()
            .filter(|(_, state)| state.status == StepStatus::Running)
            .map(|(id, _)| id.to_string())
            .collect::<Vec<_>>();

        for step_id in interrupted {
            warn!(run_id = %self.run_id(), step_id = %step_id, "Recovering step interrupted by restart");
            let event = self.failure_event(&step_id, StepError::transient(INTERRUPTED_BY_RESTART))?;
            let now = self.now();
            let changes = self.tracker.apply(&step_id, event, now).await?;
            self.publish(changes);
        }
        Ok(())
    }

    /// Nothing is in flight and nothing is scheduled, yet the run is not terminal
    async fn recover_stalled(&mut self) -> Result<()> {
        let orphaned = self
            .tracker
            .run()
            .ordered_steps()
            .filter(|(_, state)| state.status == StepStatus::Running)
            .map(|(id, _)| id.to_string())
            .collect::<Vec<_>>();

        if orphaned.is_empty() {
            return Err(OrchestratorError::Orchestration(format!(
                "run {} stalled with no runnable steps",
                self.run_id()
            )));
        }

        for step_id in orphaned {
            warn!(run_id = %self.run_id(), step_id = %step_id, "Step lost its execution task");
            let event = self.failure_event(&step_id, StepError::transient("execution task lost"))?;
            let now = self.now();
            let changes = self.tracker.apply(&step_id, event, now).await?;
            self.publish(changes);
        }
        Ok(())
    }

    async fn cancel(&mut self) -> Result<()> {
        if self.tracker.is_terminal() {
            return Ok(());
        }
        self.in_flight.abort_all();
        let now = self.now();
        let changes = self.tracker.cancel(now).await?;
        info!(run_id = %self.run_id(), "Run cancelled");
        self.publish(changes);
        Ok(())
    }

    async fn time_out(&mut self) -> Result<()> {
        self.in_flight.abort_all();
        let timeout_secs = self
            .definition
            .global_timeout
            .map(|timeout| timeout.as_secs())
            .unwrap_or_default();
        self.tracker
            .set_terminal_detail(format!("global timeout of {timeout_secs}s exceeded"));
        let now = self.now();
        let changes = self
            .tracker
            .skip_remaining(SkipReason::RunTimedOut, now)
            .await?;
        warn!(run_id = %self.run_id(), timeout_secs, "Run exceeded its global timeout");
        self.publish(changes);
        Ok(())
    }
}

/// Run one attempt under its timeout, turning a panicking handler into a permanent failure
async fn execute_bounded(
    executor: &StepExecutor,
    spec: &StepSpec,
    context: &StepContext,
    timeout: Duration,
) -> StepOutcome {
    let attempt = AssertUnwindSafe(executor.execute(spec, context)).catch_unwind();
    match tokio::time::timeout(timeout, attempt).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(_)) => StepOutcome::permanent("step handler panicked"),
        Err(_) => StepOutcome::timeout(format!(
            "step exceeded its {}ms timeout",
            timeout.as_millis()
        )),
    }
}
