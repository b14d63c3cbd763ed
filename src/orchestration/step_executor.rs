//! # Step Executor
//!
//! Dispatches one step attempt to the collaborator that handles its kind and
//! normalizes whatever comes back into a [`StepOutcome`].
//!
//! ## Dispatch
//!
//! - **ui-action**: variables are substituted into the payload, the engine validates
//!   it, then performs it within the attempt's timeout
//! - **data-wait**: polls the availability gate for the step's dataset
//! - **no-op**: succeeds
//! - **custom**: looks up the handler named by `action.handler`
//!
//! A step of any other kind that declares a data precondition is gated on it
//! before dispatch. The executor never touches run state; classification of the
//! outcome is its only job.

use crate::client::context::StepContext;
use crate::client::traits::{AutomationOutcome, UiAutomationEngine};
use crate::constants::{AUTOMATION_TIMEOUT, NOT_YET_AVAILABLE};
use crate::models::runbook::{DatasetRef, StepKind, StepSpec};
use crate::orchestration::availability_gate::{AvailabilityGate, GateStatus};
use crate::orchestration::types::StepOutcome;
use crate::registry::StepHandlerRegistry;
use crate::utils::variables::substitute_value;
use crate::validation::require_object_payload;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument};

pub struct StepExecutor {
    gate: Arc<AvailabilityGate>,
    ui_engine: Option<Arc<dyn UiAutomationEngine>>,
    handlers: StepHandlerRegistry,
}

impl std::fmt::Debug for StepExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepExecutor")
            .field("gate", &self.gate)
            .field("ui_engine", &self.ui_engine.is_some())
            .field("handlers", &self.handlers)
            .finish()
    }
}

impl StepExecutor {
    pub fn new(gate: Arc<AvailabilityGate>) -> Self {
        Self {
            gate,
            ui_engine: None,
            handlers: StepHandlerRegistry::new(),
        }
    }

    pub fn with_ui_engine(mut self, engine: Arc<dyn UiAutomationEngine>) -> Self {
        self.ui_engine = Some(engine);
        self
    }

    pub fn with_handlers(mut self, handlers: StepHandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn handlers(&self) -> &StepHandlerRegistry {
        &self.handlers
    }

    /// Execute one attempt of a step
    #[instrument(skip(self, step, context), fields(run_id = %context.run_id, step_id = %step.id, attempt = context.attempt_number))]
    pub async fn execute(&self, step: &StepSpec, context: &StepContext) -> StepOutcome {
        if step.kind != StepKind::DataWait {
            if let Some(dataset) = &step.data_precondition {
                let gated = self.wait_for_dataset(dataset, context).await;
                if !gated.is_success() {
                    debug!(dataset = %dataset.name, "Data precondition not met");
                    return gated;
                }
            }
        }

        let outcome = match step.kind {
            StepKind::NoOp => StepOutcome::Succeeded,
            StepKind::DataWait => match &step.data_precondition {
                Some(dataset) => self.wait_for_dataset(dataset, context).await,
                None => StepOutcome::permanent("data-wait step has no dataset"),
            },
            StepKind::UiAction => self.perform_ui_action(&step.action, context).await,
            StepKind::Custom => self.run_custom_handler(&step.action, context).await,
        };

        debug!(outcome = ?outcome, "Step attempt finished");
        outcome
    }

    async fn wait_for_dataset(&self, dataset: &DatasetRef, context: &StepContext) -> StepOutcome {
        let deadline = self.gate.default_deadline().min(context.timeout);
        match self.gate.poll(dataset, deadline).await {
            GateStatus::Ready => StepOutcome::Succeeded,
            GateStatus::NotReady {
                deadline_expired: false,
            } => StepOutcome::transient(NOT_YET_AVAILABLE),
            GateStatus::NotReady {
                deadline_expired: true,
            } => StepOutcome::timeout(format!(
                "availability check for '{}' exceeded {}ms",
                dataset.name,
                deadline.as_millis()
            )),
            GateStatus::Error(detail) => StepOutcome::transient(detail),
        }
    }

    async fn perform_ui_action(&self, action: &Value, context: &StepContext) -> StepOutcome {
        let Some(engine) = &self.ui_engine else {
            return StepOutcome::permanent("no UI automation engine configured");
        };

        let payload = substitute_value(action, &context.variables);
        if let Err(reason) = require_object_payload(&payload) {
            return StepOutcome::permanent(format!("malformed action payload: {reason}"));
        }
        if let Err(reason) = engine.validate_action(&payload) {
            return StepOutcome::permanent(format!("malformed action payload: {reason}"));
        }

        match engine.perform(&payload, context.timeout).await {
            AutomationOutcome::Success => StepOutcome::Succeeded,
            AutomationOutcome::Failure(detail) => StepOutcome::transient(detail),
            AutomationOutcome::Timeout => StepOutcome::transient(AUTOMATION_TIMEOUT),
        }
    }

    async fn run_custom_handler(&self, action: &Value, context: &StepContext) -> StepOutcome {
        let payload = substitute_value(action, &context.variables);
        let Some(name) = payload.get("handler").and_then(Value::as_str) else {
            return StepOutcome::permanent("custom step requires action.handler");
        };
        let Some(handler) = self.handlers.get(name) else {
            return StepOutcome::permanent(format!("unknown custom handler '{name}'"));
        };

        handler.handle(&payload, context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::traits::{CustomStepHandler, DataAvailabilityChecker};
    use crate::config::AvailabilityConfig;
    use crate::orchestration::clock::ManualClock;
    use crate::models::run_instance::StepState;
    use crate::models::runbook::RetryPolicy;
    use crate::orchestration::backoff_calculator::decide;
    use crate::orchestration::types::{FailureKind, RetryDecision};
    use chrono::Utc;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;
    use uuid::Uuid;

    struct FixedChecker(Result<bool, String>);

    #[async_trait]
    impl DataAvailabilityChecker for FixedChecker {
        async fn is_available(&self, _dataset: &DatasetRef) -> Result<bool, String> {
            self.0.clone()
        }
    }

    struct SlowChecker(Duration);

    #[async_trait]
    impl DataAvailabilityChecker for SlowChecker {
        async fn is_available(&self, _dataset: &DatasetRef) -> Result<bool, String> {
            tokio::time::sleep(self.0).await;
            Ok(true)
        }
    }

    #[derive(Default)]
    struct RecordingEngine {
        outcome: Option<AutomationOutcome>,
        payloads: Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl UiAutomationEngine for RecordingEngine {
        async fn perform(&self, payload: &Value, _timeout: Duration) -> AutomationOutcome {
            self.payloads.lock().push(payload.clone());
            self.outcome.clone().unwrap_or(AutomationOutcome::Success)
        }

        fn validate_action(&self, payload: &Value) -> Result<(), String> {
            if payload.get("url").is_none() {
                return Err("missing url".to_string());
            }
            Ok(())
        }
    }

    struct EchoHandler;

    #[async_trait]
    impl CustomStepHandler for EchoHandler {
        async fn handle(&self, action: &Value, _context: &StepContext) -> StepOutcome {
            match action.get("fail").and_then(Value::as_str) {
                Some(detail) => StepOutcome::permanent(detail),
                None => StepOutcome::Succeeded,
            }
        }
    }

    fn executor(checker: Result<bool, String>) -> StepExecutor {
        let gate = AvailabilityGate::new(
            Arc::new(FixedChecker(checker)),
            Arc::new(ManualClock::default()),
            AvailabilityConfig {
                cache_ttl_ms: 0,
                ..AvailabilityConfig::default()
            },
        );
        StepExecutor::new(Arc::new(gate))
    }

    fn context() -> StepContext {
        StepContext::new(Uuid::new_v4(), "month-end", "step").with_variables(HashMap::from([(
            "period".to_string(),
            "2026-09".to_string(),
        )]))
    }

    fn failure_kind(outcome: &StepOutcome) -> Option<FailureKind> {
        match outcome {
            StepOutcome::Failed { kind, .. } => Some(*kind),
            StepOutcome::Succeeded => None,
        }
    }

    #[tokio::test]
    async fn test_no_op_succeeds() {
        let outcome = executor(Ok(true))
            .execute(&StepSpec::new("noop", StepKind::NoOp), &context())
            .await;
        assert_eq!(outcome, StepOutcome::Succeeded);
    }

    #[tokio::test]
    async fn test_data_wait_outcomes() {
        let step =
            StepSpec::new("wait", StepKind::DataWait).with_dataset(DatasetRef::new("ledger"));

        assert_eq!(
            executor(Ok(true)).execute(&step, &context()).await,
            StepOutcome::Succeeded
        );
        assert_eq!(
            executor(Ok(false)).execute(&step, &context()).await,
            StepOutcome::transient("not yet available")
        );
        assert_eq!(
            executor(Err("catalog down".to_string()))
                .execute(&step, &context())
                .await,
            StepOutcome::transient("catalog down")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_availability_deadline_is_a_timeout() {
        let gate = AvailabilityGate::new(
            Arc::new(SlowChecker(Duration::from_secs(60))),
            Arc::new(ManualClock::default()),
            AvailabilityConfig {
                cache_ttl_ms: 0,
                poll_deadline_ms: 500,
                ..AvailabilityConfig::default()
            },
        );
        let step =
            StepSpec::new("wait", StepKind::DataWait).with_dataset(DatasetRef::new("slow_ledger"));

        let outcome = StepExecutor::new(Arc::new(gate))
            .execute(&step, &context())
            .await;
        assert_eq!(failure_kind(&outcome), Some(FailureKind::Timeout));
        assert_eq!(
            outcome,
            StepOutcome::timeout("availability check for 'slow_ledger' exceeded 500ms")
        );

        let state = StepState {
            attempt_count: 1,
            ..StepState::default()
        };
        let now = Utc::now();
        let mut rng = rand::thread_rng();
        assert!(decide(&state, &RetryPolicy::default(), FailureKind::Timeout, now, &mut rng)
            .will_retry());
        let strict = RetryPolicy {
            retry_timeouts: false,
            ..RetryPolicy::default()
        };
        assert_eq!(
            decide(&state, &strict, FailureKind::Timeout, now, &mut rng),
            RetryDecision::GiveUp
        );
    }

    #[tokio::test]
    async fn test_ui_action_substitutes_variables() {
        let engine = Arc::new(RecordingEngine::default());
        let executor = executor(Ok(true)).with_ui_engine(engine.clone());
        let step = StepSpec::new("publish", StepKind::UiAction)
            .with_action(json!({"url": "https://portal/reports/${period}"}));

        assert_eq!(executor.execute(&step, &context()).await, StepOutcome::Succeeded);
        assert_eq!(
            engine.payloads.lock()[0]["url"],
            "https://portal/reports/2026-09"
        );
    }

    #[tokio::test]
    async fn test_ui_action_failure_classification() {
        let step = StepSpec::new("publish", StepKind::UiAction).with_action(json!({"url": "x"}));

        let missing_engine = executor(Ok(true)).execute(&step, &context()).await;
        assert_eq!(failure_kind(&missing_engine), Some(FailureKind::Permanent));

        let timeout_engine = Arc::new(RecordingEngine {
            outcome: Some(AutomationOutcome::Timeout),
            ..RecordingEngine::default()
        });
        let outcome = executor(Ok(true))
            .with_ui_engine(timeout_engine)
            .execute(&step, &context())
            .await;
        assert_eq!(outcome, StepOutcome::transient("automation timeout"));

        let failing_engine = Arc::new(RecordingEngine {
            outcome: Some(AutomationOutcome::Failure("button not found".to_string())),
            ..RecordingEngine::default()
        });
        let outcome = executor(Ok(true))
            .with_ui_engine(failing_engine)
            .execute(&step, &context())
            .await;
        assert_eq!(outcome, StepOutcome::transient("button not found"));

        let malformed = StepSpec::new("publish", StepKind::UiAction).with_action(json!({"x": 1}));
        let outcome = executor(Ok(true))
            .with_ui_engine(Arc::new(RecordingEngine::default()))
            .execute(&malformed, &context())
            .await;
        assert_eq!(failure_kind(&outcome), Some(FailureKind::Permanent));
    }

    #[tokio::test]
    async fn test_precondition_gates_other_kinds() {
        let engine = Arc::new(RecordingEngine::default());
        let step = StepSpec::new("publish", StepKind::UiAction)
            .with_action(json!({"url": "x"}))
            .with_dataset(DatasetRef::new("ledger"));

        let outcome = executor(Ok(false))
            .with_ui_engine(engine.clone())
            .execute(&step, &context())
            .await;
        assert_eq!(outcome, StepOutcome::transient("not yet available"));
        assert!(engine.payloads.lock().is_empty());
    }

    #[tokio::test]
    async fn test_custom_handler_dispatch() {
        let handlers = StepHandlerRegistry::new();
        handlers.register("echo", Arc::new(EchoHandler));
        let executor = executor(Ok(true)).with_handlers(handlers);

        let ok = StepSpec::new("c", StepKind::Custom).with_action(json!({"handler": "echo"}));
        assert_eq!(executor.execute(&ok, &context()).await, StepOutcome::Succeeded);

        let unknown =
            StepSpec::new("c", StepKind::Custom).with_action(json!({"handler": "missing"}));
        assert_eq!(
            executor.execute(&unknown, &context()).await,
            StepOutcome::permanent("unknown custom handler 'missing'")
        );

        let unnamed = StepSpec::new("c", StepKind::Custom).with_action(json!({}));
        assert_eq!(
            failure_kind(&executor.execute(&unnamed, &context()).await),
            Some(FailureKind::Permanent)
        );
    }
}
