//! Scripted stand-ins for the systems the orchestrator drives.

use async_trait::async_trait;
use parking_lot::Mutex;
use runbook_orchestrator::client::{
    AutomationOutcome, CustomStepHandler, DataAvailabilityChecker, StepContext,
    UiAutomationEngine,
};
use runbook_orchestrator::models::DatasetRef;
use runbook_orchestrator::orchestration::StepOutcome;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Answers per dataset from a script, then `Ok(true)`
#[derive(Default)]
pub struct ScriptedChecker {
    scripts: Mutex<HashMap<String, VecDeque<Result<bool, String>>>>,
    calls: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl ScriptedChecker {
    pub fn script(&self, dataset: &str, answers: Vec<Result<bool, String>>) {
        self.scripts
            .lock()
            .insert(dataset.to_string(), answers.into());
    }

    /// Make every answer take `delay` to arrive
    pub fn respond_after(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataAvailabilityChecker for ScriptedChecker {
    async fn is_available(&self, dataset: &DatasetRef) -> Result<bool, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.scripts
            .lock()
            .get_mut(&dataset.name)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Ok(true))
    }
}

/// UI engine replaying scripted outcomes, then succeeding
#[derive(Default)]
pub struct ScriptedEngine {
    outcomes: Mutex<VecDeque<AutomationOutcome>>,
    performed: Mutex<Vec<Value>>,
    blocking: bool,
}

impl ScriptedEngine {
    pub fn new(outcomes: Vec<AutomationOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            ..Self::default()
        }
    }

    /// Never returns from `perform`
    pub fn blocking() -> Self {
        Self {
            blocking: true,
            ..Self::default()
        }
    }

    pub fn performed(&self) -> Vec<Value> {
        self.performed.lock().clone()
    }
}

#[async_trait]
impl UiAutomationEngine for ScriptedEngine {
    async fn perform(&self, payload: &Value, _timeout: Duration) -> AutomationOutcome {
        self.performed.lock().push(payload.clone());
        if self.blocking {
            futures::future::pending::<()>().await;
        }
        self.outcomes
            .lock()
            .pop_front()
            .unwrap_or(AutomationOutcome::Success)
    }
}

/// Behaviour of a [`RecordingHandler`] on every call
#[derive(Clone)]
pub enum HandlerBehavior {
    Succeed,
    Script(Arc<Mutex<VecDeque<StepOutcome>>>),
    Always(StepOutcome),
    Hang,
    Panic,
}

/// Custom step handler that records which steps called it, in order
pub struct RecordingHandler {
    behavior: HandlerBehavior,
    calls: Mutex<Vec<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl RecordingHandler {
    pub fn new(behavior: HandlerBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        })
    }

    pub fn succeeding() -> Arc<Self> {
        Self::new(HandlerBehavior::Succeed)
    }

    pub fn always(outcome: StepOutcome) -> Arc<Self> {
        Self::new(HandlerBehavior::Always(outcome))
    }

    pub fn scripted(outcomes: Vec<StepOutcome>) -> Arc<Self> {
        Self::new(HandlerBehavior::Script(Arc::new(Mutex::new(outcomes.into()))))
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, step_id: &str) -> usize {
        self.calls.lock().iter().filter(|id| *id == step_id).count()
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CustomStepHandler for RecordingHandler {
    async fn handle(&self, _action: &Value, context: &StepContext) -> StepOutcome {
        self.calls.lock().push(context.step_id.clone());
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        // give concurrently dispatched attempts a chance to overlap
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }

        let outcome = match &self.behavior {
            HandlerBehavior::Succeed => StepOutcome::Succeeded,
            HandlerBehavior::Always(outcome) => outcome.clone(),
            HandlerBehavior::Script(outcomes) => outcomes
                .lock()
                .pop_front()
                .unwrap_or(StepOutcome::Succeeded),
            HandlerBehavior::Hang => {
                futures::future::pending::<()>().await;
                StepOutcome::Succeeded
            }
            HandlerBehavior::Panic => panic!("handler blew up"),
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}
