//! Harness wiring a coordinator to scripted collaborators and a manual clock.

use super::fakes::{RecordingHandler, ScriptedChecker, ScriptedEngine};
use runbook_orchestrator::config::OrchestratorConfig;
use runbook_orchestrator::models::{
    RunInstance, RunRequest, RunSummary, RunbookDefinition, RunbookTemplate, StepKind, StepSpec,
};
use runbook_orchestrator::orchestration::{
    AvailabilityGate, Clock, ManualClock, StepExecutor, WorkflowCoordinator,
};
use runbook_orchestrator::registry::StepHandlerRegistry;
use runbook_orchestrator::state_machine::{InMemoryRunStore, RunStore};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Configuration with short deadlines and an uncached availability gate
pub fn test_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.execution.step_timeout_seconds = 5;
    config.availability.cache_ttl_ms = 0;
    config.availability.poll_deadline_ms = 1_000;
    config
}

pub fn custom_step(id: &str, handler: &str) -> StepSpec {
    StepSpec::new(id, StepKind::Custom).with_action(json!({ "handler": handler }))
}

pub fn load(template: RunbookTemplate) -> Arc<RunbookDefinition> {
    Arc::new(RunbookDefinition::load(template).expect("runbook should be valid"))
}

pub struct Harness {
    pub clock: ManualClock,
    pub checker: Arc<ScriptedChecker>,
    pub engine: Arc<ScriptedEngine>,
    pub handlers: StepHandlerRegistry,
    pub store: Arc<dyn RunStore>,
    pub coordinator: WorkflowCoordinator,
}

impl Harness {
    pub fn new() -> Self {
        HarnessBuilder::default().build()
    }

    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    pub fn register(&self, name: &str, handler: Arc<RecordingHandler>) {
        self.handlers.register(name, handler);
    }

    pub async fn run(&self, definition: Arc<RunbookDefinition>) -> RunSummary {
        self.run_with(definition, RunRequest::triggered_by("test"))
            .await
    }

    pub async fn run_with(
        &self,
        definition: Arc<RunbookDefinition>,
        request: RunRequest,
    ) -> RunSummary {
        self.coordinator
            .execute_run(definition, request)
            .await
            .expect("run should reach a terminal status")
    }

    pub async fn snapshot(&self, run_id: Uuid) -> RunInstance {
        self.store
            .load(run_id)
            .await
            .expect("store should be readable")
            .expect("run should be persisted")
    }
}

pub struct HarnessBuilder {
    config: OrchestratorConfig,
    engine: Arc<ScriptedEngine>,
    store: Arc<dyn RunStore>,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            config: test_config(),
            engine: Arc::new(ScriptedEngine::default()),
            store: Arc::new(InMemoryRunStore::new()),
        }
    }
}

impl HarnessBuilder {
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn engine(mut self, engine: ScriptedEngine) -> Self {
        self.engine = Arc::new(engine);
        self
    }

    pub fn store(mut self, store: Arc<dyn RunStore>) -> Self {
        self.store = store;
        self
    }

    pub fn build(self) -> Harness {
        let clock = ManualClock::default();
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let checker = Arc::new(ScriptedChecker::default());
        let handlers = StepHandlerRegistry::new();

        let gate = AvailabilityGate::new(
            checker.clone(),
            shared_clock.clone(),
            self.config.availability.clone(),
        );
        let executor = StepExecutor::new(Arc::new(gate))
            .with_ui_engine(self.engine.clone())
            .with_handlers(handlers.clone());
        let coordinator =
            WorkflowCoordinator::new(self.config, executor, self.store.clone(), shared_clock);

        Harness {
            clock,
            checker,
            engine: self.engine,
            handlers,
            store: self.store,
            coordinator,
        }
    }
}
