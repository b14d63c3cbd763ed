#![allow(clippy::doc_markdown)] // Allow technical terms like YAML, TTL in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Runbook Orchestrator
//!
//! Dependency-aware execution engine for a monthly operations runbook.
//!
//! ## Overview
//!
//! A runbook is a graph of steps: ETL triggers, waits on upstream datasets, UI-driven
//! actions against internal tools and custom handlers. The orchestrator runs the steps
//! in dependency order, gates them on data availability, retries transient failures
//! with exponential backoff and records every transition so a run can be observed
//! while it executes and resumed after a restart.
//!
//! ## Module Organization
//!
//! - [`models`] - Runbook graph (validated at load) and run records
//! - [`state_machine`] - Step transitions, the run tracker and run persistence
//! - [`orchestration`] - Scheduler loop, step executor, availability gate, retry engine
//! - [`client`] - Traits for the availability checker, UI engine, handlers and sinks
//! - [`registry`] - Named custom step handlers
//! - [`events`] - Transition events fanned out to bounded subscribers
//! - [`config`] - Layered configuration
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use runbook_orchestrator::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example(checker: Arc<dyn DataAvailabilityChecker>) -> Result<(), OrchestratorError> {
//! let source = std::fs::read_to_string("config/runbooks/monthly_close.yaml")
//!     .map_err(|error| OrchestratorError::InvalidInput(error.to_string()))?;
//! let template = RunbookTemplate::from_yaml_str(&source)?;
//! let definition = Arc::new(RunbookDefinition::load(template)?);
//!
//! let config = OrchestratorConfig::default();
//! let clock: Arc<dyn Clock> = Arc::new(SystemClock);
//! let gate = AvailabilityGate::new(checker, clock.clone(), config.availability.clone());
//! let store = Arc::new(FileRunStore::new(&config.persistence.state_directory));
//! let coordinator = WorkflowCoordinator::new(config, StepExecutor::new(Arc::new(gate)), store, clock);
//!
//! let summary = coordinator
//!     .execute_run(definition, RunRequest::triggered_by("cron").with_variable("period", "2026-09"))
//!     .await?;
//! println!("{}: {}", summary.run_id, summary.status);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod registry;
pub mod state_machine;
pub mod utils;
pub mod validation;

pub use config::{ConfigManager, ConfigurationError, OrchestratorConfig};
pub use error::{OrchestratorError, Result};
pub use models::{RunInstance, RunRequest, RunSummary, RunbookDefinition, RunbookTemplate, StepSpec};
pub use orchestration::{RunHandle, WorkflowCoordinator};
pub use state_machine::{RunStatus, StepStatus};

/// Everything needed to load a runbook and drive runs of it
pub mod prelude {
    pub use crate::client::{
        AutomationOutcome, CustomStepHandler, DataAvailabilityChecker, EventSink, StepContext,
        UiAutomationEngine,
    };
    pub use crate::config::OrchestratorConfig;
    pub use crate::error::OrchestratorError;
    pub use crate::events::{EventPublisher, OrchestrationEvent, StateChange};
    pub use crate::models::{
        DatasetRef, RetryPolicy, RunRequest, RunSummary, RunbookDefinition, RunbookTemplate,
        StepKind, StepSpec,
    };
    pub use crate::orchestration::{
        AvailabilityGate, Clock, FailureKind, ManualClock, RunHandle, StepExecutor, StepOutcome,
        SystemClock, WorkflowCoordinator,
    };
    pub use crate::registry::StepHandlerRegistry;
    pub use crate::state_machine::{
        FileRunStore, InMemoryRunStore, RunStatus, RunStore, SkipReason, StepStatus,
    };
}
