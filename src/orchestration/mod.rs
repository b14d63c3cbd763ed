//! # Orchestration Engine
//!
//! Dependency-aware execution of runbook steps.
//!
//! ## Core Components
//!
//! - **WorkflowCoordinator**: the per-run scheduler loop; sole writer of run state
//! - **ViableStepDiscovery**: pure readiness analysis over the step states
//! - **StepExecutor**: runs one attempt of a step and classifies the outcome
//! - **AvailabilityGate**: bounded, cached, single-flight dataset polling
//! - **BackoffCalculator**: retry decisions and exponential backoff with jitter
//! - **Clock**: injectable time source shared by all of the above

pub mod availability_gate;
pub mod backoff_calculator;
pub mod clock;
pub mod step_executor;
pub mod types;
pub mod viable_step_discovery;
pub mod workflow_coordinator;

pub use availability_gate::{AvailabilityGate, GateStats, GateStatus};
pub use backoff_calculator::BackoffCalculator;
pub use clock::{Clock, ManualClock, SystemClock};
pub use step_executor::StepExecutor;
pub use types::{FailureKind, RetryDecision, StepOutcome};
pub use workflow_coordinator::{RunHandle, WorkflowCoordinator};
