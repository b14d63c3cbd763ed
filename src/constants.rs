//! # System Constants
//!
//! Defaults and event names that define the operational boundaries of the
//! runbook orchestrator.

/// Event names attached to published orchestration events
pub mod events {
    pub const STEP_TRANSITIONED: &str = "step.transitioned";
    pub const RUN_TRANSITIONED: &str = "run.transitioned";
    pub const RUN_COMPLETED: &str = "run.completed";
}

/// Default values used when neither the runbook nor configuration specify one
pub mod defaults {
    pub const MAX_ATTEMPTS: u32 = 3;
    pub const BASE_BACKOFF_MS: u64 = 1_000;
    pub const BACKOFF_MULTIPLIER: f64 = 2.0;
    pub const MAX_BACKOFF_MS: u64 = 300_000;
    pub const MAX_CONCURRENT_STEPS: usize = 4;
    pub const STEP_TIMEOUT_SECONDS: u64 = 1_800;
    pub const AVAILABILITY_CACHE_TTL_MS: u64 = 5_000;
    pub const AVAILABILITY_CACHE_TTL_CEILING_MS: u64 = 60_000;
    pub const AVAILABILITY_POLL_DEADLINE_MS: u64 = 30_000;
    pub const EVENT_BUFFER_SIZE: usize = 1_024;
    pub const STATE_DIRECTORY: &str = "state/runs";
}

/// Jitter applied to retry delays is bounded to this fraction of the delay (±20%)
pub const JITTER_FRACTION: f64 = 0.2;

/// Detail recorded for a data-wait step whose dataset is not ready yet
pub const NOT_YET_AVAILABLE: &str = "not yet available";

/// Detail recorded when the UI automation engine times out
pub const AUTOMATION_TIMEOUT: &str = "automation timeout";
