//! # Orchestrator Configuration
//!
//! Process-wide settings for the orchestrator: concurrency, default timeouts, the
//! default retry policy, availability cache bounds, event buffering and the state
//! directory. Every field has a default, so an empty configuration is valid.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use runbook_orchestrator::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load configuration (environment auto-detected from RUNBOOK_ENV)
//! let manager = ConfigManager::load_from_directory("config")?;
//!
//! let limit = manager.config().execution.max_concurrent_steps;
//! let ttl = manager.config().availability.cache_ttl();
//! # let _ = (limit, ttl);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::constants::defaults;
use crate::models::runbook::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring orchestrator.toml
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Dispatch limits and default per-step timeout
    pub execution: ExecutionConfig,

    /// Retry policy applied to steps that do not declare their own
    pub backoff: RetryPolicy,

    /// Availability gate cache and polling bounds
    pub availability: AvailabilityConfig,

    /// Event subscriber buffering
    pub events: EventsConfig,

    /// Where run snapshots are written
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub max_concurrent_steps: usize,
    pub step_timeout_seconds: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_steps: defaults::MAX_CONCURRENT_STEPS,
            step_timeout_seconds: defaults::STEP_TIMEOUT_SECONDS,
        }
    }
}

impl ExecutionConfig {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AvailabilityConfig {
    /// TTL for cached answers when the dataset does not set its own
    pub cache_ttl_ms: u64,
    /// Upper bound on any cached answer's TTL
    pub cache_ttl_ceiling_ms: u64,
    /// How long a single poll may wait on the checker
    pub poll_deadline_ms: u64,
}

impl Default for AvailabilityConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: defaults::AVAILABILITY_CACHE_TTL_MS,
            cache_ttl_ceiling_ms: defaults::AVAILABILITY_CACHE_TTL_CEILING_MS,
            poll_deadline_ms: defaults::AVAILABILITY_POLL_DEADLINE_MS,
        }
    }
}

impl AvailabilityConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn cache_ttl_ceiling(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ceiling_ms)
    }

    pub fn poll_deadline(&self) -> Duration {
        Duration::from_millis(self.poll_deadline_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    pub buffer_size: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            buffer_size: defaults::EVENT_BUFFER_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub state_directory: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            state_directory: PathBuf::from(defaults::STATE_DIRECTORY),
        }
    }
}

impl OrchestratorConfig {
    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.execution.max_concurrent_steps == 0 {
            return Err(ConfigurationError::invalid_value(
                "execution.max_concurrent_steps",
                "0",
                "at least one step must be allowed to run",
            ));
        }

        if self.execution.step_timeout_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "execution.step_timeout_seconds",
                "0",
                "step timeout must be greater than 0",
            ));
        }

        self.backoff.validate().map_err(|reason| {
            ConfigurationError::invalid_value("backoff", format!("{:?}", self.backoff), reason)
        })?;

        if self.availability.cache_ttl_ms > self.availability.cache_ttl_ceiling_ms {
            return Err(ConfigurationError::invalid_value(
                "availability.cache_ttl_ms",
                self.availability.cache_ttl_ms.to_string(),
                format!(
                    "must not exceed availability.cache_ttl_ceiling_ms ({})",
                    self.availability.cache_ttl_ceiling_ms
                ),
            ));
        }

        if self.availability.poll_deadline_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "availability.poll_deadline_ms",
                "0",
                "poll deadline must be greater than 0",
            ));
        }

        if self.events.buffer_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "events.buffer_size",
                "0",
                "subscriber buffers need room for at least one event",
            ));
        }

        if self.persistence.state_directory.as_os_str().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "persistence.state_directory",
                "persistence configuration",
            ));
        }

        Ok(())
    }
}
