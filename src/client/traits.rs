//! # Collaborator Traits
//!
//! The orchestrator talks to the outside world only through these traits. The
//! production implementations (browser driver, data catalog, alert channels) live
//! outside this crate.

use crate::client::context::StepContext;
use crate::events::types::OrchestrationEvent;
use crate::models::runbook::DatasetRef;
use crate::orchestration::types::StepOutcome;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Answers whether a named dataset has been published for the current period
#[async_trait]
pub trait DataAvailabilityChecker: Send + Sync {
    /// `Ok(true)` when ready, `Ok(false)` when not yet, `Err` when the check itself failed
    async fn is_available(&self, dataset: &DatasetRef) -> Result<bool, String>;
}

/// Result reported by the UI automation engine for one action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutomationOutcome {
    Success,
    Failure(String),
    Timeout,
}

/// Drives UI actions against internal tools
#[async_trait]
pub trait UiAutomationEngine: Send + Sync {
    /// Perform one action, giving up after `timeout`
    async fn perform(&self, payload: &Value, timeout: Duration) -> AutomationOutcome;

    /// Reject payloads the engine cannot interpret
    ///
    /// Default implementation accepts every payload.
    fn validate_action(&self, payload: &Value) -> Result<(), String> {
        let _ = payload;
        Ok(())
    }
}

/// Handler for `custom` steps, registered by name
#[async_trait]
pub trait CustomStepHandler: Send + Sync {
    async fn handle(&self, action: &Value, context: &StepContext) -> StepOutcome;
}

/// Receives orchestration events for the Notification System or Monitoring Service
#[async_trait]
pub trait EventSink: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, event: &OrchestrationEvent) -> Result<(), String>;
}
