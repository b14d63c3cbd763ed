//! # Backoff Calculator
//!
//! Retry policy engine: decides whether a failed attempt is retried and when.
//!
//! ## Overview
//!
//! The decision is a pure function of the step's state, its effective policy, the
//! failure classification and the current time. Randomness for jitter is passed
//! in, so callers that need determinism can supply a seeded generator.
//!
//! ```text
//! delay = min(max_backoff, base_backoff * multiplier^(attempt_count - 1))
//! ```
//!
//! With jitter enabled the delay is perturbed by up to ±20% and clamped to
//! `max_backoff` again.

use crate::constants::JITTER_FRACTION;
use crate::models::run_instance::StepState;
use crate::models::runbook::{RetryPolicy, RunbookDefinition, StepSpec};
use crate::orchestration::types::{FailureKind, RetryDecision};
use chrono::{DateTime, Utc};
use rand::Rng;
use std::time::Duration;

/// Resolve the policy for a step: step override, then runbook default, then configuration
pub fn effective_policy<'a>(
    step: &'a StepSpec,
    definition: &'a RunbookDefinition,
    configured_default: &'a RetryPolicy,
) -> &'a RetryPolicy {
    step.retry_policy
        .as_ref()
        .or(definition.default_retry_policy.as_ref())
        .unwrap_or(configured_default)
}

/// Un-jittered exponential delay before the attempt following `attempt_count`
pub fn compute_delay(attempt_count: u32, policy: &RetryPolicy) -> Duration {
    let exponent = attempt_count.saturating_sub(1).min(i32::MAX as u32) as i32;
    let max_ms = policy.max_backoff_ms as f64;
    let delay_ms = (policy.base_backoff_ms as f64 * policy.multiplier.powi(exponent)).min(max_ms);
    Duration::from_millis(delay_ms.max(0.0) as u64)
}

/// Perturb a delay by up to ±20%, never exceeding `max_backoff`
pub fn apply_jitter<R: Rng + ?Sized>(
    delay: Duration,
    policy: &RetryPolicy,
    rng: &mut R,
) -> Duration {
    let delay_ms = delay.as_millis() as f64;
    if delay_ms <= 0.0 {
        return delay;
    }
    let factor = rng.gen_range((1.0 - JITTER_FRACTION)..=(1.0 + JITTER_FRACTION));
    let jittered_ms = (delay_ms * factor).min(policy.max_backoff_ms as f64);
    Duration::from_millis(jittered_ms.max(0.0) as u64)
}

/// Decide what happens after a failed attempt
///
/// `state.attempt_count` already includes the attempt that just failed.
pub fn decide<R: Rng + ?Sized>(
    state: &StepState,
    policy: &RetryPolicy,
    kind: FailureKind,
    now: DateTime<Utc>,
    rng: &mut R,
) -> RetryDecision {
    match kind {
        FailureKind::Permanent => return RetryDecision::GiveUp,
        FailureKind::Timeout if !policy.retry_timeouts => return RetryDecision::GiveUp,
        FailureKind::Timeout | FailureKind::Transient => {}
    }

    if state.attempt_count >= policy.max_attempts {
        return RetryDecision::GiveUp;
    }

    let mut delay = compute_delay(state.attempt_count.max(1), policy);
    if policy.jitter {
        delay = apply_jitter(delay, policy, rng);
    }

    RetryDecision::RetryAt(now + chrono::Duration::milliseconds(delay.as_millis() as i64))
}

/// Retry engine bound to the process-wide default policy
#[derive(Debug, Clone)]
pub struct BackoffCalculator {
    default_policy: RetryPolicy,
}

impl BackoffCalculator {
    pub fn new(default_policy: RetryPolicy) -> Self {
        Self { default_policy }
    }

    pub fn default_policy(&self) -> &RetryPolicy {
        &self.default_policy
    }

    pub fn policy_for<'a>(
        &'a self,
        step: &'a StepSpec,
        definition: &'a RunbookDefinition,
    ) -> &'a RetryPolicy {
        effective_policy(step, definition, &self.default_policy)
    }

    /// Decide using the thread-local generator for jitter
    pub fn decide(
        &self,
        state: &StepState,
        policy: &RetryPolicy,
        kind: FailureKind,
        now: DateTime<Utc>,
    ) -> RetryDecision {
        decide(state, policy, kind, now, &mut rand::thread_rng())
    }
}

impl Default for BackoffCalculator {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}
