//! # Availability Gate
//!
//! Wraps the data availability checker behind a bounded polling contract.
//!
//! ## Key Features
//!
//! - **TTL cache**: Ready answers are cached per dataset for
//!   `min(dataset ttl or configured default, configured ceiling)`. NotReady answers
//!   and checker errors never are, so every retry of a data-wait step reaches the
//!   checker
//! - **Single flight**: concurrent polls for one dataset queue behind a per-key
//!   lock and reuse the answer fetched while they waited
//! - **Bounded waits**: a poll never outlives its deadline; expiry is reported as
//!   `NotReady` flagged as deadline-expired

use crate::client::traits::DataAvailabilityChecker;
use crate::config::AvailabilityConfig;
use crate::models::runbook::DatasetRef;
use crate::orchestration::clock::Clock;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Answer of a single poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateStatus {
    Ready,
    NotReady { deadline_expired: bool },
    /// The checker itself failed; always treated as transient
    Error(String),
}

#[derive(Debug, Clone, Copy)]
struct CachedAnswer {
    ready: bool,
    /// Ready answers only; NotReady is kept solely for pollers queued behind the fetch
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct CacheSlot {
    /// Bumped on every answer the checker returns
    generation: AtomicU64,
    answer: Mutex<Option<CachedAnswer>>,
}

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateStats {
    pub checker_calls: u64,
    pub cache_hits: u64,
    pub checker_errors: u64,
    pub deadline_expiries: u64,
}

pub struct AvailabilityGate {
    checker: Arc<dyn DataAvailabilityChecker>,
    clock: Arc<dyn Clock>,
    config: AvailabilityConfig,
    entries: DashMap<String, Arc<CacheSlot>>,
    checker_calls: AtomicU64,
    cache_hits: AtomicU64,
    checker_errors: AtomicU64,
    deadline_expiries: AtomicU64,
}

impl std::fmt::Debug for AvailabilityGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AvailabilityGate")
            .field("config", &self.config)
            .field("cached_datasets", &self.entries.len())
            .finish()
    }
}

impl AvailabilityGate {
    pub fn new(
        checker: Arc<dyn DataAvailabilityChecker>,
        clock: Arc<dyn Clock>,
        config: AvailabilityConfig,
    ) -> Self {
        Self {
            checker,
            clock,
            config,
            entries: DashMap::new(),
            checker_calls: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            checker_errors: AtomicU64::new(0),
            deadline_expiries: AtomicU64::new(0),
        }
    }

    /// Default deadline for a single poll
    pub fn default_deadline(&self) -> Duration {
        self.config.poll_deadline()
    }

    /// Effective cache TTL for a dataset
    pub fn ttl_for(&self, dataset: &DatasetRef) -> Duration {
        let requested = dataset.cache_ttl_ms.unwrap_or(self.config.cache_ttl_ms);
        Duration::from_millis(requested.min(self.config.cache_ttl_ceiling_ms))
    }

    /// Ask whether a dataset is ready, waiting at most `deadline`
    pub async fn poll(&self, dataset: &DatasetRef, deadline: Duration) -> GateStatus {
        let slot = self
            .entries
            .entry(dataset.name.clone())
            .or_default()
            .clone();

        match tokio::time::timeout(deadline, self.poll_slot(dataset, &slot)).await {
            Ok(status) => status,
            Err(_) => {
                self.deadline_expiries.fetch_add(1, Ordering::Relaxed);
                warn!(
                    dataset = %dataset.name,
                    deadline_ms = deadline.as_millis() as u64,
                    "Availability poll exceeded its deadline"
                );
                GateStatus::NotReady {
                    deadline_expired: true,
                }
            }
        }
    }

    async fn poll_slot(&self, dataset: &DatasetRef, slot: &CacheSlot) -> GateStatus {
        let seen_generation = slot.generation.load(Ordering::Acquire);
        let mut cached = slot.answer.lock().await;
        let now = self.clock.now();

        if let Some(answer) = cached.as_ref() {
            let fresh = answer.expires_at.is_some_and(|expires_at| expires_at > now);
            let fetched_while_waiting = slot.generation.load(Ordering::Acquire) > seen_generation;
            if fresh || fetched_while_waiting {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Self::status_for(answer.ready);
            }
        }

        self.checker_calls.fetch_add(1, Ordering::Relaxed);
        match self.checker.is_available(dataset).await {
            Ok(ready) => {
                let expires_at = ready.then(|| {
                    let ttl = self.ttl_for(dataset);
                    self.clock.now() + chrono::Duration::milliseconds(ttl.as_millis() as i64)
                });
                *cached = Some(CachedAnswer { ready, expires_at });
                slot.generation.fetch_add(1, Ordering::AcqRel);
                debug!(dataset = %dataset.name, ready, "Availability checked");
                Self::status_for(ready)
            }
            Err(error) => {
                *cached = None;
                self.checker_errors.fetch_add(1, Ordering::Relaxed);
                warn!(dataset = %dataset.name, error = %error, "Availability checker failed");
                GateStatus::Error(error)
            }
        }
    }

    fn status_for(ready: bool) -> GateStatus {
        if ready {
            GateStatus::Ready
        } else {
            GateStatus::NotReady {
                deadline_expired: false,
            }
        }
    }

    /// Forget the cached answer for a dataset
    pub fn invalidate(&self, dataset: &str) {
        self.entries.remove(dataset);
    }

    pub fn stats(&self) -> GateStats {
        GateStats {
            checker_calls: self.checker_calls.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            checker_errors: self.checker_errors.load(Ordering::Relaxed),
            deadline_expiries: self.deadline_expiries.load(Ordering::Relaxed),
        }
    }
}
