//! # Step Handler Registry
//!
//! Thread-safe registry of custom step handlers keyed by name. A `custom` step
//! selects its handler through the `handler` field of its action payload.

use crate::client::traits::CustomStepHandler;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Registry statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    pub total_handlers: usize,
    pub handler_names: Vec<String>,
}

/// Registry of named custom step handlers
#[derive(Clone, Default)]
pub struct StepHandlerRegistry {
    handlers: Arc<DashMap<String, Arc<dyn CustomStepHandler>>>,
}

impl std::fmt::Debug for StepHandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepHandlerRegistry")
            .field("handlers", &self.list_handlers())
            .finish()
    }
}

impl StepHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous handler with the same name
    pub fn register(&self, name: impl Into<String>, handler: Arc<dyn CustomStepHandler>) {
        let name = name.into();
        if self.handlers.insert(name.clone(), handler).is_some() {
            info!(handler = %name, "Replaced custom step handler");
        } else {
            debug!(handler = %name, "Registered custom step handler");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CustomStepHandler>> {
        self.handlers.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.handlers.remove(name).is_some()
    }

    /// Registered handler names, sorted
    pub fn list_handlers(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    pub fn stats(&self) -> RegistryStats {
        let handler_names = self.list_handlers();
        RegistryStats {
            total_handlers: handler_names.len(),
            handler_names,
        }
    }
}
