//! # Runbook Definition
//!
//! Static, validated representation of a runbook: the steps, their dependency edges,
//! and the per-step retry policy. A [`RunbookTemplate`] is what an external config
//! parser produces (YAML or JSON); [`RunbookDefinition::load`] validates it once and
//! the result is shared read-only by every run created from it.

use crate::constants::defaults;
use crate::utils::serde::deserialize_optional_seconds;
use crate::validation::validate_action_payload;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Closed set of step kinds understood by the step executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepKind {
    UiAction,
    DataWait,
    NoOp,
    Custom,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UiAction => write!(f, "ui-action"),
            Self::DataWait => write!(f, "data-wait"),
            Self::NoOp => write!(f, "no-op"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

/// Reference to a named dataset whose availability gates a step
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "DatasetRefRepr")]
pub struct DatasetRef {
    pub name: String,
    /// Per-dataset cache TTL override, clamped to the configured ceiling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_ttl_ms: Option<u64>,
}

impl DatasetRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cache_ttl_ms: None,
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl_ms = Some(ttl.as_millis() as u64);
        self
    }
}

impl fmt::Display for DatasetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Accepts either `data_precondition: sales_mart` or the full object form
#[derive(Deserialize)]
#[serde(untagged)]
enum DatasetRefRepr {
    Name(String),
    Full {
        name: String,
        #[serde(default)]
        cache_ttl_ms: Option<u64>,
    },
}

impl From<DatasetRefRepr> for DatasetRef {
    fn from(repr: DatasetRefRepr) -> Self {
        match repr {
            DatasetRefRepr::Name(name) => DatasetRef::new(name),
            DatasetRefRepr::Full { name, cache_ttl_ms } => DatasetRef { name, cache_ttl_ms },
        }
    }
}

/// Retry and backoff policy for a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub multiplier: f64,
    pub max_backoff_ms: u64,
    pub jitter: bool,
    /// When false, a timed-out attempt is not retried
    pub retry_timeouts: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::MAX_ATTEMPTS,
            base_backoff_ms: defaults::BASE_BACKOFF_MS,
            multiplier: defaults::BACKOFF_MULTIPLIER,
            max_backoff_ms: defaults::MAX_BACKOFF_MS,
            jitter: true,
            retry_timeouts: true,
        }
    }
}

impl RetryPolicy {
    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(format!(
                "multiplier must be a finite value >= 1.0, got {}",
                self.multiplier
            ));
        }
        if self.base_backoff_ms > self.max_backoff_ms {
            return Err(format!(
                "base_backoff_ms ({}) exceeds max_backoff_ms ({})",
                self.base_backoff_ms, self.max_backoff_ms
            ));
        }
        Ok(())
    }
}

/// Which transitions of a step should be surfaced as human notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyPolicy {
    pub on_start: bool,
    pub on_success: bool,
    pub on_failure: bool,
}

impl Default for NotifyPolicy {
    fn default() -> Self {
        Self {
            on_start: false,
            on_success: false,
            on_failure: true,
        }
    }
}

/// One node of the runbook graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub kind: StepKind,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_precondition: Option<DatasetRef>,
    #[serde(default)]
    pub action: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
    /// A skipped optional step still satisfies its dependents
    #[serde(default)]
    pub optional: bool,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_optional_seconds"
    )]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub notify: NotifyPolicy,
}

impl StepSpec {
    pub fn new(id: impl Into<String>, kind: StepKind) -> Self {
        Self {
            id: id.into(),
            name: None,
            description: None,
            kind,
            dependencies: Vec::new(),
            data_precondition: None,
            action: Value::Null,
            retry_policy: None,
            optional: false,
            timeout_secs: None,
            notify: NotifyPolicy::default(),
        }
    }

    pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_dataset(mut self, dataset: DatasetRef) -> Self {
        self.data_precondition = Some(dataset);
        self
    }

    pub fn with_action(mut self, action: Value) -> Self {
        self.action = action;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Whole seconds, rounded up so a sub-second timeout never becomes zero
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = Some(timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0));
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Unvalidated runbook as produced by the external config parser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunbookTemplate {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Applies to every step without its own `retry_policy`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_retry_policy: Option<RetryPolicy>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_optional_seconds"
    )]
    pub global_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallel_steps: Option<usize>,
    pub steps: Vec<StepSpec>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl RunbookTemplate {
    pub fn new(id: impl Into<String>, steps: Vec<StepSpec>) -> Self {
        Self {
            id: id.into(),
            name: None,
            description: None,
            version: default_version(),
            owner: None,
            default_retry_policy: None,
            global_timeout_secs: None,
            max_parallel_steps: None,
            steps,
        }
    }

    pub fn from_yaml_str(source: &str) -> crate::error::Result<Self> {
        Ok(serde_yaml::from_str(source)?)
    }

    pub fn from_json_str(source: &str) -> crate::error::Result<Self> {
        Ok(serde_json::from_str(source)?)
    }
}

/// Reasons a runbook is rejected at load time
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Runbook id must not be empty")]
    MissingRunbookId,

    #[error("Runbook '{runbook_id}' defines no steps")]
    EmptyRunbook { runbook_id: String },

    #[error("Step at position {position} has an empty id")]
    EmptyStepId { position: usize },

    #[error("Duplicate step id: {0}")]
    DuplicateStepId(String),

    #[error("Step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("Cycle detected: {}", cycle.join(" -> "))]
    CycleDetected { cycle: Vec<String> },

    #[error("Step '{0}' does not name a dataset")]
    MissingDataset(String),

    #[error("Step '{step}' has an invalid retry policy: {reason}")]
    InvalidRetryPolicy { step: String, reason: String },

    #[error("Step '{step}' has a malformed action: {reason}")]
    MalformedAction { step: String, reason: String },

    #[error("Step '{0}' has a zero timeout")]
    ZeroStepTimeout(String),

    #[error("Runbook '{runbook_id}' has a zero global timeout")]
    ZeroGlobalTimeout { runbook_id: String },
}

/// Validated, immutable runbook graph
#[derive(Debug, Clone)]
pub struct RunbookDefinition {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub version: String,
    pub owner: Option<String>,
    pub default_retry_policy: Option<RetryPolicy>,
    pub global_timeout: Option<Duration>,
    pub max_parallel_steps: Option<usize>,
    steps: Vec<StepSpec>,
    index: HashMap<String, usize>,
    dependents: HashMap<String, Vec<String>>,
}

impl RunbookDefinition {
    /// Validate a template into a definition. Acyclicity is checked here and never again.
    pub fn load(template: RunbookTemplate) -> Result<Self, ValidationError> {
        if template.id.trim().is_empty() {
            return Err(ValidationError::MissingRunbookId);
        }
        if template.steps.is_empty() {
            return Err(ValidationError::EmptyRunbook {
                runbook_id: template.id,
            });
        }

        let mut index = HashMap::with_capacity(template.steps.len());
        for (position, step) in template.steps.iter().enumerate() {
            if step.id.trim().is_empty() {
                return Err(ValidationError::EmptyStepId { position });
            }
            if index.insert(step.id.clone(), position).is_some() {
                return Err(ValidationError::DuplicateStepId(step.id.clone()));
            }
        }

        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for step in &template.steps {
            for dependency in &step.dependencies {
                if !index.contains_key(dependency) {
                    return Err(ValidationError::UnknownDependency {
                        step: step.id.clone(),
                        dependency: dependency.clone(),
                    });
                }
                dependents
                    .entry(dependency.clone())
                    .or_default()
                    .push(step.id.clone());
            }
        }

        for step in &template.steps {
            let names_dataset = step
                .data_precondition
                .as_ref()
                .is_some_and(|dataset| !dataset.name.trim().is_empty());
            let requires_dataset =
                step.kind == StepKind::DataWait || step.data_precondition.is_some();
            if requires_dataset && !names_dataset {
                return Err(ValidationError::MissingDataset(step.id.clone()));
            }

            if step.timeout_secs == Some(0) {
                return Err(ValidationError::ZeroStepTimeout(step.id.clone()));
            }

            if let Some(policy) = &step.retry_policy {
                policy
                    .validate()
                    .map_err(|reason| ValidationError::InvalidRetryPolicy {
                        step: step.id.clone(),
                        reason,
                    })?;
            }

            validate_action_payload(&step.action).map_err(|reason| {
                ValidationError::MalformedAction {
                    step: step.id.clone(),
                    reason,
                }
            })?;
        }

        if let Some(policy) = &template.default_retry_policy {
            policy
                .validate()
                .map_err(|reason| ValidationError::InvalidRetryPolicy {
                    step: "<runbook default>".to_string(),
                    reason,
                })?;
        }

        if template.global_timeout_secs == Some(0) {
            return Err(ValidationError::ZeroGlobalTimeout {
                runbook_id: template.id,
            });
        }

        if let Some(cycle) = find_cycle(&template.steps, &index) {
            return Err(ValidationError::CycleDetected { cycle });
        }

        Ok(Self {
            name: template.name.unwrap_or_else(|| template.id.clone()),
            id: template.id,
            description: template.description,
            version: template.version,
            owner: template.owner,
            default_retry_policy: template.default_retry_policy,
            global_timeout: template.global_timeout_secs.map(Duration::from_secs),
            max_parallel_steps: template.max_parallel_steps,
            steps: template.steps,
            index,
            dependents,
        })
    }

    /// Steps in definition order
    pub fn steps(&self) -> &[StepSpec] {
        &self.steps
    }

    pub fn step(&self, id: &str) -> Option<&StepSpec> {
        self.index.get(id).map(|&position| &self.steps[position])
    }

    pub fn contains_step(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Steps that list `id` as a dependency
    pub fn dependents_of(&self, id: &str) -> &[String] {
        self.dependents.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Group steps into layers where every step only depends on earlier layers
    pub fn execution_layers(&self) -> Vec<Vec<&StepSpec>> {
        let mut remaining: HashMap<&str, usize> = self
            .steps
            .iter()
            .map(|step| (step.id.as_str(), step.dependencies.len()))
            .collect();
        let mut layers = Vec::new();

        while !remaining.is_empty() {
            let layer: Vec<&StepSpec> = self
                .steps
                .iter()
                .filter(|step| remaining.get(step.id.as_str()) == Some(&0))
                .collect();
            if layer.is_empty() {
                // Unreachable for a loaded definition
                break;
            }
            for step in &layer {
                remaining.remove(step.id.as_str());
                for dependent in self.dependents_of(&step.id) {
                    if let Some(count) = remaining.get_mut(dependent.as_str()) {
                        *count -= 1;
                    }
                }
            }
            layers.push(layer);
        }

        layers
    }
}

/// Depth-first search returning the first cycle found, closed on its starting step
fn find_cycle(steps: &[StepSpec], index: &HashMap<String, usize>) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    fn visit(
        position: usize,
        steps: &[StepSpec],
        index: &HashMap<String, usize>,
        marks: &mut [Mark],
        path: &mut Vec<usize>,
    ) -> Option<Vec<String>> {
        marks[position] = Mark::InProgress;
        path.push(position);

        for dependency in &steps[position].dependencies {
            let next = index[dependency];
            match marks[next] {
                Mark::InProgress => {
                    let start = path.iter().position(|&p| p == next).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(|&p| steps[p].id.clone()).collect();
                    cycle.push(steps[next].id.clone());
                    return Some(cycle);
                }
                Mark::Unvisited => {
                    if let Some(cycle) = visit(next, steps, index, marks, path) {
                        return Some(cycle);
                    }
                }
                Mark::Done => {}
            }
        }

        path.pop();
        marks[position] = Mark::Done;
        None
    }

    let mut marks = vec![Mark::Unvisited; steps.len()];
    let mut path = Vec::new();
    for position in 0..steps.len() {
        if marks[position] == Mark::Unvisited {
            if let Some(cycle) = visit(position, steps, index, &mut marks, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}

/// Ids referenced by more than one step, used by the validator CLI report
pub fn shared_dependencies(definition: &RunbookDefinition) -> HashSet<&str> {
    definition
        .steps()
        .iter()
        .map(|step| step.id.as_str())
        .filter(|id| definition.dependents_of(id).len() > 1)
        .collect()
}
