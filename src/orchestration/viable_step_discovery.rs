//! # Viable Step Discovery
//!
//! Pure readiness analysis over a runbook definition and the current step states.
//! The orchestrator loop calls these on every iteration; none of them mutate.
//!
//! A dependency edge is satisfied when the upstream step Succeeded, or ended
//! Skipped while marked optional. It can never be satisfied once the upstream step
//! Failed, or was Skipped without being optional.

use crate::models::run_instance::StepState;
use crate::models::runbook::{RunbookDefinition, StepSpec};
use crate::state_machine::states::StepStatus;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// A Pending step that can never start, with the dependency responsible
#[derive(Debug, Clone, PartialEq)]
pub struct BlockedStep<'a> {
    pub step: &'a StepSpec,
    pub blocking_dependency: &'a str,
}

fn status_of(steps: &BTreeMap<String, StepState>, id: &str) -> StepStatus {
    steps.get(id).map(|state| state.status).unwrap_or_default()
}

fn dependency_satisfied(
    definition: &RunbookDefinition,
    steps: &BTreeMap<String, StepState>,
    dependency: &str,
) -> bool {
    let optional = definition.step(dependency).is_some_and(|spec| spec.optional);
    status_of(steps, dependency).satisfies_dependencies(optional)
}

fn dependency_blocks(
    definition: &RunbookDefinition,
    steps: &BTreeMap<String, StepState>,
    dependency: &str,
) -> bool {
    let optional = definition.step(dependency).is_some_and(|spec| spec.optional);
    status_of(steps, dependency).blocks_dependents(optional)
}

/// Pending steps whose dependencies are all satisfied, in definition order
pub fn topological_ready<'a>(
    definition: &'a RunbookDefinition,
    steps: &BTreeMap<String, StepState>,
) -> Vec<&'a StepSpec> {
    definition
        .steps()
        .iter()
        .filter(|spec| status_of(steps, &spec.id) == StepStatus::Pending)
        .filter(|spec| {
            spec.dependencies
                .iter()
                .all(|dependency| dependency_satisfied(definition, steps, dependency))
        })
        .collect()
}

/// Pending steps with a dependency that can no longer succeed
pub fn blocked_steps<'a>(
    definition: &'a RunbookDefinition,
    steps: &BTreeMap<String, StepState>,
) -> Vec<BlockedStep<'a>> {
    definition
        .steps()
        .iter()
        .filter(|spec| status_of(steps, &spec.id) == StepStatus::Pending)
        .filter_map(|spec| {
            spec.dependencies
                .iter()
                .find(|dependency| dependency_blocks(definition, steps, dependency))
                .map(|dependency| BlockedStep {
                    step: spec,
                    blocking_dependency: dependency.as_str(),
                })
        })
        .collect()
}

/// Waiting steps whose backoff has elapsed
pub fn eligible_retries<'a>(
    definition: &'a RunbookDefinition,
    steps: &BTreeMap<String, StepState>,
    now: DateTime<Utc>,
) -> Vec<&'a StepSpec> {
    definition
        .steps()
        .iter()
        .filter(|spec| {
            steps.get(&spec.id).is_some_and(|state| {
                state.status == StepStatus::Waiting && state.is_eligible_at(now)
            })
        })
        .collect()
}

/// Earliest instant a Waiting step becomes eligible again
pub fn earliest_wakeup(steps: &BTreeMap<String, StepState>) -> Option<DateTime<Utc>> {
    steps
        .values()
        .filter(|state| state.status == StepStatus::Waiting)
        .filter_map(|state| state.next_eligible_at)
        .min()
}

/// Ready steps in definition order
pub fn ready_steps<'a>(
    definition: &'a RunbookDefinition,
    steps: &BTreeMap<String, StepState>,
) -> Vec<&'a StepSpec> {
    definition
        .steps()
        .iter()
        .filter(|spec| status_of(steps, &spec.id) == StepStatus::Ready)
        .collect()
}

pub fn running_count(steps: &BTreeMap<String, StepState>) -> usize {
    steps
        .values()
        .filter(|state| state.status == StepStatus::Running)
        .count()
}
