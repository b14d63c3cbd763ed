//! Proptest strategies for runbook graphs and retry policies.

use proptest::prelude::*;
use runbook_orchestrator::models::{RetryPolicy, RunbookTemplate, StepKind, StepSpec};
use runbook_orchestrator::state_machine::StepStatus;

pub fn step_status_strategy() -> impl Strategy<Value = StepStatus> {
    prop_oneof![
        Just(StepStatus::Pending),
        Just(StepStatus::Waiting),
        Just(StepStatus::Ready),
        Just(StepStatus::Running),
        Just(StepStatus::Succeeded),
        Just(StepStatus::Failed),
        Just(StepStatus::Skipped),
    ]
}

/// Acyclic graph: each step may only depend on steps declared before it
pub fn dag_template_strategy() -> impl Strategy<Value = RunbookTemplate> {
    (1usize..12)
        .prop_flat_map(|count| {
            let dependencies = (0..count)
                .map(|index| prop::collection::vec(any::<bool>(), index))
                .collect::<Vec<_>>();
            (dependencies, prop::collection::vec(any::<bool>(), count))
        })
        .prop_map(|(dependencies, optional)| {
            let steps = dependencies
                .into_iter()
                .enumerate()
                .map(|(index, picks)| {
                    let mut step = StepSpec::new(format!("step_{index}"), StepKind::NoOp)
                        .depends_on(
                            picks
                                .iter()
                                .enumerate()
                                .filter(|(_, picked)| **picked)
                                .map(|(dep, _)| format!("step_{dep}")),
                        );
                    step.optional = optional[index];
                    step
                })
                .collect();
            RunbookTemplate::new("generated", steps)
        })
}

/// A chain `step_0 -> ... -> step_n` closed back onto itself
pub fn cyclic_template_strategy() -> impl Strategy<Value = RunbookTemplate> {
    (2usize..8).prop_map(|count| {
        let steps = (0..count)
            .map(|index| {
                let upstream = if index == 0 { count - 1 } else { index - 1 };
                StepSpec::new(format!("step_{index}"), StepKind::NoOp)
                    .depends_on([format!("step_{upstream}")])
            })
            .collect();
        RunbookTemplate::new("cyclic", steps)
    })
}

pub fn retry_policy_strategy() -> impl Strategy<Value = RetryPolicy> {
    (1u32..10, 1u64..10_000, 1.0f64..4.0, 0u64..600_000, any::<bool>()).prop_map(
        |(max_attempts, base_backoff_ms, multiplier, extra_ms, jitter)| RetryPolicy {
            max_attempts,
            base_backoff_ms,
            multiplier,
            max_backoff_ms: base_backoff_ms + extra_ms,
            jitter,
            retry_timeouts: true,
        },
    )
}
