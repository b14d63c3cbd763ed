mod common;

use common::strategies::*;
use common::{custom_step, load, Harness, RecordingHandler};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use runbook_orchestrator::models::{
    RetryPolicy, RunInstance, RunRequest, RunbookDefinition, RunbookTemplate, ValidationError,
};
use runbook_orchestrator::orchestration::backoff_calculator::{apply_jitter, compute_delay};
use runbook_orchestrator::orchestration::viable_step_discovery::{
    blocked_steps, topological_ready,
};
use runbook_orchestrator::orchestration::StepOutcome;
use runbook_orchestrator::state_machine::StepStatus;

proptest! {
    /// Property: readiness never returns a step with an unsatisfied dependency
    #[test]
    fn ready_steps_have_satisfied_dependencies(
        template in dag_template_strategy(),
        statuses in prop::collection::vec(step_status_strategy(), 12),
    ) {
        let definition = RunbookDefinition::load(template).unwrap();
        let mut run = RunInstance::new(&definition, RunRequest::default(), chrono::Utc::now());
        for (index, state) in run.steps.values_mut().enumerate() {
            state.status = statuses[index];
        }

        for step in topological_ready(&definition, &run.steps) {
            prop_assert_eq!(run.step_status(&step.id), Some(StepStatus::Pending));
            for dependency in &step.dependencies {
                let status = run.step_status(dependency).unwrap();
                prop_assert!(status.is_terminal(), "{} depends on non-terminal {}", step.id, dependency);
                let optional = definition.step(dependency).unwrap().optional;
                prop_assert!(status.satisfies_dependencies(optional));
            }
        }

        // a step is never both ready and blocked
        let ready = topological_ready(&definition, &run.steps)
            .into_iter()
            .map(|step| step.id.clone())
            .collect::<Vec<_>>();
        for blocked in blocked_steps(&definition, &run.steps) {
            prop_assert!(!ready.contains(&blocked.step.id));
        }
    }

    /// Property: generated acyclic graphs load and layer every step exactly once
    #[test]
    fn acyclic_graphs_layer_every_step(template in dag_template_strategy()) {
        let step_count = template.steps.len();
        let definition = RunbookDefinition::load(template).unwrap();
        let layered: usize = definition.execution_layers().iter().map(Vec::len).sum();
        prop_assert_eq!(layered, step_count);
    }

    /// Property: cyclic graphs are rejected naming the cycle
    #[test]
    fn cyclic_graphs_are_rejected(template in cyclic_template_strategy()) {
        match RunbookDefinition::load(template) {
            Err(ValidationError::CycleDetected { cycle }) => prop_assert!(cycle.len() >= 2),
            other => prop_assert!(false, "expected CycleDetected, got {:?}", other),
        }
    }

    /// Property: backoff delays never decrease and never exceed the cap
    #[test]
    fn backoff_is_monotonic_and_capped(policy in retry_policy_strategy()) {
        let mut previous = compute_delay(1, &policy);
        prop_assert!(previous <= policy.max_backoff());
        for attempt in 2..24 {
            let delay = compute_delay(attempt, &policy);
            prop_assert!(delay >= previous);
            prop_assert!(delay <= policy.max_backoff());
            previous = delay;
        }
    }

    /// Property: jitter stays within 20% of the delay and under the cap
    #[test]
    fn jitter_is_bounded(policy in retry_policy_strategy(), attempt in 1u32..10, seed in any::<u64>()) {
        let mut rng = StdRng::seed_from_u64(seed);
        let delay = compute_delay(attempt, &policy);
        let jittered = apply_jitter(delay, &policy, &mut rng);
        prop_assert!(jittered <= policy.max_backoff());
        prop_assert!(jittered.as_millis() as f64 >= delay.as_millis() as f64 * 0.8 - 1.0);
        prop_assert!(jittered.as_millis() as f64 <= delay.as_millis() as f64 * 1.2 + 1.0);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Property: an always-transient step is attempted exactly max_attempts times
    #[test]
    fn transient_failures_use_the_whole_budget(max_attempts in 1u32..6) {
        let attempts = tokio_test::block_on(async {
            let harness = Harness::new();
            let flaky = RecordingHandler::always(StepOutcome::transient("busy"));
            harness.register("flaky", flaky.clone());
            let definition = load(RunbookTemplate::new(
                "budget",
                vec![custom_step("step", "flaky").with_retry_policy(RetryPolicy {
                    max_attempts,
                    ..RetryPolicy::default()
                })],
            ));
            let summary = harness.run(definition).await;
            (summary.step("step").unwrap().attempts, flaky.call_count("step"))
        });
        prop_assert_eq!(attempts, (max_attempts, max_attempts as usize));
    }
}
