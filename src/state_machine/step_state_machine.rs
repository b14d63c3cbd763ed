use super::{
    errors::{StateMachineError, StateMachineResult},
    events::StepEvent,
    states::StepStatus,
};

/// Determine the target state for a step given its current state and an event.
///
/// Terminal states admit no transitions; a late event for a finished step is an
/// error the caller is expected to discard.
pub fn determine_target_state(
    step_id: &str,
    current_state: StepStatus,
    event: &StepEvent,
) -> StateMachineResult<StepStatus> {
    let target = match (current_state, event) {
        // Readiness
        (StepStatus::Pending, StepEvent::MarkReady) => StepStatus::Ready,
        (StepStatus::Waiting, StepEvent::MarkReady) => StepStatus::Ready,

        // Dispatch
        (StepStatus::Ready, StepEvent::Start) => StepStatus::Running,

        // Attempt results
        (StepStatus::Running, StepEvent::Succeed) => StepStatus::Succeeded,
        (StepStatus::Running, StepEvent::ScheduleRetry { .. }) => StepStatus::Waiting,
        (StepStatus::Running, StepEvent::Fail(_)) => StepStatus::Failed,

        // Skips apply to anything not yet finished
        (from, StepEvent::Skip(_)) if !from.is_terminal() => StepStatus::Skipped,

        (from_state, _) => {
            return Err(StateMachineError::InvalidTransition {
                step_id: step_id.to_string(),
                from: from_state.to_string(),
                event: event.event_type().to_string(),
            })
        }
    };

    Ok(target)
}

/// Check whether an event is accepted in the given state without building an error
pub fn can_transition(current_state: StepStatus, event: &StepEvent) -> bool {
    determine_target_state("", current_state, event).is_ok()
}
