//! Retry decision: continue the loop or stop with a typed reason.

use crate::core::classifier::ClassifiedOutcome;

/// Why the loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Success,
    /// Attempt cap reached without success.
    Exhausted,
    Fatal { message: String },
}

/// Verdict for the next loop iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextAction {
    Stop(StopReason),
    /// Run another attempt; `feedback` must be consumed by its generation call.
    Continue { feedback: String },
}

/// Decide what the engine does after classifying an attempt.
///
/// `attempts_made` counts the records already appended to the task. A fatal
/// outcome short-circuits regardless of remaining budget, and no delay is
/// inserted between attempts; rate limiting is the adapters' concern.
pub fn next_action(
    attempts_made: u32,
    max_retry_iterations: u32,
    outcome: &ClassifiedOutcome,
) -> NextAction {
    match outcome {
        ClassifiedOutcome::Success => NextAction::Stop(StopReason::Success),
        ClassifiedOutcome::Fatal { message } => NextAction::Stop(StopReason::Fatal {
            message: message.clone(),
        }),
        ClassifiedOutcome::Recoverable { feedback } => {
            if attempts_made < max_retry_iterations {
                NextAction::Continue {
                    feedback: feedback.clone(),
                }
            } else {
                NextAction::Stop(StopReason::Exhausted)
            }
        }
    }
}
