//! Classification of a finished attempt into the three-way retry outcome.

use crate::core::task::AttemptRecord;
use crate::core::types::ExecutionOutcome;

/// Corrective feedback injected when execution ran out of wall clock.
const TIMEOUT_FEEDBACK: &str = "Your code exceeded the execution time limit and was terminated. \
Optimize for performance or simplify the approach.";

/// Three-way outcome of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifiedOutcome {
    Success,
    /// The failure is attributable to a correctable cause. `feedback` is the
    /// text the next generation call must consume.
    Recoverable { feedback: String },
    /// Retrying with different code cannot change the outcome.
    Fatal { message: String },
}

/// Map a finished attempt to its outcome class.
///
/// Pure: no state is carried between calls, and identical inputs always
/// yield identical outcomes.
pub fn classify(attempt: &AttemptRecord) -> ClassifiedOutcome {
    if let Some(failure) = &attempt.generation_failure {
        return ClassifiedOutcome::Recoverable {
            feedback: format!("The previous generation attempt failed: {failure}"),
        };
    }

    match &attempt.execution_outcome {
        ExecutionOutcome::Success(_) => ClassifiedOutcome::Success,
        ExecutionOutcome::RuntimeError { message } => ClassifiedOutcome::Recoverable {
            feedback: format!("Your code failed to execute. Error:\n{message}"),
        },
        ExecutionOutcome::Timeout => ClassifiedOutcome::Recoverable {
            feedback: TIMEOUT_FEEDBACK.to_string(),
        },
        ExecutionOutcome::SandboxInfraError { message } => ClassifiedOutcome::Fatal {
            message: message.clone(),
        },
        // Unreachable from the engine: generation succeeded but execution was
        // never attempted. Mapped to fatal so the loop cannot spin on it.
        ExecutionOutcome::NotRun => ClassifiedOutcome::Fatal {
            message: "execution was not attempted".to_string(),
        },
    }
}
