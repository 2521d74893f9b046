//! Task state: one instruction's accumulated attempt history.

use serde::{Deserialize, Serialize};

use crate::core::types::{ExecutionOutcome, ExecutionSuccess, GeneratedCode};

/// Lifecycle states for a task.
///
/// `Succeeded`, `Failed`, and `Aborted` are terminal: once reached, the
/// status never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Aborted,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Aborted
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Aborted => "aborted",
        };
        f.write_str(label)
    }
}

/// One generation+execution cycle.
///
/// Written by the engine during the iteration that produced it and never
/// mutated afterwards. Exactly one of `generated_code` and
/// `generation_failure` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based position within the task.
    pub index: u32,
    /// Code produced by this attempt's generation call, absent when generation failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_code: Option<GeneratedCode>,
    /// Generation failure text when no code was produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_failure: Option<String>,
    pub execution_outcome: ExecutionOutcome,
    /// Failure text from the previous attempt that was fed into this
    /// attempt's generation call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback_consumed: Option<String>,
}

/// Why a task ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The attempt cap was reached without a successful execution. Reported,
    /// never silently truncated.
    ExhaustedRetries { attempts: u32 },
    /// A failure retrying cannot fix (sandbox infrastructure, policy).
    Fatal { message: String },
}

/// Generated code plus the execution result that made the task succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalOutput {
    pub code: GeneratedCode,
    pub result: ExecutionSuccess,
}

/// One end-to-end request: an immutable instruction plus its append-only
/// attempt history and terminal result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub instruction: String,
    /// Refined instruction from the optional pre-loop rewrite, when it succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refined_instruction: Option<String>,
    pub attempts: Vec<AttemptRecord>,
    pub status: TaskStatus,
    /// Present exactly when `status` is `Succeeded`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_output: Option<FinalOutput>,
    /// Present exactly when `status` is `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    /// Wall-clock time of the whole run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl Task {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            refined_instruction: None,
            attempts: Vec::new(),
            status: TaskStatus::Pending,
            final_output: None,
            failure: None,
            duration_ms: None,
        }
    }

    /// Instruction the generator works from: the refined text when the
    /// pre-loop rewrite produced one, the raw input otherwise.
    pub fn effective_instruction(&self) -> &str {
        self.refined_instruction
            .as_deref()
            .unwrap_or(&self.instruction)
    }

    /// Move to `next`. Transitions out of a terminal state are ignored, which
    /// keeps the status monotonic no matter how callers sequence events.
    pub fn transition(&mut self, next: TaskStatus) {
        if self.status.is_terminal() {
            return;
        }
        self.status = next;
    }
}
