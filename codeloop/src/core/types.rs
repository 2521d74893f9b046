//! Deterministic contract types shared between the engine and its adapters.
//!
//! Failure modes are modeled as data rather than error types: the loop
//! absorbs, classifies, and displays them, it never propagates them.

use serde::{Deserialize, Serialize};

/// Structured code payload produced by one generation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedCode {
    /// Short description of the task and approach, as stated by the model.
    pub task_description: String,
    /// Import statements, newline separated, already cleaned of fences.
    pub imports: String,
    /// Executable body without import statements.
    pub code: String,
}

impl GeneratedCode {
    /// Join imports and body into the script handed to the sandbox.
    pub fn full_source(&self) -> String {
        let imports = self.imports.trim();
        let code = self.code.trim();
        if imports.is_empty() {
            code.to_string()
        } else {
            format!("{imports}\n\n{code}")
        }
    }
}

/// Why a generation call produced no usable code.
///
/// Every variant is recoverable: the loop may try again with the failure text
/// fed back as corrective context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum GenerationFailure {
    /// The model service could not be reached or answered with an error status.
    ServiceUnavailable(String),
    /// A response arrived but did not carry the required structured payload.
    MalformedResponse(String),
    /// The payload parsed but contained no extractable code.
    NoExtractableCode(String),
}

impl std::fmt::Display for GenerationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerationFailure::ServiceUnavailable(message) => {
                write!(f, "generation service unavailable: {message}")
            }
            GenerationFailure::MalformedResponse(message) => {
                write!(f, "malformed generation response: {message}")
            }
            GenerationFailure::NoExtractableCode(message) => {
                write!(f, "no extractable code in response: {message}")
            }
        }
    }
}

/// Captured output of a successful sandbox execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSuccess {
    pub stdout: String,
    /// Printable result value, when the sandbox reports one separately.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Outcome of one execution attempt.
///
/// `RuntimeError` means the generated code itself failed and needs revision.
/// `SandboxInfraError` means the execution environment failed; a different
/// program cannot change that outcome, so it ends the task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// Execution was never attempted (generation failed, or the attempt was
    /// abandoned before running).
    NotRun,
    Success(ExecutionSuccess),
    RuntimeError { message: String },
    Timeout,
    SandboxInfraError { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_source_joins_imports_and_body() {
        let code = GeneratedCode {
            task_description: "sum".to_string(),
            imports: "import math\n".to_string(),
            code: "print(math.sqrt(4))".to_string(),
        };
        assert_eq!(code.full_source(), "import math\n\nprint(math.sqrt(4))");
    }

    #[test]
    fn full_source_without_imports_is_just_the_body() {
        let code = GeneratedCode {
            task_description: "hello".to_string(),
            imports: "  ".to_string(),
            code: "print('hi')\n".to_string(),
        };
        assert_eq!(code.full_source(), "print('hi')");
    }

    #[test]
    fn execution_outcome_serializes_with_kind_tag() {
        let outcome = ExecutionOutcome::RuntimeError {
            message: "NameError".to_string(),
        };
        let json = serde_json::to_value(&outcome).expect("serialize");
        assert_eq!(json["kind"], "runtime_error");
        assert_eq!(json["message"], "NameError");
    }
}
