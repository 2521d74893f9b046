//! Test-only scripted adapters for driving the engine without network or
//! child processes.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::core::types::{ExecutionOutcome, ExecutionSuccess, GeneratedCode, GenerationFailure};
use crate::io::generator::{CodeGenerator, GenerateRequest};
use crate::io::sandbox::SandboxExecutor;

/// Deterministic code payload whose body is `marker`.
pub fn sample_code(marker: &str) -> GeneratedCode {
    GeneratedCode {
        task_description: "scripted solution".to_string(),
        imports: String::new(),
        code: marker.to_string(),
    }
}

/// Successful execution outcome with the given stdout.
pub fn success_outcome(stdout: &str) -> ExecutionOutcome {
    ExecutionOutcome::Success(ExecutionSuccess {
        stdout: stdout.to_string(),
        value: None,
    })
}

/// Owned copy of one generation request, for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub instruction: String,
    pub feedback: Option<String>,
    pub history_len: usize,
}

enum Refinement {
    Identity,
    Refined(String),
    Failing(String),
}

/// Generator that replays scripted results and records every request.
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<Result<GeneratedCode, GenerationFailure>>>,
    fallback: Option<Result<GeneratedCode, GenerationFailure>>,
    refinement: Refinement,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedGenerator {
    /// Replay `script` in order; further calls fail as exhausted.
    pub fn new(script: Vec<Result<GeneratedCode, GenerationFailure>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            refinement: Refinement::Identity,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Return `result` on every call.
    pub fn repeating(result: Result<GeneratedCode, GenerationFailure>) -> Self {
        let mut generator = Self::new(Vec::new());
        generator.fallback = Some(result);
        generator
    }

    /// Replay `script`, then fall back to `fallback` forever.
    pub fn with_fallback(
        script: Vec<Result<GeneratedCode, GenerationFailure>>,
        fallback: Result<GeneratedCode, GenerationFailure>,
    ) -> Self {
        let mut generator = Self::new(script);
        generator.fallback = Some(fallback);
        generator
    }

    /// Make `refine` return `refined` instead of the raw instruction.
    pub fn with_refinement(mut self, refined: &str) -> Self {
        self.refinement = Refinement::Refined(refined.to_string());
        self
    }

    /// Make `refine` fail with a malformed-response error.
    pub fn with_failing_refinement(mut self, message: &str) -> Self {
        self.refinement = Refinement::Failing(message.to_string());
        self
    }

    /// All generation requests seen so far, in call order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl CodeGenerator for ScriptedGenerator {
    fn generate(&self, request: &GenerateRequest<'_>) -> Result<GeneratedCode, GenerationFailure> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(RecordedRequest {
                instruction: request.instruction.to_string(),
                feedback: request.feedback.map(str::to_string),
                history_len: request.history.len(),
            });
        match self.script.lock().expect("script lock").pop_front() {
            Some(result) => result,
            None => self.fallback.clone().unwrap_or_else(|| {
                Err(GenerationFailure::ServiceUnavailable(
                    "generator script exhausted".to_string(),
                ))
            }),
        }
    }

    fn refine(&self, instruction: &str) -> Result<String, GenerationFailure> {
        match &self.refinement {
            Refinement::Identity => Ok(instruction.to_string()),
            Refinement::Refined(refined) => Ok(refined.clone()),
            Refinement::Failing(message) => {
                Err(GenerationFailure::MalformedResponse(message.clone()))
            }
        }
    }
}

/// Sandbox that replays scripted outcomes and records every executed script.
pub struct ScriptedSandbox {
    script: Mutex<VecDeque<ExecutionOutcome>>,
    fallback: Option<ExecutionOutcome>,
    executions: Mutex<Vec<String>>,
}

impl ScriptedSandbox {
    /// Replay `script` in order; further calls report an infra error.
    pub fn new(script: Vec<ExecutionOutcome>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            executions: Mutex::new(Vec::new()),
        }
    }

    /// Return `outcome` on every call.
    pub fn repeating(outcome: ExecutionOutcome) -> Self {
        let mut sandbox = Self::new(Vec::new());
        sandbox.fallback = Some(outcome);
        sandbox
    }

    /// Replay `script`, then fall back to `fallback` forever.
    pub fn with_fallback(script: Vec<ExecutionOutcome>, fallback: ExecutionOutcome) -> Self {
        let mut sandbox = Self::new(script);
        sandbox.fallback = Some(fallback);
        sandbox
    }

    /// Full source of every executed script, in call order.
    pub fn executions(&self) -> Vec<String> {
        self.executions.lock().expect("executions lock").clone()
    }
}

impl SandboxExecutor for ScriptedSandbox {
    fn execute(&self, code: &str, _timeout: Duration, _cancel: &CancelToken) -> ExecutionOutcome {
        self.executions
            .lock()
            .expect("executions lock")
            .push(code.to_string());
        match self.script.lock().expect("script lock").pop_front() {
            Some(outcome) => outcome,
            None => self.fallback.clone().unwrap_or_else(|| {
                ExecutionOutcome::SandboxInfraError {
                    message: "sandbox script exhausted".to_string(),
                }
            }),
        }
    }
}
