//! The workflow engine: a fixed state machine looping generate, execute,
//! classify until the task reaches a terminal state.

use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::core::classifier::classify;
use crate::core::retry::{NextAction, StopReason, next_action};
use crate::core::task::{AttemptRecord, FailureReason, FinalOutput, Task, TaskStatus};
use crate::core::types::{ExecutionOutcome, GeneratedCode};
use crate::io::config::EngineConfig;
use crate::io::generator::{CodeGenerator, GenerateRequest};
use crate::io::sandbox::SandboxExecutor;

/// Loop states. The full transition table lives in the single `match` inside
/// [`WorkflowEngine::run`]:
///
/// ```text
/// Generating -> Executing            (generation produced code)
/// Generating -> Classifying          (generation failed; attempt recorded)
/// Executing  -> Classifying          (outcome recorded)
/// Classifying -> Generating          (recoverable, budget remains)
/// Classifying -> terminal            (success, exhausted, or fatal)
/// any suspension point -> Aborted    (cancellation)
/// ```
#[derive(Debug)]
enum EngineState {
    Generating,
    Executing {
        code: GeneratedCode,
        consumed: Option<String>,
    },
    Classifying,
}

/// Drives one instruction through the generate-execute-classify loop.
///
/// Adapters are dependency-injected so tests can substitute deterministic
/// fakes; the engine holds no global state and no client singletons.
pub struct WorkflowEngine<G, S> {
    generator: G,
    sandbox: S,
    config: EngineConfig,
}

impl<G: CodeGenerator, S: SandboxExecutor> WorkflowEngine<G, S> {
    pub fn new(generator: G, sandbox: S, config: EngineConfig) -> Self {
        Self {
            generator,
            sandbox,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    pub fn sandbox(&self) -> &S {
        &self.sandbox
    }

    /// Run one instruction to a terminal task state.
    ///
    /// Recoverable failures never escape: the caller always receives a task
    /// whose status is `Succeeded`, `Failed`, or `Aborted`, with every
    /// attempt recorded. Attempts are strictly sequential; each one's
    /// feedback is input to the next.
    #[instrument(skip_all)]
    pub fn run(&self, instruction: &str, cancel: &CancelToken) -> Task {
        let started = Instant::now();
        let mut task = Task::new(instruction);
        task.transition(TaskStatus::Running);

        if self.config.refine_instruction {
            if cancel.is_cancelled() {
                return abort(task, started);
            }
            match self.generator.refine(instruction) {
                Ok(refined) => {
                    debug!("instruction refined");
                    task.refined_instruction = Some(refined);
                }
                Err(failure) => {
                    warn!(%failure, "instruction refinement failed, using raw instruction");
                }
            }
        }

        let mut feedback: Option<String> = None;
        let mut state = EngineState::Generating;
        loop {
            state = match state {
                EngineState::Generating => {
                    if cancel.is_cancelled() {
                        return abort(task, started);
                    }
                    let index = task.attempts.len() as u32 + 1;
                    debug!(attempt = index, "generating code");
                    let consumed = feedback.take();
                    let request = GenerateRequest {
                        instruction: task.effective_instruction(),
                        history: &task.attempts,
                        feedback: consumed.as_deref(),
                    };
                    match self.generator.generate(&request) {
                        Ok(code) => EngineState::Executing { code, consumed },
                        Err(failure) => {
                            warn!(attempt = index, %failure, "generation failed");
                            task.attempts.push(AttemptRecord {
                                index,
                                generated_code: None,
                                generation_failure: Some(failure.to_string()),
                                execution_outcome: ExecutionOutcome::NotRun,
                                feedback_consumed: consumed,
                            });
                            EngineState::Classifying
                        }
                    }
                }
                EngineState::Executing { code, consumed } => {
                    if cancel.is_cancelled() {
                        return abort(task, started);
                    }
                    let index = task.attempts.len() as u32 + 1;
                    debug!(attempt = index, "executing code in sandbox");
                    let outcome = self.sandbox.execute(
                        &code.full_source(),
                        self.config.max_code_timeout(),
                        cancel,
                    );
                    if cancel.is_cancelled() {
                        // In-flight result discarded; the attempt never
                        // reaches classification.
                        return abort(task, started);
                    }
                    task.attempts.push(AttemptRecord {
                        index,
                        generated_code: Some(code),
                        generation_failure: None,
                        execution_outcome: outcome,
                        feedback_consumed: consumed,
                    });
                    EngineState::Classifying
                }
                EngineState::Classifying => {
                    let attempt = task
                        .attempts
                        .last()
                        .expect("classifying is only entered after an attempt is recorded");
                    let outcome = classify(attempt);
                    let attempts_made = task.attempts.len() as u32;
                    match next_action(attempts_made, self.config.max_retry_iterations, &outcome) {
                        NextAction::Continue { feedback: next } => {
                            info!(attempt = attempts_made, "attempt failed, retrying");
                            feedback = Some(next);
                            EngineState::Generating
                        }
                        NextAction::Stop(StopReason::Success) => {
                            info!(attempts = attempts_made, "task succeeded");
                            return succeed(task, started);
                        }
                        NextAction::Stop(StopReason::Exhausted) => {
                            warn!(attempts = attempts_made, "retry budget exhausted");
                            task.failure = Some(FailureReason::ExhaustedRetries {
                                attempts: attempts_made,
                            });
                            task.transition(TaskStatus::Failed);
                            return finish(task, started);
                        }
                        NextAction::Stop(StopReason::Fatal { message }) => {
                            warn!(attempt = attempts_made, %message, "fatal error, stopping");
                            task.failure = Some(FailureReason::Fatal { message });
                            task.transition(TaskStatus::Failed);
                            return finish(task, started);
                        }
                    }
                }
            };
        }
    }
}

fn succeed(mut task: Task, started: Instant) -> Task {
    if let Some(last) = task.attempts.last() {
        if let (Some(code), ExecutionOutcome::Success(result)) =
            (last.generated_code.clone(), &last.execution_outcome)
        {
            task.final_output = Some(FinalOutput {
                code,
                result: result.clone(),
            });
        }
    }
    task.transition(TaskStatus::Succeeded);
    finish(task, started)
}

fn abort(mut task: Task, started: Instant) -> Task {
    warn!("task cancelled");
    task.transition(TaskStatus::Aborted);
    finish(task, started)
}

fn finish(mut task: Task, started: Instant) -> Task {
    task.duration_ms = Some(started.elapsed().as_millis() as u64);
    task
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedGenerator, ScriptedSandbox, sample_code, success_outcome};

    fn config() -> EngineConfig {
        EngineConfig {
            refine_instruction: false,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn refinement_result_is_recorded_and_used() {
        let generator = ScriptedGenerator::repeating(Ok(sample_code("print(1)")))
            .with_refinement("write a script that prints 1");
        let sandbox = ScriptedSandbox::repeating(success_outcome("1\n"));
        let engine = WorkflowEngine::new(
            generator,
            sandbox,
            EngineConfig {
                refine_instruction: true,
                ..EngineConfig::default()
            },
        );

        let task = engine.run("print one", &CancelToken::new());

        assert_eq!(task.status, TaskStatus::Succeeded);
        assert_eq!(
            task.refined_instruction.as_deref(),
            Some("write a script that prints 1")
        );
        let requests = engine.generator.requests();
        assert_eq!(requests[0].instruction, "write a script that prints 1");
        assert_eq!(task.instruction, "print one");
    }

    #[test]
    fn refinement_failure_falls_back_to_the_raw_instruction() {
        let generator = ScriptedGenerator::repeating(Ok(sample_code("print(1)")))
            .with_failing_refinement("model refused");
        let sandbox = ScriptedSandbox::repeating(success_outcome("1\n"));
        let engine = WorkflowEngine::new(
            generator,
            sandbox,
            EngineConfig {
                refine_instruction: true,
                ..EngineConfig::default()
            },
        );

        let task = engine.run("print one", &CancelToken::new());

        assert_eq!(task.status, TaskStatus::Succeeded);
        assert_eq!(task.refined_instruction, None);
        assert_eq!(engine.generator.requests()[0].instruction, "print one");
        // Refinement never consumes an attempt.
        assert_eq!(task.attempts.len(), 1);
    }

    #[test]
    fn refinement_is_skipped_when_disabled() {
        let generator = ScriptedGenerator::repeating(Ok(sample_code("print(1)")))
            .with_refinement("should not be used");
        let sandbox = ScriptedSandbox::repeating(success_outcome("1\n"));
        let engine = WorkflowEngine::new(generator, sandbox, config());

        let task = engine.run("print one", &CancelToken::new());

        assert_eq!(task.refined_instruction, None);
        assert_eq!(engine.generator.requests()[0].instruction, "print one");
    }

    #[test]
    fn duration_is_recorded_on_terminal_tasks() {
        let generator = ScriptedGenerator::repeating(Ok(sample_code("print(1)")));
        let sandbox = ScriptedSandbox::repeating(success_outcome("1\n"));
        let engine = WorkflowEngine::new(generator, sandbox, config());

        let task = engine.run("print one", &CancelToken::new());
        assert!(task.duration_ms.is_some());
    }
}
