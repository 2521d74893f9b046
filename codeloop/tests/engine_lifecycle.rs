//! Engine-level lifecycle tests driven by scripted adapters.
//!
//! These drive `WorkflowEngine::run` end to end to verify loop bounding,
//! short-circuiting, feedback propagation, and termination behavior.

use std::time::Duration;

use codeloop::cancel::CancelToken;
use codeloop::core::task::{FailureReason, TaskStatus};
use codeloop::core::types::{ExecutionOutcome, GenerationFailure};
use codeloop::engine::WorkflowEngine;
use codeloop::io::config::{EngineConfig, SandboxConfig};
use codeloop::io::sandbox::{LocalProcessExecutor, SandboxExecutor};
use codeloop::test_support::{ScriptedGenerator, ScriptedSandbox, sample_code, success_outcome};

fn config(max_retry_iterations: u32) -> EngineConfig {
    EngineConfig {
        max_retry_iterations,
        refine_instruction: false,
        ..EngineConfig::default()
    }
}

fn runtime_error(message: &str) -> ExecutionOutcome {
    ExecutionOutcome::RuntimeError {
        message: message.to_string(),
    }
}

/// The loop never runs more than `max_retry_iterations` attempts and reports
/// exhaustion rather than truncating silently.
#[test]
fn loop_is_bounded_by_the_attempt_cap() {
    let generator = ScriptedGenerator::repeating(Ok(sample_code("x = undefined")));
    let sandbox = ScriptedSandbox::repeating(runtime_error("NameError: undefined"));
    let engine = WorkflowEngine::new(generator, sandbox, config(3));

    let task = engine.run("does not matter", &CancelToken::new());

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.attempts.len(), 3);
    assert_eq!(
        task.failure,
        Some(FailureReason::ExhaustedRetries { attempts: 3 })
    );
    assert!(task.final_output.is_none());
}

/// A sandbox infrastructure failure on the first attempt ends the task
/// immediately, regardless of the remaining budget.
#[test]
fn infra_error_short_circuits_on_the_first_attempt() {
    let generator = ScriptedGenerator::repeating(Ok(sample_code("print(1)")));
    let sandbox = ScriptedSandbox::repeating(ExecutionOutcome::SandboxInfraError {
        message: "execution service unreachable".to_string(),
    });
    let engine = WorkflowEngine::new(generator, sandbox, config(10));

    let task = engine.run("print one", &CancelToken::new());

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.attempts.len(), 1);
    match task.failure {
        Some(FailureReason::Fatal { ref message }) => {
            assert!(message.contains("execution service unreachable"));
        }
        ref other => panic!("expected fatal failure, got {other:?}"),
    }
}

/// A runtime error in attempt k is consumed as feedback by attempt k+1, both
/// in the record and in the generator's inputs.
#[test]
fn runtime_error_feedback_flows_into_the_next_attempt() {
    let generator = ScriptedGenerator::repeating(Ok(sample_code("total = totl + 1")));
    let sandbox = ScriptedSandbox::with_fallback(
        vec![runtime_error("NameError: name 'totl' is not defined")],
        success_outcome("2\n"),
    );
    let engine = WorkflowEngine::new(generator, sandbox, config(10));

    let task = engine.run("add one to total", &CancelToken::new());

    assert_eq!(task.status, TaskStatus::Succeeded);
    assert_eq!(task.attempts.len(), 2);

    assert_eq!(task.attempts[0].feedback_consumed, None);
    let consumed = task.attempts[1]
        .feedback_consumed
        .as_deref()
        .expect("second attempt consumed feedback");
    assert!(consumed.contains("NameError: name 'totl' is not defined"));

    let requests = engine_requests(&engine);
    assert_eq!(requests[0].feedback, None);
    assert_eq!(requests[1].feedback.as_deref(), Some(consumed));
    // The second call also sees the first attempt in its history.
    assert_eq!(requests[1].history_len, 1);
}

/// With success scripted for attempt 3 of a 10-attempt budget, the loop stops
/// at exactly 3 attempts.
#[test]
fn success_on_the_third_attempt_stops_the_loop() {
    let generator = ScriptedGenerator::repeating(Ok(sample_code("print(6 * 7)")));
    let sandbox = ScriptedSandbox::with_fallback(
        vec![
            runtime_error("SyntaxError: invalid syntax"),
            runtime_error("TypeError: unsupported operand"),
            success_outcome("42\n"),
        ],
        runtime_error("should never be reached"),
    );
    let engine = WorkflowEngine::new(generator, sandbox, config(10));

    let task = engine.run("print the answer", &CancelToken::new());

    assert_eq!(task.status, TaskStatus::Succeeded);
    assert_eq!(task.attempts.len(), 3);
    assert_eq!(engine_executions(&engine), 3);

    let output = task.final_output.expect("final output");
    assert_eq!(output.result.stdout, "42\n");
    assert_eq!(output.code.code, "print(6 * 7)");
}

/// A generation failure still appends an attempt record (code absent) and the
/// loop retries with the failure text as feedback.
#[test]
fn generation_failure_is_recorded_and_retried() {
    let generator = ScriptedGenerator::with_fallback(
        vec![Err(GenerationFailure::MalformedResponse(
            "no tool call in response".to_string(),
        ))],
        Ok(sample_code("print('ok')")),
    );
    let sandbox = ScriptedSandbox::repeating(success_outcome("ok\n"));
    let engine = WorkflowEngine::new(generator, sandbox, config(10));

    let task = engine.run("say ok", &CancelToken::new());

    assert_eq!(task.status, TaskStatus::Succeeded);
    assert_eq!(task.attempts.len(), 2);

    let first = &task.attempts[0];
    assert!(first.generated_code.is_none());
    assert!(
        first
            .generation_failure
            .as_deref()
            .expect("generation failure recorded")
            .contains("no tool call in response")
    );
    assert_eq!(first.execution_outcome, ExecutionOutcome::NotRun);

    // Only the successful attempt reached the sandbox.
    assert_eq!(engine_executions(&engine), 1);
    let feedback = task.attempts[1]
        .feedback_consumed
        .as_deref()
        .expect("feedback consumed");
    assert!(feedback.contains("no tool call in response"));
}

/// Timeouts are recoverable: the loop retries with corrective feedback.
#[test]
fn timeout_is_retried_with_feedback() {
    let generator = ScriptedGenerator::repeating(Ok(sample_code("while True: pass")));
    let sandbox =
        ScriptedSandbox::with_fallback(vec![ExecutionOutcome::Timeout], success_outcome("done\n"));
    let engine = WorkflowEngine::new(generator, sandbox, config(10));

    let task = engine.run("loop forever", &CancelToken::new());

    assert_eq!(task.status, TaskStatus::Succeeded);
    assert_eq!(task.attempts.len(), 2);
    assert_eq!(task.attempts[0].execution_outcome, ExecutionOutcome::Timeout);
    assert!(
        task.attempts[1]
            .feedback_consumed
            .as_deref()
            .expect("feedback consumed")
            .contains("time limit")
    );
}

/// Cancellation before the first attempt aborts without recording anything.
#[test]
fn cancellation_before_the_first_attempt_aborts_cleanly() {
    let generator = ScriptedGenerator::repeating(Ok(sample_code("print(1)")));
    let sandbox = ScriptedSandbox::repeating(success_outcome("1\n"));
    let engine = WorkflowEngine::new(generator, sandbox, config(10));

    let cancel = CancelToken::new();
    cancel.cancel();
    let task = engine.run("print one", &cancel);

    assert_eq!(task.status, TaskStatus::Aborted);
    assert!(task.attempts.is_empty());
    assert!(task.final_output.is_none());
    assert!(task.failure.is_none());
}

/// With local execution disallowed, the local backend refuses up front and
/// the engine reports a fatal failure after a single attempt.
#[test]
fn local_execution_policy_violation_is_fatal() {
    let generator = ScriptedGenerator::repeating(Ok(sample_code("print(1)")));
    let sandbox_config = SandboxConfig::default();
    let sandbox = LocalProcessExecutor::new(&sandbox_config, false);
    let engine = WorkflowEngine::new(generator, sandbox, config(10));

    let task = engine.run("print one", &CancelToken::new());

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.attempts.len(), 1);
    match task.failure {
        Some(FailureReason::Fatal { ref message }) => {
            assert!(message.contains("disabled by policy"));
        }
        ref other => panic!("expected fatal failure, got {other:?}"),
    }
}

/// The policy refusal itself is immediate and runs nothing.
#[test]
fn disallowed_local_executor_yields_infra_error_directly() {
    let sandbox_config = SandboxConfig::default();
    let executor = LocalProcessExecutor::new(&sandbox_config, false);
    let outcome = executor.execute("print(1)", Duration::from_secs(5), &CancelToken::new());
    assert!(matches!(
        outcome,
        ExecutionOutcome::SandboxInfraError { .. }
    ));
}

fn engine_requests(
    engine: &WorkflowEngine<ScriptedGenerator, ScriptedSandbox>,
) -> Vec<codeloop::test_support::RecordedRequest> {
    engine.generator().requests()
}

fn engine_executions(engine: &WorkflowEngine<ScriptedGenerator, ScriptedSandbox>) -> usize {
    engine.sandbox().executions().len()
}
