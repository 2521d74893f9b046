//! Worker-thread execution with an awaitable completion handle.
//!
//! The engine loop is synchronous; this module decouples it from whatever
//! concurrency model the caller uses. The engine is constructed and run on a
//! dedicated thread and the caller holds a [`TaskHandle`] it can block on,
//! poll, or cancel.

use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;

use tracing::{error, warn};

use crate::cancel::CancelToken;
use crate::core::task::{FailureReason, Task, TaskStatus};
use crate::engine::WorkflowEngine;
use crate::io::generator::CodeGenerator;
use crate::io::sandbox::SandboxExecutor;

/// Completion signal for a spawned task.
pub struct TaskHandle {
    cancel: CancelToken,
    rx: Receiver<Task>,
    instruction: String,
    finished: Option<Task>,
}

/// Run the engine for `instruction` on a dedicated thread.
///
/// `factory` builds the engine on the worker thread itself, so adapters that
/// must not live inside an async runtime (blocking HTTP clients) are created
/// and dropped entirely off it. A factory error is reported as a failed task
/// rather than a panic.
pub fn spawn<G, S, F>(factory: F, instruction: String) -> TaskHandle
where
    G: CodeGenerator + Send + 'static,
    S: SandboxExecutor + Send + 'static,
    F: FnOnce() -> anyhow::Result<WorkflowEngine<G, S>> + Send + 'static,
{
    let cancel = CancelToken::new();
    let (tx, rx) = mpsc::channel();
    let worker_cancel = cancel.clone();
    let worker_instruction = instruction.clone();
    thread::spawn(move || {
        let task = match factory() {
            Ok(engine) => engine.run(&worker_instruction, &worker_cancel),
            Err(err) => {
                error!(err = %err, "engine construction failed");
                init_failed_task(&worker_instruction, &err)
            }
        };
        // The receiver may be gone if the caller dropped the handle.
        let _ = tx.send(task);
    });
    TaskHandle {
        cancel,
        rx,
        instruction,
        finished: None,
    }
}

impl TaskHandle {
    /// Request cancellation; the engine aborts at its next suspension point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Block until the task reaches a terminal state.
    pub fn wait(mut self) -> Task {
        if let Some(task) = self.finished.take() {
            return task;
        }
        match self.rx.recv() {
            Ok(task) => task,
            Err(_) => abandoned_task(&self.instruction),
        }
    }

    /// Non-blocking completion check. Returns the terminal task once it is
    /// available; repeated calls return the cached result.
    pub fn try_wait(&mut self) -> Option<&Task> {
        if self.finished.is_none() {
            match self.rx.try_recv() {
                Ok(task) => self.finished = Some(task),
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    warn!("engine worker terminated without reporting a task");
                    self.finished = Some(abandoned_task(&self.instruction));
                }
            }
        }
        self.finished.as_ref()
    }
}

fn init_failed_task(instruction: &str, err: &anyhow::Error) -> Task {
    let mut task = Task::new(instruction);
    task.transition(TaskStatus::Running);
    task.failure = Some(FailureReason::Fatal {
        message: format!("engine initialization failed: {err:#}"),
    });
    task.transition(TaskStatus::Failed);
    task
}

/// Terminal placeholder when the worker thread died before reporting.
fn abandoned_task(instruction: &str) -> Task {
    let mut task = Task::new(instruction);
    task.transition(TaskStatus::Running);
    task.transition(TaskStatus::Aborted);
    task
}
