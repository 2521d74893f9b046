//! Shared application state: the in-memory task registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use codeloop::core::task::{Task, TaskStatus};
use codeloop::io::config::EngineConfig;
use codeloop::worker::TaskHandle;

/// One submitted instruction and its completion handle.
pub struct TaskEntry {
    pub instruction: String,
    state: TaskState,
}

enum TaskState {
    Running(TaskHandle),
    Finished(Task),
}

impl TaskEntry {
    pub fn new(instruction: String, handle: TaskHandle) -> Self {
        Self {
            instruction,
            state: TaskState::Running(handle),
        }
    }

    /// Latest known state; polls the handle and caches the terminal task.
    pub fn poll(&mut self) -> Option<&Task> {
        let finished = match &mut self.state {
            TaskState::Running(handle) => handle.try_wait().cloned(),
            TaskState::Finished(_) => None,
        };
        if let Some(task) = finished {
            self.state = TaskState::Finished(task);
        }
        match &self.state {
            TaskState::Finished(task) => Some(task),
            TaskState::Running(_) => None,
        }
    }

    /// Status for listings; `Running` until the worker reports a terminal task.
    pub fn status(&mut self) -> TaskStatus {
        match self.poll() {
            Some(task) => task.status,
            None => TaskStatus::Running,
        }
    }

    pub fn cancel(&self) {
        if let TaskState::Running(handle) = &self.state {
            handle.cancel();
        }
    }
}

/// Row in the task listing.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
    pub id: u64,
    pub instruction: String,
    pub status: TaskStatus,
}

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Immutable engine configuration applied to every submitted task.
    pub config: EngineConfig,
    tasks: Arc<Mutex<HashMap<u64, TaskEntry>>>,
    next_id: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Register a spawned task and return its id (ids start at 1).
    pub fn insert(&self, instruction: String, handle: TaskHandle) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.lock_tasks()
            .insert(id, TaskEntry::new(instruction, handle));
        id
    }

    /// Run `f` against the entry for `id`, if it exists.
    pub fn with_entry<R>(&self, id: u64, f: impl FnOnce(&mut TaskEntry) -> R) -> Option<R> {
        let mut tasks = self.lock_tasks();
        tasks.get_mut(&id).map(f)
    }

    /// Snapshot of all tasks, ordered by id.
    pub fn summaries(&self) -> Vec<TaskSummary> {
        let mut tasks = self.lock_tasks();
        let mut rows: Vec<TaskSummary> = tasks
            .iter_mut()
            .map(|(id, entry)| TaskSummary {
                id: *id,
                instruction: entry.instruction.clone(),
                status: entry.status(),
            })
            .collect();
        rows.sort_by_key(|row| row.id);
        rows
    }

    fn lock_tasks(&self) -> MutexGuard<'_, HashMap<u64, TaskEntry>> {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
