//! HTTP route handlers for the task API.

use axum::Router;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};

use codeloop::core::task::{Task, TaskStatus};
use codeloop::engine::WorkflowEngine;
use codeloop::io::config::{EngineConfig, SandboxBackend};
use codeloop::io::generator::OpenAiGenerator;
use codeloop::io::sandbox::{LocalProcessExecutor, SandboxServiceExecutor};
use codeloop::worker::{self, TaskHandle};

use crate::state::{AppState, TaskEntry, TaskSummary};

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/tasks", post(submit_task).get(list_tasks))
        .route("/tasks/{id}", get(get_task))
        .route("/tasks/{id}/cancel", post(cancel_task))
        .route("/tasks/{id}/code", get(download_code))
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Deserialize)]
struct SubmitRequest {
    instruction: String,
}

#[derive(Serialize)]
struct SubmitResponse {
    id: u64,
}

/// POST /api/tasks - start a task for an instruction.
async fn submit_task(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, StatusCode> {
    let instruction = request.instruction.trim().to_string();
    if instruction.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let handle = spawn_engine(state.config.clone(), instruction.clone());
    let id = state.insert(instruction, handle);
    Ok(Json(SubmitResponse { id }))
}

/// Spawn the engine on a worker thread.
///
/// Adapters are constructed inside the worker: the blocking HTTP clients must
/// never live on the async runtime. Construction failures surface as a failed
/// task, visible through the normal status endpoints.
fn spawn_engine(config: EngineConfig, instruction: String) -> TaskHandle {
    match config.sandbox.backend {
        SandboxBackend::Service => worker::spawn(
            move || {
                let generator = OpenAiGenerator::new(
                    config.primary_model_name.clone(),
                    config.generator.clone(),
                )?;
                let sandbox = SandboxServiceExecutor::new(config.sandbox.clone())?;
                Ok(WorkflowEngine::new(generator, sandbox, config))
            },
            instruction,
        ),
        SandboxBackend::Local => worker::spawn(
            move || {
                let generator = OpenAiGenerator::new(
                    config.primary_model_name.clone(),
                    config.generator.clone(),
                )?;
                let sandbox =
                    LocalProcessExecutor::new(&config.sandbox, config.allow_local_execution);
                Ok(WorkflowEngine::new(generator, sandbox, config))
            },
            instruction,
        ),
    }
}

#[derive(Serialize)]
struct TasksResponse {
    tasks: Vec<TaskSummary>,
}

/// GET /api/tasks - list all tasks with their current status.
async fn list_tasks(State(state): State<AppState>) -> Json<TasksResponse> {
    Json(TasksResponse {
        tasks: state.summaries(),
    })
}

#[derive(Serialize)]
struct TaskView {
    id: u64,
    instruction: String,
    status: TaskStatus,
    /// Full task state (attempt history, final output, failure reason).
    /// Populated once the task is terminal.
    #[serde(skip_serializing_if = "Option::is_none")]
    task: Option<Task>,
}

impl TaskView {
    fn from_entry(id: u64, entry: &mut TaskEntry) -> Self {
        let instruction = entry.instruction.clone();
        match entry.poll() {
            Some(task) => Self {
                id,
                instruction,
                status: task.status,
                task: Some(task.clone()),
            },
            None => Self {
                id,
                instruction,
                status: TaskStatus::Running,
                task: None,
            },
        }
    }
}

/// GET /api/tasks/:id - current state of one task.
async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<TaskView>, StatusCode> {
    state
        .with_entry(id, |entry| TaskView::from_entry(id, entry))
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// POST /api/tasks/:id/cancel - request cancellation of a running task.
async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<StatusCode, StatusCode> {
    state
        .with_entry(id, |entry| entry.cancel())
        .map(|()| StatusCode::NO_CONTENT)
        .ok_or(StatusCode::NOT_FOUND)
}

/// GET /api/tasks/:id/code - download the final script of a succeeded task.
async fn download_code(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, StatusCode> {
    let source = state
        .with_entry(id, |entry| {
            entry.poll().and_then(|task| {
                task.final_output
                    .as_ref()
                    .map(|output| output.code.full_source())
            })
        })
        .ok_or(StatusCode::NOT_FOUND)?
        // No final output yet (still running, failed, or aborted).
        .ok_or(StatusCode::CONFLICT)?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/x-python"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"generated.py\"",
            ),
        ],
        source,
    ))
}
