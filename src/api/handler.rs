use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::models::*;
use crate::error::{AppError, AppResult};
use crate::scheduler::state::{RunState, StatusBoard, TaskStatus};
use crate::scheduler::Scheduler;
use crate::tasks::TaskFile;

#[derive(Clone)]
pub struct AppState {
    pub board: Arc<StatusBoard>,
    pub tasks: Arc<Vec<TaskView>>,
    /// Where operator toggles are written back, if anywhere
    pub task_file: Option<Arc<TaskFile>>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(scheduler: &Scheduler, task_file: Option<TaskFile>) -> Self {
        Self {
            board: scheduler.board(),
            tasks: Arc::new(
                scheduler
                    .tasks()
                    .iter()
                    .map(|task| TaskView::from(&task.spec))
                    .collect(),
            ),
            task_file: task_file.map(Arc::new),
            started_at: Utc::now(),
        }
    }
}

/// GET /
pub async fn root() -> &'static str {
    "🟢 Unlock bot is running."
}

/// GET /status - run state of every task
pub async fn get_status(State(state): State<AppState>) -> Json<BTreeMap<String, RunState>> {
    Json(state.board.snapshot())
}

/// GET /status/:name
pub async fn get_task_status(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<Json<RunState>> {
    state
        .board
        .get(&name)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("task '{}'", name)))
}

/// GET /tasks - configured tasks, secrets redacted
pub async fn list_tasks(State(state): State<AppState>) -> Json<Vec<TaskView>> {
    let views = state
        .tasks
        .iter()
        .cloned()
        .map(|mut view| {
            view.enabled = state.board.is_enabled(&view.name);
            view
        })
        .collect();
    Json(views)
}

/// PUT /tasks/:name/enabled
pub async fn set_task_enabled(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<EnabledRequest>,
) -> AppResult<Json<RunState>> {
    if !state.board.set_enabled(&name, request.enabled) {
        return Err(AppError::NotFound(format!("task '{}'", name)));
    }

    info!(
        "{} [{}] {} by operator",
        if request.enabled { "▶️ " } else { "⏸️ " },
        name,
        if request.enabled { "enabled" } else { "disabled" }
    );

    if let Some(file) = &state.task_file {
        // the in-memory toggle already applies; the file only matters on restart
        if let Err(e) = file.set_enabled(&name, request.enabled) {
            warn!("⚠️  Failed to save task file: {}", e);
        }
    }

    state
        .board
        .get(&name)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("task '{}'", name)))
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let snapshot = state.board.snapshot();
    let failed = snapshot
        .values()
        .filter(|run| run.status == TaskStatus::Failed)
        .count();

    let now = Utc::now();
    Json(HealthResponse {
        status: if failed == 0 {
            "healthy".to_string()
        } else {
            "degraded".to_string()
        },
        timestamp: now,
        tasks: snapshot.len(),
        failed,
        uptime_secs: (now - state.started_at).num_seconds(),
    })
}
