//! Request handlers for the task routes.

use std::fmt::Write as _;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::{AppState, ENDPOINTS};
use crate::error::{Error, Result};
use crate::model::{TaskId, TaskKind};

/// Query parameters every task route carries.
#[derive(Debug, Default, Deserialize)]
pub struct WorkspaceQuery {
    #[serde(default)]
    pub api_key: String,
    pub workspace_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTask {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

pub async fn index() -> String {
    let mut out = String::from("gx-dispatch endpoints:\n\n");
    for (method, path, about) in ENDPOINTS {
        let _ = writeln!(out, "  {method:<7}{path:<14}{about}");
    }
    out.push_str("\nAll task routes take ?api_key=...&workspace_id=...\n");
    out
}

pub async fn stats(State(state): State<AppState>) -> Json<Value> {
    let stats = state.registry.stats();
    Json(json!({
        "started_at": state.started_at,
        "uptime_secs": state.started.elapsed().as_secs(),
        "tenants": stats.tenants,
        "workspaces": stats.workspaces,
        "subscribers": stats.subscribers,
        "queued": stats.tasks.queued,
        "running": stats.tasks.running,
        "completed": stats.tasks.completed,
        "failed": stats.tasks.failed,
    }))
}

pub async fn list_tasks(
    State(state): State<AppState>,
    Query(q): Query<WorkspaceQuery>,
) -> Result<Json<Value>> {
    let workspace = state
        .registry
        .resolve(&q.api_key, q.workspace_id.as_deref(), false)?;
    Ok(Json(json!({ "tasks": workspace.get_tasks() })))
}

pub async fn create_task(
    State(state): State<AppState>,
    Query(q): Query<WorkspaceQuery>,
    body: std::result::Result<Json<CreateTask>, JsonRejection>,
) -> Result<Json<Value>> {
    let workspace = state
        .registry
        .resolve(&q.api_key, q.workspace_id.as_deref(), false)?;

    let Json(body) = body.map_err(|rejection| {
        debug!(error = %rejection, "rejected task body");
        Error::BadRequest("invalid request body".to_string())
    })?;
    if body.name.trim().is_empty() {
        return Err(Error::BadRequest("name is required".to_string()));
    }
    let kind: TaskKind = body.kind.trim().parse()?;

    let task = workspace.add_task(body.name, kind);
    Ok(Json(json!({ "task": task })))
}

pub async fn delete_task(
    State(state): State<AppState>,
    Query(q): Query<WorkspaceQuery>,
    Path(raw_id): Path<String>,
) -> Result<impl IntoResponse> {
    let workspace = state
        .registry
        .resolve(&q.api_key, q.workspace_id.as_deref(), false)?;
    let id: TaskId = raw_id.parse()?;
    workspace.delete_task(id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn flush_tasks(
    State(state): State<AppState>,
    Query(q): Query<WorkspaceQuery>,
) -> Result<impl IntoResponse> {
    let workspace = state
        .registry
        .resolve(&q.api_key, q.workspace_id.as_deref(), false)?;
    workspace.flush_tasks()?;
    Ok(StatusCode::NO_CONTENT)
}
