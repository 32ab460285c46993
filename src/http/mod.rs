//! HTTP and WebSocket surface over the [`Registry`].
//!
//! Every route takes `api_key` and `workspace_id` as query parameters and
//! resolves them through the registry before doing anything else.

pub mod error;
pub mod handlers;
pub mod ws;

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::routing::{delete, get, post};
use chrono::{DateTime, Utc};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::engine::Registry;
use crate::error::Result;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub started_at: DateTime<Utc>,
    pub started: Instant,
}

impl AppState {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }
}

/// Method, path and purpose of every route, for the index page.
pub const ENDPOINTS: &[(&str, &str, &str)] = &[
    ("GET", "/", "this listing"),
    ("GET", "/stats", "process-wide counts"),
    ("GET", "/ws/tasks", "subscribe to task snapshots over a websocket"),
    ("GET", "/tasks", "list the workspace's tasks"),
    ("POST", "/tasks", "queue a task: {\"name\", \"type\"}"),
    ("DELETE", "/tasks/{id}", "cancel a queued task"),
    ("POST", "/tasks/flush", "cancel every queued task"),
];

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/stats", get(handlers::stats))
        .route("/ws/tasks", get(ws::subscribe))
        .route("/tasks", get(handlers::list_tasks).post(handlers::create_task))
        .route("/tasks/flush", post(handlers::flush_tasks))
        .route("/tasks/{id}", delete(handlers::delete_task))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until `shutdown` resolves, then drain in-flight requests.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!(addr = ?listener.local_addr().ok(), "listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
