//! Error types for gx-dispatch.

use thiserror::Error;

use crate::model::{TaskId, TaskStatus};

#[derive(Debug, Error)]
pub enum Error {
    #[error("forbidden")]
    Forbidden,

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    TooManyRequests(String),

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    /// Broadcast attempted against an empty subscriber set. Never surfaced to
    /// HTTP callers; the broadcast loop uses it to decide whether to stop.
    #[error("no connections in workspace")]
    NoConnections,

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("registry is shutting down")]
    ShuttingDown,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Why a push to a single subscriber failed.
///
/// `Closed` means the remote end is gone and the subscriber must be dropped;
/// `Transient` failures are logged and the subscriber is kept for the next push.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("connection closed")]
    Closed,

    #[error("transient delivery failure: {0}")]
    Transient(String),
}
