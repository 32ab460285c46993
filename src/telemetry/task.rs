//! Task execution span helpers.
//!
//! Provides span creation and state-transition recording for tasks
//! flowing through a scheduler.

use tracing::Span;

use crate::model::{TaskId, TaskKind, TaskStatus};

/// Start a span for one task execution.
///
/// The `task.status` field is declared empty and is filled in by
/// [`record_state_transition`].
pub fn start_task_span(kind: TaskKind, id: TaskId) -> Span {
    tracing::info_span!(
        "task.execute",
        "task.type" = kind.as_str(),
        "task.id" = id.0,
        "task.status" = tracing::field::Empty,
    )
}

/// Record a state transition on the given span.
///
/// Emits a tracing `info` event scoped to the span and updates its
/// `task.status` field.
pub fn record_state_transition(span: &Span, from: TaskStatus, to: TaskStatus) {
    span.record("task.status", to.as_str());
    span.in_scope(|| {
        tracing::info!(from = from.as_str(), to = to.as_str(), "state_transition");
    });
}
