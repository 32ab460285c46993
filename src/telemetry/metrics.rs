//! Metric instrument factories for gx-dispatch.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"gx-dispatch"` meter; without
//! an exporter they are no-ops.

use opentelemetry::metrics::{Counter, Meter};

/// Returns the shared meter for gx-dispatch instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("gx-dispatch")
}

/// Counter: tasks added to a workspace.
/// Labels: `task_type`.
pub fn tasks_submitted() -> Counter<u64> {
    meter()
        .u64_counter("gx.tasks.submitted")
        .with_description("Number of tasks submitted")
        .build()
}

/// Counter: task state transitions.
/// Labels: `from`, `to`.
pub fn task_state_transitions() -> Counter<u64> {
    meter()
        .u64_counter("gx.tasks.state_transitions")
        .with_description("Number of task state transitions")
        .build()
}

/// Counter: requests refused by admission control.
/// Labels: `reason` ("unknown_key" | "workspace_limit" | "connection_limit").
pub fn admission_rejections() -> Counter<u64> {
    meter()
        .u64_counter("gx.admission.rejections")
        .with_description("Requests refused by admission control")
        .build()
}

/// Counter: broadcast deliveries to individual subscribers.
/// Labels: `result` ("ok" | "closed" | "transient").
pub fn broadcast_deliveries() -> Counter<u64> {
    meter()
        .u64_counter("gx.broadcast.deliveries")
        .with_description("Snapshot pushes to subscribers")
        .build()
}

/// Counter: workspaces removed by the idle sweep.
pub fn workspaces_evicted() -> Counter<u64> {
    meter()
        .u64_counter("gx.workspaces.evicted")
        .with_description("Idle workspaces evicted")
        .build()
}
