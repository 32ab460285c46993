//! # gx-dispatch
//!
//! Multi-tenant job-dispatch engine. Clients identified by an API key own
//! isolated workspaces; each workspace queues synthetic tasks, runs a bounded
//! number of them at a time, and pushes task snapshots to its live
//! subscribers over WebSockets.

pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod model;
pub mod telemetry;
