//! Tenant client: the workspaces owned by one API key.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use parking_lot::RwLock;
use tracing::{debug, info};

use super::EngineConfig;
use super::scheduler::SchedulerStats;
use super::workspace::Workspace;
use crate::error::{Error, Result};
use crate::model::WorkspaceId;
use crate::telemetry::metrics;

pub struct TenantClient {
    /// Log-safe stand-in for the API key.
    label: String,
    workspaces: RwLock<HashMap<WorkspaceId, Arc<Workspace>>>,
    config: Arc<EngineConfig>,
}

impl TenantClient {
    pub fn new(label: impl Into<String>, config: Arc<EngineConfig>) -> Self {
        Self {
            label: label.into(),
            workspaces: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Look up or lazily create a workspace.
    ///
    /// For a subscription attempt this also starts the broadcast loop, then
    /// enforces the per-workspace connection limit. New workspaces opened by
    /// a subscription count against the tenant's workspace limit; the check
    /// is repeated under the write lock so racing subscriptions cannot
    /// overshoot it.
    pub fn resolve_workspace(
        &self,
        id: &WorkspaceId,
        subscribing: bool,
    ) -> Result<Arc<Workspace>> {
        let workspace = self.lookup_or_create(id, subscribing)?;

        if subscribing {
            workspace.ensure_broadcasting();
            if workspace.subscriber_count() >= self.config.limits.max_workspace_connections {
                metrics::admission_rejections()
                    .add(1, &[KeyValue::new("reason", "connection_limit")]);
                return Err(Error::TooManyRequests(
                    "too many connections in workspace".to_string(),
                ));
            }
            info!(tenant = %self.label, workspace = %id, "incoming subscription");
        }

        Ok(workspace)
    }

    fn lookup_or_create(&self, id: &WorkspaceId, subscribing: bool) -> Result<Arc<Workspace>> {
        if let Some(workspace) = self.workspaces.read().get(id) {
            workspace.touch();
            return Ok(Arc::clone(workspace));
        }

        let mut workspaces = self.workspaces.write();
        // Another caller may have created it between the two locks.
        if let Some(workspace) = workspaces.get(id) {
            workspace.touch();
            return Ok(Arc::clone(workspace));
        }
        if subscribing && workspaces.len() >= self.config.limits.max_workspaces {
            metrics::admission_rejections().add(1, &[KeyValue::new("reason", "workspace_limit")]);
            return Err(Error::TooManyRequests("too many workspaces".to_string()));
        }

        let workspace = Workspace::new(id.clone(), &self.label, &self.config);
        workspaces.insert(id.clone(), Arc::clone(&workspace));
        drop(workspaces);

        info!(tenant = %self.label, workspace = %id, "new workspace created");
        Ok(workspace)
    }

    pub fn workspace_count(&self) -> usize {
        self.workspaces.read().len()
    }

    pub fn contains(&self, id: &WorkspaceId) -> bool {
        self.workspaces.read().contains_key(id)
    }

    /// Snapshot of the current workspaces.
    pub fn workspaces(&self) -> Vec<Arc<Workspace>> {
        self.workspaces.read().values().cloned().collect()
    }

    /// Remove workspaces that have been idle for at least `max_idle` and shut
    /// them down. Returns how many were removed.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let evicted: Vec<_> = {
            let mut workspaces = self.workspaces.write();
            let idle: Vec<WorkspaceId> = workspaces
                .iter()
                .filter(|(_, ws)| ws.is_evictable(max_idle))
                .map(|(id, _)| id.clone())
                .collect();
            idle.into_iter()
                .filter_map(|id| workspaces.remove(&id))
                .collect()
        };

        for workspace in &evicted {
            workspace.shutdown();
            debug!(tenant = %self.label, workspace = %workspace.id(), "idle workspace evicted");
        }
        evicted.len()
    }

    pub fn stats(&self) -> TenantStats {
        let mut stats = TenantStats::default();
        for workspace in self.workspaces() {
            stats.workspaces += 1;
            stats.subscribers += workspace.subscriber_count();
            stats.tasks.merge(workspace.stats());
        }
        stats
    }

    /// Shut down every workspace.
    pub fn close(&self) {
        let drained: Vec<_> = self.workspaces.write().drain().map(|(_, ws)| ws).collect();
        for workspace in drained {
            workspace.shutdown();
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TenantStats {
    pub workspaces: usize,
    pub subscribers: usize,
    pub tasks: SchedulerStats,
}
