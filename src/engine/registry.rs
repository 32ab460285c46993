//! Process-wide registry: API key → tenant client.
//!
//! Every request resolves (API key, workspace id) here before touching tasks.
//! Tenants and workspaces are created lazily on first resolution.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use opentelemetry::KeyValue;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::EngineConfig;
use super::scheduler::SchedulerStats;
use super::tenant::TenantClient;
use super::workspace::Workspace;
use crate::config::secrets::ExposeSecret;
use crate::error::{Error, Result};
use crate::model::WorkspaceId;
use crate::telemetry::metrics;

pub struct Registry {
    tenants: RwLock<HashMap<String, Arc<TenantClient>>>,
    config: Arc<EngineConfig>,
    closed: AtomicBool,
}

/// Aggregate counts across every tenant.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RegistryStats {
    pub tenants: usize,
    pub workspaces: usize,
    pub subscribers: usize,
    pub tasks: SchedulerStats,
}

impl Registry {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            tenants: RwLock::new(HashMap::new()),
            config: Arc::new(config),
            closed: AtomicBool::new(false),
        }
    }

    /// Resolve the workspace a request targets.
    ///
    /// `subscribing` marks a request that is about to register a push
    /// subscriber; only those are subject to the workspace and connection
    /// limits. Existing workspaces stay reachable past the workspace limit.
    pub fn resolve(
        &self,
        api_key: &str,
        workspace_id: Option<&str>,
        subscribing: bool,
    ) -> Result<Arc<Workspace>> {
        let api_key = api_key.trim();
        if !self.is_allowed(api_key) {
            metrics::admission_rejections().add(1, &[KeyValue::new("reason", "unknown_key")]);
            return Err(Error::Forbidden);
        }
        let workspace_id = WorkspaceId::parse(workspace_id)?;

        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ShuttingDown);
        }

        let tenant = self.tenant(api_key)?;

        if subscribing
            && tenant.workspace_count() >= self.config.limits.max_workspaces
            && !tenant.contains(&workspace_id)
        {
            metrics::admission_rejections().add(1, &[KeyValue::new("reason", "workspace_limit")]);
            return Err(Error::TooManyRequests("too many workspaces".to_string()));
        }

        tenant.resolve_workspace(&workspace_id, subscribing)
    }

    fn is_allowed(&self, api_key: &str) -> bool {
        !api_key.is_empty()
            && self
                .config
                .api_keys
                .iter()
                .any(|k| k.expose_secret() == api_key)
    }

    fn tenant(&self, api_key: &str) -> Result<Arc<TenantClient>> {
        if let Some(tenant) = self.tenants.read().get(api_key) {
            return Ok(Arc::clone(tenant));
        }

        let mut tenants = self.tenants.write();
        // Re-checked under the write lock: shutdown drains the map under it.
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ShuttingDown);
        }
        let tenant = tenants
            .entry(api_key.to_string())
            .or_insert_with(|| {
                let label = fingerprint(api_key);
                info!(tenant = %label, "new tenant client");
                Arc::new(TenantClient::new(label, Arc::clone(&self.config)))
            });
        Ok(Arc::clone(tenant))
    }

    pub fn tenant_count(&self) -> usize {
        self.tenants.read().len()
    }

    pub fn stats(&self) -> RegistryStats {
        let tenants: Vec<_> = self.tenants.read().values().cloned().collect();
        let mut stats = RegistryStats {
            tenants: tenants.len(),
            ..RegistryStats::default()
        };
        for tenant in tenants {
            let t = tenant.stats();
            stats.workspaces += t.workspaces;
            stats.subscribers += t.subscribers;
            stats.tasks.merge(t.tasks);
        }
        stats
    }

    /// Evict workspaces with no subscribers, no outstanding tasks and no
    /// activity for `max_idle`. Returns how many were removed.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let tenants: Vec<_> = self.tenants.read().values().cloned().collect();
        let evicted: usize = tenants.iter().map(|t| t.evict_idle(max_idle)).sum();
        if evicted > 0 {
            metrics::workspaces_evicted().add(evicted as u64, &[]);
            info!(evicted, "evicted idle workspaces");
        }
        evicted
    }

    /// Run [`Registry::evict_idle`] every `every` until shutdown.
    pub fn spawn_eviction_sweep(
        self: &Arc<Self>,
        max_idle: Duration,
        every: Duration,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // interval fires immediately; skip that one
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if registry.is_closed() {
                    debug!("eviction sweep stopped");
                    break;
                }
                registry.evict_idle(max_idle);
            }
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close every tenant, workspace and subscriber. Later resolutions fail
    /// with `ShuttingDown`.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            warn!("registry already shut down");
            return;
        }
        let drained: Vec<_> = self.tenants.write().drain().map(|(_, t)| t).collect();
        let count = drained.len();
        for tenant in drained {
            tenant.close();
        }
        info!(tenants = count, "registry shut down");
    }
}

/// Short, stable, non-reversible tag for an API key, for logs.
fn fingerprint(api_key: &str) -> String {
    let mut hasher = DefaultHasher::new();
    api_key.hash(&mut hasher);
    format!("tenant-{:08x}", hasher.finish() as u32)
}
