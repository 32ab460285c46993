//! Orchestration engine: registry → tenant client → workspace → scheduler.
//!
//! Each level owns one lock over its own map or sequences and never holds it
//! while calling into a child's locked methods.

pub mod registry;
pub mod scheduler;
pub mod subscriber;
pub mod tenant;
pub mod workspace;

use std::time::Duration;

use crate::config::secrets::SecretString;

pub use registry::{Registry, RegistryStats};
pub use scheduler::{SchedulerConfig, SchedulerStats, TaskScheduler};
pub use subscriber::{ChannelSubscriber, Outbound, Subscriber, SubscriberId};
pub use tenant::TenantClient;
pub use workspace::Workspace;

/// Admission limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Workspaces per tenant that a subscription may open.
    pub max_workspaces: usize,
    /// Live subscribers per workspace.
    pub max_workspace_connections: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_workspaces: 4,
            max_workspace_connections: 10,
        }
    }
}

/// Everything the engine needs, passed explicitly to [`Registry::new`].
#[derive(Debug)]
pub struct EngineConfig {
    pub api_keys: Vec<SecretString>,
    pub limits: Limits,
    pub scheduler: SchedulerConfig,
    /// Period of each workspace's snapshot push.
    pub broadcast_period: Duration,
}

impl EngineConfig {
    /// Defaults for everything but the allow-list.
    pub fn new<I, K>(api_keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        Self {
            api_keys: api_keys
                .into_iter()
                .map(|k| SecretString::from(k.into()))
                .collect(),
            limits: Limits::default(),
            scheduler: SchedulerConfig::default(),
            broadcast_period: Duration::from_secs(1),
        }
    }

    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn broadcast_period(mut self, period: Duration) -> Self {
        self.broadcast_period = period;
        self
    }
}
