//! Typed configuration from environment variables.
//!
//! Loads once at startup and fails fast on anything missing or out of range.
//! API keys are wrapped in `SecretString` to keep them out of logs.

pub mod secrets;

use std::fmt::Display;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;

use crate::engine::{EngineConfig, Limits, SchedulerConfig};
use crate::error::{Error, Result};
use secrets::{ExposeSecret, SecretString};

#[derive(Debug)]
pub struct Config {
    pub port: u16,
    pub api_keys: Vec<SecretString>,
    pub max_workspaces: usize,
    pub max_workspace_connections: usize,
    pub max_running_workspace_tasks: usize,
    pub task_failure_rate: f64,
    /// `None` disables the idle-workspace sweep.
    pub workspace_idle_timeout: Option<Duration>,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup. Blank values
    /// count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let api_keys: Vec<SecretString> = required(&var, "API_KEYS")?
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(|k| SecretString::from(k.to_string()))
            .collect();
        if api_keys.is_empty() {
            return Err(Error::Config(
                "API_KEYS must contain at least one key".to_string(),
            ));
        }

        let idle_secs: u64 = ranged(&var, "WORKSPACE_IDLE_TIMEOUT_SECS", 0, 0..=u64::MAX)?;

        Ok(Self {
            port: ranged(&var, "PORT", 8700, 0..=u16::MAX)?,
            api_keys,
            max_workspaces: ranged(&var, "MAX_WORKSPACES", 4, 0..=4)?,
            max_workspace_connections: ranged(&var, "MAX_WORKSPACE_CONNECTIONS", 10, 0..=255)?,
            max_running_workspace_tasks: ranged(&var, "MAX_RUNNING_WORKSPACE_TASKS", 2, 1..=64)?,
            task_failure_rate: ranged(&var, "TASK_FAILURE_RATE", 0.0, 0.0..=1.0)?,
            workspace_idle_timeout: (idle_secs > 0).then(|| Duration::from_secs(idle_secs)),
            otel_endpoint: var("OTEL_ENDPOINT"),
            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// The engine's share of the configuration.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::new(self.api_keys.iter().map(|k| k.expose_secret().to_string()))
            .limits(Limits {
                max_workspaces: self.max_workspaces,
                max_workspace_connections: self.max_workspace_connections,
            })
            .scheduler(SchedulerConfig {
                max_running: self.max_running_workspace_tasks,
                failure_rate: self.task_failure_rate,
                ..SchedulerConfig::default()
            })
    }
}

fn required(var: &impl Fn(&str) -> Option<String>, name: &str) -> Result<String> {
    var(name).ok_or_else(|| {
        Error::Config(format!("required environment variable {name} is not set"))
    })
}

fn ranged<T>(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
    range: RangeInclusive<T>,
) -> Result<T>
where
    T: FromStr + PartialOrd + Display,
    T::Err: Display,
{
    let Some(raw) = var(name) else {
        return Ok(default);
    };
    let value: T = raw
        .parse()
        .map_err(|e| Error::Config(format!("{name}={raw:?} is not valid: {e}")))?;
    if !range.contains(&value) {
        return Err(Error::Config(format!(
            "{name}={value} is out of range {}..={}",
            range.start(),
            range.end()
        )));
    }
    Ok(value)
}
