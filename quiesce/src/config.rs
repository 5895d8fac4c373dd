//! Configuration for pools and the operator server.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Sizing for a [`BoundedPool`](crate::pool::BoundedPool).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Cap on live instances (checked out plus idle). 0 = unbounded.
    pub max_instances: usize,
    /// Cap on idle instances kept for reuse. 0 = never keep instances.
    pub pool_size: usize,
    /// How long `get()` waits for capacity. 0 = wait forever.
    pub timeout_millis: u64,
}

impl PoolConfig {
    pub fn new(max_instances: usize, pool_size: usize) -> Self {
        Self {
            max_instances,
            pool_size,
            timeout_millis: 0,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_millis = timeout.as_millis().try_into().unwrap_or(u64::MAX);
        self
    }

    /// `None` means wait forever.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_millis > 0).then(|| Duration::from_millis(self.timeout_millis))
    }
}

/// Operator HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// If true, ignore SIGTERM and wait for explicit /shutdown or SIGINT.
    pub await_explicit_shutdown: bool,
    /// Upper bound on waiting for SUSPENDED during shutdown.
    pub drain_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9990,
            await_explicit_shutdown: false,
            drain_timeout: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    /// Read overrides from `QUIESCE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(host) = lookup("QUIESCE_HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("QUIESCE_PORT") {
            config.port = parse_var("QUIESCE_PORT", port)?;
        }
        if let Some(flag) = lookup("QUIESCE_AWAIT_EXPLICIT_SHUTDOWN") {
            config.await_explicit_shutdown = parse_flag("QUIESCE_AWAIT_EXPLICIT_SHUTDOWN", flag)?;
        }
        if let Some(secs) = lookup("QUIESCE_DRAIN_TIMEOUT_SECS") {
            let secs: u64 = parse_var("QUIESCE_DRAIN_TIMEOUT_SECS", secs)?;
            config.drain_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

fn parse_var<T>(var: &'static str, value: String) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        reason: e.to_string(),
        value,
    })
}

fn parse_flag(var: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var,
            value,
            reason: "expected a boolean".to_string(),
        }),
    }
}
