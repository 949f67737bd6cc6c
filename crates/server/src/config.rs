//! Server configuration.
//!
//! A [`ServerConfig`] is resolved once before the listener is set up: built-in
//! defaults, then an optional TOML file, then explicit overrides. It is
//! read-only afterwards and every worker inherits a copy across `fork`.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::ConfigError;

/// A side-effecting callback run around worker creation.
pub type Hook = Arc<dyn Fn() + Send + Sync>;

pub const DEFAULT_BACKLOG: i32 = 1024;
pub const DEFAULT_ERR_RESPAWN_INTERVAL: Duration = Duration::from_secs(1);
/// One day, in seconds.
pub const MAX_TIMEOUT: u64 = 24 * 60 * 60;

#[derive(Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Listen on a Unix-domain socket at this path instead of `host:port`.
    pub path: Option<PathBuf>,
    pub max_workers: usize,
    /// Seconds allowed for reading a request, and for each response write.
    pub timeout: u64,
    /// Requests a worker serves before it exits; `0` means unlimited.
    pub max_request_per_child: u64,
    pub min_request_per_child: Option<u64>,
    /// Seconds between replacing workers during a rolling restart.
    pub spawn_interval: Option<f64>,
    /// Minimum pause, in seconds, before respawning after back-to-back crashes.
    pub err_respawn_interval: Option<f64>,
    pub oobgc: bool,
    pub max_gc_per_request: u64,
    pub min_gc_per_request: Option<u64>,
    pub backlog: Option<i32>,
    pub reuse_port: bool,

    #[serde(skip)]
    pub before_fork: Option<Hook>,
    #[serde(skip)]
    pub after_fork: Option<Hook>,
    /// Replaces the default out-of-band collection action.
    #[serde(skip)]
    pub oob_hook: Option<Hook>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 9292,
            path: None,
            max_workers: 10,
            timeout: 300,
            max_request_per_child: 100,
            min_request_per_child: None,
            spawn_interval: None,
            err_respawn_interval: None,
            oobgc: false,
            max_gc_per_request: 5,
            min_gc_per_request: None,
            backlog: None,
            reuse_port: false,
            before_fork: None,
            after_fork: None,
            oob_hook: None,
        }
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("path", &self.path)
            .field("max_workers", &self.max_workers)
            .field("timeout", &self.timeout)
            .field("max_request_per_child", &self.max_request_per_child)
            .field("min_request_per_child", &self.min_request_per_child)
            .field("spawn_interval", &self.spawn_interval)
            .field("err_respawn_interval", &self.err_respawn_interval)
            .field("oobgc", &self.oobgc)
            .field("max_gc_per_request", &self.max_gc_per_request)
            .field("min_gc_per_request", &self.min_gc_per_request)
            .field("backlog", &self.backlog)
            .field("reuse_port", &self.reuse_port)
            .field("before_fork", &self.before_fork.is_some())
            .field("after_fork", &self.after_fork.is_some())
            .field("oob_hook", &self.oob_hook.is_some())
            .finish()
    }
}

impl ServerConfig {
    /// Parses a TOML document; keys that are absent keep their defaults.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.to_owned(), source })?;
        Self::from_toml(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.timeout == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.timeout > MAX_TIMEOUT {
            return Err(ConfigError::TimeoutTooLarge { max: MAX_TIMEOUT, value: self.timeout });
        }
        check_interval("spawn_interval", self.spawn_interval)?;
        check_interval("err_respawn_interval", self.err_respawn_interval)?;
        check_range("min_request_per_child", self.min_request_per_child, self.max_request_per_child)?;
        check_range("min_gc_per_request", self.min_gc_per_request, self.max_gc_per_request)?;
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn spawn_interval(&self) -> Duration {
        self.spawn_interval.map_or(Duration::ZERO, Duration::from_secs_f64)
    }

    pub fn err_respawn_interval(&self) -> Duration {
        self.err_respawn_interval.map_or(DEFAULT_ERR_RESPAWN_INTERVAL, Duration::from_secs_f64)
    }

    pub fn backlog(&self) -> i32 {
        self.backlog.unwrap_or(DEFAULT_BACKLOG)
    }

    pub fn with_before_fork(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.before_fork = Some(Arc::new(hook));
        self
    }

    pub fn with_after_fork(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.after_fork = Some(Arc::new(hook));
        self
    }

    pub fn with_oob_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.oob_hook = Some(Arc::new(hook));
        self
    }
}

fn check_interval(name: &'static str, value: Option<f64>) -> Result<(), ConfigError> {
    match value {
        Some(value) if !value.is_finite() || value < 0.0 => Err(ConfigError::InvalidInterval { name, value }),
        _ => Ok(()),
    }
}

// a max of 0 means unlimited, so any minimum is acceptable
fn check_range(name: &'static str, min: Option<u64>, max: u64) -> Result<(), ConfigError> {
    match min {
        Some(min) if max != 0 && min > max => Err(ConfigError::MinAboveMax { name, min, max }),
        _ => Ok(()),
    }
}
