use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Fatal errors: the server refuses to start, or stops supervising, when one of these occurs.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid SERVER_STARTER_PORT `{value}`: {reason}")]
    Handoff { value: String, reason: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("worker runtime error: {0}")]
    Runtime(#[source] io::Error),

    #[error("failed to fork worker: {0}")]
    Fork(#[source] io::Error),

    #[error("failed to install signal handlers: {0}")]
    Signal(#[source] io::Error),
}

impl ServerError {
    pub(crate) fn bind(addr: impl Into<String>, source: io::Error) -> Self {
        ServerError::Bind { addr: addr.into(), source }
    }

    pub(crate) fn handoff(value: impl Into<String>, reason: impl Into<String>) -> Self {
        ServerError::Handoff { value: value.into(), reason: reason.into() }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("max_workers must be at least 1")]
    NoWorkers,

    #[error("timeout must be greater than zero")]
    ZeroTimeout,

    #[error("timeout must be at most {max} seconds, got {value}")]
    TimeoutTooLarge { max: u64, value: u64 },

    #[error("{name} must be a finite, non-negative number of seconds, got {value}")]
    InvalidInterval { name: &'static str, value: f64 },

    #[error("{name} ({min}) is greater than its maximum ({max})")]
    MinAboveMax { name: &'static str, min: u64, max: u64 },
}
