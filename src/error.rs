//! Daemon-level error types.
//!
//! Protocol-visible failures are reported as numerics by handlers and never
//! cross the dispatcher boundary as errors; the types here cover startup and
//! subsystem failures that do propagate.

use thiserror::Error;

/// Exit codes. `main` maps fatal errors onto these so operators can tell a
/// bad config from a dead socket engine.
pub mod exit {
    pub const OK: i32 = 0;
    pub const SOCKET_ENGINE: i32 = 10;
    pub const CONFIG: i32 = 11;
    pub const FATAL_RUNTIME: i32 = 12;
}

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// X-line registry failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum XLineError {
    #[error("no such ban type: {0}")]
    UnknownType(String),

    #[error("a {0} on {1} already exists")]
    Duplicate(String, String),

    #[error("invalid pattern '{pattern}': {reason}")]
    BadPattern { pattern: String, reason: String },
}

/// X-line database file failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: {reason}")]
    Format {
        path: String,
        line: usize,
        reason: String,
    },
}
