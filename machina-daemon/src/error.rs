use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the daemon runtime, protocol, pidfiles and process table.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("command error: {0}")]
    Command(#[from] machina_core::CommandError),

    #[error("store error: {0}")]
    Store(#[from] machina_sync::StoreError),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Shutdown(#[from] ShutdownError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    #[error("daemon is not running (socket missing: {socket})")]
    DaemonNotRunning { socket: PathBuf },

    #[error("signal {signal} to pid {pid} failed: {source}")]
    Signal {
        pid: u32,
        signal: i32,
        #[source]
        source: std::io::Error,
    },

    #[error("daemons did not stop: {remaining:?} still recorded")]
    StillRunning { remaining: Vec<u32> },

    #[error("daemons already running: {pids:?}")]
    AlreadyRunning { pids: Vec<u32> },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}

/// Failures on the publish bus.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum BusError {
    /// The publishing provider has been told to stop.
    #[error("publisher stopped")]
    Stopped,

    /// The consumer side of the bus is gone.
    #[error("bus closed")]
    Closed,
}

/// Failures reported by a provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The attribute is detection-only and can't be mutated externally.
    #[error("{key}: read-only")]
    ReadOnly { key: String },

    #[error("{key}: invalid value {value:?}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    /// `main` was invoked on a provider that is not freshly constructed.
    #[error("{provider}: can't start from {state} state")]
    NotStartable {
        provider: String,
        state: crate::provider::ProviderState,
    },

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("watch error: {0}")]
    Notify(#[from] notify::Error),

    #[error("{0}")]
    Failed(String),
}

impl ProviderError {
    pub fn read_only(key: impl Into<String>) -> Self {
        Self::ReadOnly { key: key.into() }
    }
}

/// Failures resolving or delegating a routed `set` / `del`.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("{key}: no provider owns this key")]
    NoOwner { key: String },

    #[error("{provider}: {source}")]
    Provider {
        provider: String,
        #[source]
        source: ProviderError,
    },
}

impl RouteError {
    /// The provider error, if a provider was reached.
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            Self::NoOwner { .. } => None,
            Self::Provider { source, .. } => Some(source),
        }
    }
}

/// Every provider close failure from one registry shutdown.
#[derive(Debug, Error)]
pub struct ShutdownError {
    pub failures: Vec<(String, ProviderError)>,
}

impl fmt::Display for ShutdownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} provider(s) failed to close", self.failures.len())?;
        for (provider, err) in &self.failures {
            write!(f, "; {provider}: {err}")?;
        }
        Ok(())
    }
}
