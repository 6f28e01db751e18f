//! Error types for machina-core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from loading the agent configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure (permission denied, unreadable file, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse error on load, with the offending file.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Errors from the command table.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("{0}: duplicate command")]
    DuplicateCommand(String),

    #[error("{0}: command not found")]
    CommandNotFound(String),
}

/// A line that is not a valid change event.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventParseError {
    #[error("missing \": \" separator in {0:?}")]
    MissingSeparator(String),

    #[error("empty key in {0:?}")]
    EmptyKey(String),

    #[error("key {0:?} contains a line break or the \": \" separator")]
    InvalidKey(String),
}
