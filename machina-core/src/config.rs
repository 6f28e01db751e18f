//! Agent configuration.
//!
//! # Storage layout
//!
//! ```text
//! ~/.machina/
//!   config.yaml      (agent configuration, optional)
//! ```
//!
//! Paths take an explicit `home` (`fn_at(home: &Path, …)`); callers resolve
//! it once, tests pass a `TempDir`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_MACHINE: &str = "machina";
pub const DEFAULT_HASH: &str = "machina";
pub const DEFAULT_CMDLINE: &str = "/proc/cmdline";
pub const DEFAULT_UPTIME_INTERVAL_SECS: u64 = 60;

// ---------------------------------------------------------------------------
// 1. Types
// ---------------------------------------------------------------------------

/// Top-level agent configuration. Every field has a default, so an empty or
/// missing file is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Identity published under the `machine` key.
    pub machine: String,
    /// Name of the persistent attribute hash.
    pub hash: String,
    /// Boot configuration source parsed by the cmdline provider.
    pub cmdline: PathBuf,
    pub uptime_interval_secs: u64,
    /// Overrides `<home>/.machina/run/pids`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid_dir: Option<PathBuf>,
    /// Static attribute tables, one provider each.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, AttrTable>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            machine: DEFAULT_MACHINE.to_string(),
            hash: DEFAULT_HASH.to_string(),
            cmdline: PathBuf::from(DEFAULT_CMDLINE),
            uptime_interval_secs: DEFAULT_UPTIME_INTERVAL_SECS,
            pid_dir: None,
            attrs: BTreeMap::new(),
        }
    }
}

/// A named table of attributes served by one static provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrTable {
    pub prefixes: Vec<String>,
    #[serde(default)]
    pub values: BTreeMap<String, String>,
    /// Whether external `set` is accepted for existing keys.
    #[serde(default)]
    pub writable: bool,
}

// ---------------------------------------------------------------------------
// 2. Paths
// ---------------------------------------------------------------------------

/// `<home>/.machina/`
pub fn machina_root(home: &Path) -> PathBuf {
    home.join(".machina")
}

/// `<home>/.machina/config.yaml`
pub fn config_path_at(home: &Path) -> PathBuf {
    machina_root(home).join("config.yaml")
}

// ---------------------------------------------------------------------------
// 3. Load
// ---------------------------------------------------------------------------

/// Load `<home>/.machina/config.yaml`, or defaults when it does not exist.
///
/// Returns `ConfigError::Parse` (with path + line context) if malformed.
pub fn load_at(home: &Path) -> Result<AgentConfig, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(AgentConfig::default());
    }
    let contents = std::fs::read_to_string(&path)?;
    if contents.trim().is_empty() {
        return Ok(AgentConfig::default());
    }
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn config_path_is_under_dot_machina() {
        let home = TempDir::new().expect("tempdir");
        assert!(config_path_at(home.path()).ends_with(".machina/config.yaml"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let home = TempDir::new().expect("tempdir");
        let config = load_at(home.path()).expect("load");
        assert_eq!(config, AgentConfig::default());
        assert_eq!(config.cmdline, PathBuf::from("/proc/cmdline"));
    }

    #[test]
    fn partial_file_fills_remaining_defaults() {
        let home = TempDir::new().expect("tempdir");
        std::fs::create_dir_all(machina_root(home.path())).expect("mkdir");
        std::fs::write(config_path_at(home.path()), "machine: platina-mk1\n").expect("write");

        let config = load_at(home.path()).expect("load");
        assert_eq!(config.machine, "platina-mk1");
        assert_eq!(config.hash, DEFAULT_HASH);
        assert_eq!(config.uptime_interval_secs, DEFAULT_UPTIME_INTERVAL_SECS);
    }
}
