use std::path::{Path, PathBuf};
use std::time::Duration;

use machina_core::config::machina_root;
use machina_core::AgentConfig;

pub const MACHINED: &str = "machined";
pub const DAEMON_SOCKET: &str = "machined.sock";

/// How often the runtime checks daemon logs for rotation.
pub const LOG_ROTATION_PERIOD: Duration = Duration::from_secs(5);

/// How long `stop` waits for pidfiles to disappear, and how often it looks.
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const STOP_POLL_ATTEMPTS: usize = 10;

pub fn run_dir(home: &Path) -> PathBuf {
    machina_root(home).join("run")
}

/// Pidfile root, honouring a configured override.
pub fn pid_dir(home: &Path, config: &AgentConfig) -> PathBuf {
    config
        .pid_dir
        .clone()
        .unwrap_or_else(|| run_dir(home).join("pids"))
}

pub fn socket_path(home: &Path) -> PathBuf {
    run_dir(home).join(DAEMON_SOCKET)
}

pub fn logs_dir(home: &Path) -> PathBuf {
    machina_root(home).join("logs")
}

/// `<home>/.machina/logs/<daemon>.log`
pub fn daemon_log_path(home: &Path, daemon: &str) -> PathBuf {
    logs_dir(home).join(format!("{daemon}.log"))
}
