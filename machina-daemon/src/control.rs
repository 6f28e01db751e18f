//! Starting, stopping and restarting the daemon set.
//!
//! [`restart`] is a strict stop-then-start over any [`DaemonControl`]; the
//! concrete [`DaemonTable`] spawns daemon-kind commands as detached
//! processes and stops them through the pidfile registry.

use std::fs::OpenOptions;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use machina_core::{AgentConfig, CommandDescriptor, CommandTable};

use crate::error::{io_err, DaemonError};
use crate::paths::{daemon_log_path, logs_dir, STOP_POLL_ATTEMPTS, STOP_POLL_INTERVAL};
use crate::pidfile::PidFiles;

/// Hidden subcommand the table spawns for each daemon.
pub const DAEMON_RUN: &str = "daemon-run";

/// A named set of daemons that can be stopped and started as a whole.
pub trait DaemonControl {
    type Error;

    fn stop(&mut self, args: &[String]) -> Result<(), Self::Error>;
    fn start(&mut self, args: &[String]) -> Result<(), Self::Error>;
}

/// Stop, then start with the same `args`.
///
/// A failed stop is returned unchanged and start is never attempted. A failed
/// start leaves everything stopped.
pub fn restart<C>(control: &mut C, args: &[String]) -> Result<(), C::Error>
where
    C: DaemonControl + ?Sized,
{
    control.stop(args)?;
    control.start(args)
}

/// Daemon-kind commands run as `<program> daemon-run <name> [args…]`.
#[derive(Debug, Clone)]
pub struct DaemonTable {
    home: PathBuf,
    program: PathBuf,
    daemons: Vec<CommandDescriptor>,
    pidfiles: PidFiles,
    poll_interval: Duration,
    poll_attempts: usize,
}

impl DaemonTable {
    /// The daemons of `commands`, spawned from the running executable.
    pub fn new(
        home: &Path,
        config: &AgentConfig,
        commands: &CommandTable,
    ) -> Result<Self, DaemonError> {
        let program = std::env::current_exe().map_err(|e| io_err("current executable", e))?;
        Ok(Self {
            home: home.to_path_buf(),
            program,
            daemons: commands.daemons().into_iter().cloned().collect(),
            pidfiles: PidFiles::at(home, config),
            poll_interval: STOP_POLL_INTERVAL,
            poll_attempts: STOP_POLL_ATTEMPTS,
        })
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_poll(mut self, interval: Duration, attempts: usize) -> Self {
        self.poll_interval = interval;
        self.poll_attempts = attempts;
        self
    }

    pub fn pidfiles(&self) -> &PidFiles {
        &self.pidfiles
    }

    /// Recorded pids whose process still exists.
    pub fn running(&self) -> Result<Vec<u32>, DaemonError> {
        Ok(self
            .pidfiles
            .list()?
            .into_iter()
            .filter(|pid| is_alive(*pid))
            .collect())
    }

    fn spawn(&self, daemon: &CommandDescriptor, args: &[String]) -> Result<u32, DaemonError> {
        let logs = logs_dir(&self.home);
        std::fs::create_dir_all(&logs).map_err(|e| io_err(&logs, e))?;
        let log_path = daemon_log_path(&self.home, &daemon.name);
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| io_err(&log_path, e))?;
        let err_log = log.try_clone().map_err(|e| io_err(&log_path, e))?;

        let child = Command::new(&self.program)
            .arg(DAEMON_RUN)
            .arg(&daemon.name)
            .args(args)
            .stdin(Stdio::null())
            .stdout(log)
            .stderr(err_log)
            .process_group(0)
            .spawn()
            .map_err(|e| io_err(&self.program, e))?;
        Ok(child.id())
    }

    /// Signal `pid`. Returns `false` when the process is already gone.
    fn terminate(pid: u32) -> Result<bool, DaemonError> {
        let Ok(raw) = libc::pid_t::try_from(pid) else {
            return Ok(false);
        };
        // SAFETY: kill(2) has no memory-safety preconditions.
        if unsafe { libc::kill(raw, libc::SIGTERM) } == 0 {
            return Ok(true);
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(false);
        }
        Err(DaemonError::Signal {
            pid,
            signal: libc::SIGTERM,
            source: err,
        })
    }
}

impl DaemonControl for DaemonTable {
    type Error = DaemonError;

    /// Spawn every daemon in ascending level order.
    fn start(&mut self, args: &[String]) -> Result<(), DaemonError> {
        let running = self.running()?;
        if !running.is_empty() {
            return Err(DaemonError::AlreadyRunning { pids: running });
        }
        for daemon in &self.daemons {
            let pid = self.spawn(daemon, args)?;
            tracing::info!(daemon = %daemon.name, pid, "started daemon");
        }
        Ok(())
    }

    /// SIGTERM every recorded daemon and wait for its entry to go away.
    ///
    /// Pidfiles carry no name or level, so every recorded daemon is signalled
    /// at once regardless of `args`.
    fn stop(&mut self, _args: &[String]) -> Result<(), DaemonError> {
        for pid in self.pidfiles.list()? {
            if Self::terminate(pid)? {
                tracing::info!(pid, "sent SIGTERM");
            } else {
                tracing::debug!(pid, "daemon already gone");
                self.pidfiles.remove(pid)?;
            }
        }

        let mut remaining = self.pidfiles.list()?;
        for _ in 0..self.poll_attempts {
            if remaining.is_empty() {
                break;
            }
            std::thread::sleep(self.poll_interval);
            remaining = self
                .pidfiles
                .list()?
                .into_iter()
                .filter(|pid| is_alive(*pid))
                .collect();
        }
        if !remaining.is_empty() {
            tracing::warn!(?remaining, "daemons did not stop");
            return Err(DaemonError::StillRunning { remaining });
        }
        self.pidfiles.clear_all();
        Ok(())
    }
}

/// Whether a process with `pid` exists (zombies included).
pub fn is_alive(pid: u32) -> bool {
    let Ok(raw) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: signal 0 only performs the existence and permission check.
    if unsafe { libc::kill(raw, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}
