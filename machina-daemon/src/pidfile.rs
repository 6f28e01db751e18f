//! Pidfile registry.
//!
//! One file per running daemon, named by its decimal pid and holding that
//! pid followed by a newline:
//!
//! ```text
//! <pid_dir>/
//!   4711      "4711\n"
//!   4712      "4712\n"
//! ```
//!
//! Entries are keyed by OS-unique pids, so daemons create and remove their
//! own entries without locking. Stale entries are only reconciled by
//! [`PidFiles::clear_all`].

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use machina_core::AgentConfig;

use crate::error::{io_err, DaemonError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PidFiles {
    root: PathBuf,
}

impl PidFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The registry configured for `home`.
    pub fn at(home: &Path, config: &AgentConfig) -> Self {
        Self::new(crate::paths::pid_dir(home, config))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Entry path for `name`; a path already under the root is returned as is.
    pub fn path(&self, name: impl AsRef<Path>) -> PathBuf {
        let name = name.as_ref();
        if name.starts_with(&self.root) {
            name.to_path_buf()
        } else {
            self.root.join(name)
        }
    }

    /// Create the entry for `pid`.
    pub fn record(&self, pid: u32) -> Result<PathBuf, DaemonError> {
        fs::create_dir_all(&self.root).map_err(|e| io_err(&self.root, e))?;
        let path = self.path(pid.to_string());
        fs::write(&path, format!("{pid}\n")).map_err(|e| io_err(&path, e))?;
        tracing::debug!(pid, path = %path.display(), "recorded pidfile");
        Ok(path)
    }

    /// Record the current process; the entry is removed when the guard drops.
    pub fn record_current(&self) -> Result<PidFileGuard, DaemonError> {
        let path = self.record(std::process::id())?;
        Ok(PidFileGuard { path })
    }

    /// Pids with an entry, ascending. Files not named by a pid are ignored.
    pub fn list(&self) -> Result<Vec<u32>, DaemonError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_err(&self.root, err)),
        };
        let mut pids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&self.root, e))?;
            if let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse().ok()) {
                pids.push(pid);
            }
        }
        pids.sort_unstable();
        Ok(pids)
    }

    /// Remove the entry for `pid`. A missing entry is not an error.
    pub fn remove(&self, pid: u32) -> Result<(), DaemonError> {
        let path = self.path(pid.to_string());
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_err(&path, err)),
        }
    }

    /// Remove every entry and the root directory. Failures are logged and
    /// otherwise ignored.
    pub fn clear_all(&self) {
        match fs::read_dir(&self.root) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let path = entry.path();
                    match fs::remove_file(&path) {
                        Ok(()) => {}
                        Err(err) if err.kind() == ErrorKind::NotFound => {}
                        Err(err) => {
                            tracing::warn!(path = %path.display(), error = %err, "can't remove pidfile")
                        }
                    }
                }
            }
            Err(err) if err.kind() == ErrorKind::NotFound => return,
            Err(err) => {
                tracing::warn!(path = %self.root.display(), error = %err, "can't list pidfiles")
            }
        }
        match fs::remove_dir(&self.root) {
            Ok(()) => tracing::debug!(path = %self.root.display(), "cleared pidfiles"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(path = %self.root.display(), error = %err, "can't remove pidfile directory")
            }
        }
    }
}

/// Removes its pidfile on drop.
#[derive(Debug)]
pub struct PidFileGuard {
    path: PathBuf,
}

impl PidFileGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "removed pidfile"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "can't remove pidfile")
            }
        }
    }
}
