//! Size-based rotation of daemon log files.
//!
//! Every `*.log` under the logs directory is rotated once it reaches
//! [`MAX_LOG_BYTES`], keeping [`MAX_ROTATED_FILES`] numbered copies:
//! `machined.log → machined.log.1 → … → machined.log.5`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;
pub const MAX_ROTATED_FILES: usize = 5;

/// Rotate `log_path` when it is at least `max_bytes` long.
///
/// Returns whether a rotation happened. A missing log is not an error.
pub fn rotate_if_needed(log_path: &Path, max_bytes: u64, max_files: usize) -> io::Result<bool> {
    let size = match fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    if size < max_bytes {
        return Ok(false);
    }

    match fs::remove_file(numbered_path(log_path, max_files)) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }
    for n in (1..max_files).rev() {
        let src = numbered_path(log_path, n);
        if src.exists() {
            fs::rename(&src, numbered_path(log_path, n + 1))?;
        }
    }
    // Daemons hold an append descriptor on the live file, so it is copied
    // and truncated in place rather than renamed.
    fs::copy(log_path, numbered_path(log_path, 1))?;
    fs::OpenOptions::new().write(true).open(log_path)?.set_len(0)?;
    Ok(true)
}

/// Rotate every daemon log under `logs`. Failures are logged per file.
pub fn rotate_logs(logs: &Path) {
    let entries = match fs::read_dir(logs) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return,
        Err(err) => {
            tracing::warn!(path = %logs.display(), error = %err, "can't list log directory");
            return;
        }
    };
    for path in entries.flatten().map(|e| e.path()).filter(|p| is_live_log(p)) {
        match rotate_if_needed(&path, MAX_LOG_BYTES, MAX_ROTATED_FILES) {
            Ok(true) => tracing::info!(path = %path.display(), "log file rotated"),
            Ok(false) => {}
            Err(err) => tracing::warn!(path = %path.display(), error = %err, "log rotation failed"),
        }
    }
}

fn is_live_log(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("log")
}

/// `machined.log` + 2 → `machined.log.2`
fn numbered_path(base: &Path, n: usize) -> PathBuf {
    let mut name = base.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{n}"));
    base.with_file_name(name)
}
