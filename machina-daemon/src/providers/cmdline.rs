//! Boot parameters from the kernel command line.
//!
//! `console=ttyS0,115200 quiet` becomes `cmdline.console: ttyS0,115200` and
//! `cmdline.quiet: true`. The source file's directory is watched; when the
//! file is replaced or rewritten the parameters are re-read and only the
//! difference is published.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use machina_core::{ChangeEvent, Key};
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::bus::{Bus, Publisher};
use crate::error::ProviderError;
use crate::provider::{run_detection, stopped_is_ok, Lifecycle, Provider};

pub const PREFIX: &str = "cmdline.";

/// Value published for a bare flag such as `quiet`.
const FLAG_VALUE: &str = "true";

type Params = BTreeMap<String, String>;
type WatchEvents = mpsc::UnboundedReceiver<notify::Result<Event>>;

#[derive(Debug)]
pub struct CmdlineProvider {
    lifecycle: Lifecycle,
    publisher: Publisher,
    path: PathBuf,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl CmdlineProvider {
    pub fn new(path: impl Into<PathBuf>, bus: &Bus) -> Self {
        let lifecycle = Lifecycle::new("cmdline");
        let publisher = lifecycle.publisher(bus);
        Self {
            lifecycle,
            publisher,
            path: path.into(),
            watcher: Mutex::new(None),
        }
    }

    /// Watch the source's directory. A source that can't be watched is
    /// published once and never refreshed.
    ///
    /// The watcher is only kept while `stop` is live; `close` may run between
    /// `begin` and here.
    fn watch(&self, stop: &CancellationToken) -> Option<WatchEvents> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let watcher = recommended_watcher(move |event| {
            let _ = event_tx.send(event);
        })
        .and_then(|mut watcher| {
            watcher.watch(dir, RecursiveMode::NonRecursive)?;
            Ok(watcher)
        });
        match watcher {
            Ok(watcher) => {
                tracing::debug!(path = %self.path.display(), "watching boot parameters");
                *lock(&self.watcher) = Some(watcher);
                if stop.is_cancelled() {
                    drop(lock(&self.watcher).take());
                    return None;
                }
                Some(event_rx)
            }
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "can't watch boot parameters");
                None
            }
        }
    }

    fn is_source_event(&self, event: &Event) -> bool {
        matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
        ) && event
            .paths
            .iter()
            .any(|p| p.file_name() == self.path.file_name())
    }

    async fn publish_changes(&self, old: &Params, new: &Params) -> Result<(), ProviderError> {
        for event in diff(old, new) {
            self.publisher.send(event).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Provider for CmdlineProvider {
    fn name(&self) -> &str {
        self.lifecycle.name()
    }

    fn prefixes(&self, _args: &[String]) -> Vec<String> {
        vec![PREFIX.to_string()]
    }

    async fn main(&self, _args: &[String]) -> Result<(), ProviderError> {
        run_detection(&self.lifecycle, |stop| async move {
            let mut events = self.watch(&stop);
            let mut published = read_params(&self.path)?;
            stopped_is_ok(self.publish_changes(&Params::new(), &published).await)?;

            loop {
                let next = async {
                    match events.as_mut() {
                        Some(rx) => rx.recv().await,
                        None => std::future::pending().await,
                    }
                };
                let event = tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    event = next => event,
                };
                let event = match event {
                    Some(Ok(event)) => event,
                    Some(Err(err)) => {
                        tracing::warn!(error = %err, "boot parameter watch error");
                        continue;
                    }
                    None => {
                        events = None;
                        continue;
                    }
                };
                if !self.is_source_event(&event) {
                    continue;
                }
                let current = match read_params(&self.path) {
                    Ok(current) => current,
                    Err(err) => {
                        tracing::warn!(error = %err, "re-reading boot parameters failed");
                        continue;
                    }
                };
                stopped_is_ok(self.publish_changes(&published, &current).await)?;
                published = current;
            }
            Ok(())
        })
        .await
    }

    async fn close(&self) -> Result<(), ProviderError> {
        self.lifecycle.stop();
        drop(lock(&self.watcher).take());
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), ProviderError> {
        Err(ProviderError::read_only(key))
    }

    async fn set(&self, key: &str, _value: &str) -> Result<(), ProviderError> {
        Err(ProviderError::read_only(key))
    }
}

/// Split a command line into `key → value`; bare flags map to `"true"`.
///
/// Double quotes group whitespace and are removed. A repeated key keeps its
/// last value. Names that would not make a valid key are skipped.
pub fn parse(line: &str) -> Params {
    let mut params = Params::new();
    for word in split_words(line) {
        let (name, value) = match word.split_once('=') {
            Some((name, value)) => (name, value.to_string()),
            None => (word.as_str(), FLAG_VALUE.to_string()),
        };
        if name.is_empty() {
            continue;
        }
        let key = format!("{PREFIX}{name}");
        if !Key::is_valid(&key) {
            tracing::debug!(key = %key, "skipping boot parameter with unusable name");
            continue;
        }
        params.insert(key, value);
    }
    params
}

fn split_words(line: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut quoted = false;
    for c in line.chars() {
        match c {
            '"' => quoted = !quoted,
            c if c.is_whitespace() && !quoted => {
                if !word.is_empty() {
                    words.push(std::mem::take(&mut word));
                }
            }
            c => word.push(c),
        }
    }
    if !word.is_empty() {
        words.push(word);
    }
    words
}

/// Events turning `old` into `new`, in key order.
pub fn diff(old: &Params, new: &Params) -> Vec<ChangeEvent> {
    let mut keys: Vec<&String> = old.keys().chain(new.keys()).collect();
    keys.sort();
    keys.dedup();
    keys.into_iter()
        .filter_map(|key| match (old.get(key), new.get(key)) {
            (_, Some(value)) if old.get(key) != Some(value) => {
                Some(ChangeEvent::set(key.as_str(), value))
            }
            (Some(_), None) => Some(ChangeEvent::delete(key.as_str())),
            _ => None,
        })
        .collect()
}

/// A missing source has no parameters.
fn read_params(path: &Path) -> Result<Params, ProviderError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(parse(&contents)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Params::new()),
        Err(source) => Err(ProviderError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
