//! The provider contract.
//!
//! A provider owns a namespace of keys. It runs a detection loop in
//! [`Provider::main`] that publishes changes until [`Provider::close`] is
//! called from elsewhere, and it accepts external `set` / `del` requests
//! routed to it by the [`Registry`](crate::registry::Registry).
//!
//! Lifecycle: `Created → Running → Stopping → Closed`. A closed provider is
//! never restarted in place; build a new one.

use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::bus::{Bus, Publisher};
use crate::error::ProviderError;

/// Capabilities every provider implements.
///
/// All methods take `&self`: `main` runs on its own task while `close`,
/// `set` and `del` arrive concurrently from the router and the supervisor.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Display name.
    fn name(&self) -> &str;

    /// Key prefixes owned by this provider. Non-empty `args` may replace the
    /// provider's namespace; empty `args` report the current one.
    fn prefixes(&self, args: &[String]) -> Vec<String>;

    /// Detect and publish changes until closed.
    async fn main(&self, args: &[String]) -> Result<(), ProviderError>;

    /// Signal the detection loop to stop and release resources.
    async fn close(&self) -> Result<(), ProviderError>;

    /// Remove an attribute, then publish its deletion.
    async fn del(&self, key: &str) -> Result<(), ProviderError>;

    /// Assign an attribute, then publish its new value.
    async fn set(&self, key: &str, value: &str) -> Result<(), ProviderError>;
}

impl fmt::Debug for dyn Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderState {
    Created,
    Running,
    Stopping,
    Closed,
}

impl fmt::Display for ProviderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Lifecycle bookkeeping shared by the built-in providers.
///
/// Owns the provider's stop token; the provider's [`Publisher`] is bound to
/// the same token, so nothing can be published once `close` has begun.
#[derive(Debug)]
pub struct Lifecycle {
    name: String,
    state: Mutex<ProviderState>,
    stop: CancellationToken,
}

impl Lifecycle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(ProviderState::Created),
            stop: CancellationToken::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// A publisher on `bus` that stops with this lifecycle.
    pub fn publisher(&self, bus: &Bus) -> Publisher {
        bus.publisher(self.stop.clone())
    }

    pub fn state(&self) -> ProviderState {
        *self.lock()
    }

    /// `Created → Running`. Returns the token the detection loop must watch.
    pub fn begin(&self) -> Result<CancellationToken, ProviderError> {
        let mut state = self.lock();
        if *state != ProviderState::Created {
            return Err(ProviderError::NotStartable {
                provider: self.name.clone(),
                state: *state,
            });
        }
        *state = ProviderState::Running;
        Ok(self.stop.clone())
    }

    /// `Running → Stopping`, or straight to `Closed` if never started.
    ///
    /// Returns `false` when the lifecycle was already stopping or closed.
    pub fn stop(&self) -> bool {
        let mut state = self.lock();
        let first = match *state {
            ProviderState::Created => {
                *state = ProviderState::Closed;
                true
            }
            ProviderState::Running => {
                *state = ProviderState::Stopping;
                true
            }
            ProviderState::Stopping | ProviderState::Closed => false,
        };
        drop(state);
        self.stop.cancel();
        first
    }

    /// The detection loop has unwound.
    pub fn finish(&self) {
        *self.lock() = ProviderState::Closed;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProviderState> {
        // The guarded value is a plain enum; a poisoned lock still holds a
        // valid state.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Run `body` between [`Lifecycle::begin`] and [`Lifecycle::finish`].
///
/// The body receives the stop token and must return once it fires.
pub async fn run_detection<F, Fut>(lifecycle: &Lifecycle, body: F) -> Result<(), ProviderError>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: std::future::Future<Output = Result<(), ProviderError>>,
{
    let stop = lifecycle.begin()?;
    tracing::debug!(provider = lifecycle.name(), "provider running");
    let result = body(stop).await;
    lifecycle.finish();
    match &result {
        Ok(()) => tracing::debug!(provider = lifecycle.name(), "provider closed"),
        Err(err) => tracing::warn!(provider = lifecycle.name(), error = %err, "provider exited with error"),
    }
    result
}

/// Treat a publish refused because the provider is stopping as a clean exit.
pub(crate) fn stopped_is_ok(result: Result<(), ProviderError>) -> Result<(), ProviderError> {
    match result {
        Err(ProviderError::Bus(crate::error::BusError::Stopped)) => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_walks_created_running_stopping_closed() {
        let lifecycle = Lifecycle::new("test");
        assert_eq!(lifecycle.state(), ProviderState::Created);

        let stop = lifecycle.begin().expect("begin");
        assert_eq!(lifecycle.state(), ProviderState::Running);
        assert!(!stop.is_cancelled());

        assert!(lifecycle.stop());
        assert_eq!(lifecycle.state(), ProviderState::Stopping);
        assert!(stop.is_cancelled());

        lifecycle.finish();
        assert_eq!(lifecycle.state(), ProviderState::Closed);
    }

    #[test]
    fn second_stop_is_a_no_op() {
        let lifecycle = Lifecycle::new("test");
        lifecycle.begin().expect("begin");
        assert!(lifecycle.stop());
        assert!(!lifecycle.stop());
    }

    #[test]
    fn closed_lifecycle_cannot_begin_again() {
        let lifecycle = Lifecycle::new("test");
        lifecycle.begin().expect("begin");
        lifecycle.stop();
        lifecycle.finish();

        let err = lifecycle.begin().unwrap_err();
        assert!(matches!(
            err,
            ProviderError::NotStartable {
                state: ProviderState::Closed,
                ..
            }
        ));
    }

    #[test]
    fn stop_before_start_closes_immediately() {
        let lifecycle = Lifecycle::new("test");
        assert!(lifecycle.stop());
        assert_eq!(lifecycle.state(), ProviderState::Closed);
        assert!(lifecycle.begin().is_err());
    }

    #[tokio::test]
    async fn run_detection_marks_closed_when_body_returns() {
        let lifecycle = Lifecycle::new("test");
        let result = run_detection(&lifecycle, |stop| async move {
            stop.cancelled().await;
            Ok(())
        });
        lifecycle.stop.cancel();
        result.await.expect("detection");
        assert_eq!(lifecycle.state(), ProviderState::Closed);
    }
}
