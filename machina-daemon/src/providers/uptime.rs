//! Uptime poller.
//!
//! Publishes `boot.time` once, as RFC 3339 UTC, then `uptime` on every tick
//! in a short human form such as `3d 4h 5m`.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};

use crate::bus::{Bus, Publisher};
use crate::error::ProviderError;
use crate::provider::{run_detection, stopped_is_ok, Lifecycle, Provider};

pub const UPTIME_KEY: &str = "uptime";
pub const BOOT_TIME_KEY: &str = "boot.time";

const PROC_UPTIME: &str = "/proc/uptime";

#[derive(Debug)]
pub struct UptimeProvider {
    lifecycle: Lifecycle,
    publisher: Publisher,
    interval: Duration,
    source: PathBuf,
    /// Fallback origin when the source can't be read.
    created: Instant,
}

impl UptimeProvider {
    pub fn new(interval: Duration, bus: &Bus) -> Self {
        let lifecycle = Lifecycle::new("uptime");
        let publisher = lifecycle.publisher(bus);
        Self {
            lifecycle,
            publisher,
            interval,
            source: PathBuf::from(PROC_UPTIME),
            created: Instant::now(),
        }
    }

    /// Read uptime from `source` (same format as `/proc/uptime`).
    pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.source = source.into();
        self
    }

    fn uptime(&self) -> Duration {
        std::fs::read_to_string(&self.source)
            .ok()
            .and_then(|contents| parse_proc_uptime(&contents))
            .unwrap_or_else(|| self.created.elapsed())
    }

    async fn publish_boot_time(&self) -> Result<(), ProviderError> {
        let uptime = chrono::Duration::from_std(self.uptime())
            .unwrap_or_else(|_| chrono::Duration::zero());
        let boot = Utc::now() - uptime;
        self.publisher
            .publish(
                BOOT_TIME_KEY,
                boot.to_rfc3339_opts(SecondsFormat::Secs, true),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Provider for UptimeProvider {
    fn name(&self) -> &str {
        self.lifecycle.name()
    }

    fn prefixes(&self, _args: &[String]) -> Vec<String> {
        vec![UPTIME_KEY.to_string(), BOOT_TIME_KEY.to_string()]
    }

    async fn main(&self, _args: &[String]) -> Result<(), ProviderError> {
        run_detection(&self.lifecycle, |stop| async move {
            stopped_is_ok(self.publish_boot_time().await)?;

            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let published = self
                            .publisher
                            .publish(UPTIME_KEY, humanize(self.uptime()))
                            .await
                            .map_err(ProviderError::from);
                        stopped_is_ok(published)?;
                    }
                }
            }
            Ok(())
        })
        .await
    }

    async fn close(&self) -> Result<(), ProviderError> {
        self.lifecycle.stop();
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), ProviderError> {
        Err(ProviderError::read_only(key))
    }

    async fn set(&self, key: &str, _value: &str) -> Result<(), ProviderError> {
        Err(ProviderError::read_only(key))
    }
}

/// First field of `/proc/uptime`: seconds since boot.
pub fn parse_proc_uptime(contents: &str) -> Option<Duration> {
    let secs: f64 = contents.split_whitespace().next()?.parse().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}

/// `45s`, `5m`, `4h 5m`, `3d 4h 5m`. Leading zero units are omitted.
pub fn humanize(uptime: Duration) -> String {
    let total = uptime.as_secs();
    if total < 60 {
        return format!("{total}s");
    }
    let days = total / 86_400;
    let hours = total % 86_400 / 3_600;
    let minutes = total % 3_600 / 60;
    if days > 0 {
        format!("{days}d {hours}h {minutes}m")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::DateTime;
    use machina_core::ChangeEvent;
    use tempfile::TempDir;

    #[test]
    fn humanize_drops_leading_zero_units() {
        assert_eq!(humanize(Duration::from_secs(0)), "0s");
        assert_eq!(humanize(Duration::from_secs(59)), "59s");
        assert_eq!(humanize(Duration::from_secs(60)), "1m");
        assert_eq!(humanize(Duration::from_secs(3_600 + 5 * 60)), "1h 5m");
        assert_eq!(humanize(Duration::from_secs(86_400)), "1d 0h 0m");
        assert_eq!(
            humanize(Duration::from_secs(3 * 86_400 + 4 * 3_600 + 5 * 60 + 7)),
            "3d 4h 5m"
        );
    }

    #[test]
    fn parses_proc_uptime_first_field() {
        assert_eq!(
            parse_proc_uptime("350735.47 234388.90\n"),
            Some(Duration::from_secs_f64(350735.47))
        );
        assert_eq!(parse_proc_uptime(""), None);
        assert_eq!(parse_proc_uptime("soon"), None);
        assert_eq!(parse_proc_uptime("-1 0"), None);
    }

    #[tokio::test]
    async fn publishes_boot_time_then_uptime() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("uptime");
        std::fs::write(&source, "3723.00 100.00\n").unwrap();

        let (bus, mut rx) = Bus::new();
        let provider = Arc::new(
            UptimeProvider::new(Duration::from_secs(3600), &bus).with_source(&source),
        );
        let task = {
            let provider = provider.clone();
            tokio::spawn(async move { provider.main(&[]).await })
        };

        let boot = rx.recv().await.expect("boot.time");
        let ChangeEvent::Set { key, value } = boot else {
            panic!("expected a set, got {boot}");
        };
        assert_eq!(key.as_str(), BOOT_TIME_KEY);
        let boot = DateTime::parse_from_rfc3339(&value).expect("rfc3339");
        let age = Utc::now().signed_duration_since(boot).num_seconds();
        assert!((3_720..=3_730).contains(&age), "boot {age}s ago");

        // The first tick fires immediately.
        assert_eq!(
            rx.recv().await.expect("uptime"),
            ChangeEvent::set(UPTIME_KEY, "1h 2m")
        );

        provider.close().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("main returned")
            .expect("join")
            .expect("main");
    }

    #[tokio::test]
    async fn close_ends_the_interval_loop() {
        let (bus, mut rx) = Bus::new();
        let provider = Arc::new(
            UptimeProvider::new(Duration::from_secs(3600), &bus)
                .with_source("/nonexistent/uptime"),
        );
        let task = {
            let provider = provider.clone();
            tokio::spawn(async move { provider.main(&[]).await })
        };
        // Drain boot.time and the immediate tick; the loop then waits an hour.
        rx.recv().await.expect("boot.time");
        rx.recv().await.expect("uptime");

        provider.close().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("main returned")
            .expect("join")
            .expect("main");
    }
}
