//! Static attribute tables.
//!
//! Each `attrs` entry in the agent configuration becomes one provider that
//! publishes its values on start. Existing keys may be reassigned when the
//! table is `writable`; any existing key may be deleted.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use machina_core::{AttrTable, Key};

use crate::bus::{Bus, Publisher};
use crate::error::ProviderError;
use crate::provider::{run_detection, stopped_is_ok, Lifecycle, Provider};

#[derive(Debug)]
pub struct AttrsProvider {
    lifecycle: Lifecycle,
    publisher: Publisher,
    prefixes: Mutex<Vec<String>>,
    values: Mutex<BTreeMap<String, String>>,
    writable: bool,
}

impl AttrsProvider {
    pub fn new(name: impl Into<String>, table: &AttrTable, bus: &Bus) -> Self {
        let lifecycle = Lifecycle::new(name);
        let publisher = lifecycle.publisher(bus);
        let values = table
            .values
            .iter()
            .filter(|(key, _)| {
                let valid = Key::is_valid(key);
                if !valid {
                    tracing::warn!(table = lifecycle.name(), key = %key, "ignoring unusable attribute key");
                }
                valid
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        Self {
            lifecycle,
            publisher,
            prefixes: Mutex::new(table.prefixes.clone()),
            values: Mutex::new(values),
            writable: table.writable,
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        lock(&self.values).get(key).cloned()
    }
}

#[async_trait]
impl Provider for AttrsProvider {
    fn name(&self) -> &str {
        self.lifecycle.name()
    }

    /// Non-empty `args` replace the table's prefixes.
    fn prefixes(&self, args: &[String]) -> Vec<String> {
        let mut prefixes = lock(&self.prefixes);
        if !args.is_empty() {
            *prefixes = args.to_vec();
        }
        prefixes.clone()
    }

    async fn main(&self, _args: &[String]) -> Result<(), ProviderError> {
        run_detection(&self.lifecycle, |stop| async move {
            let snapshot = lock(&self.values).clone();
            for (key, value) in snapshot {
                let published = self.publisher.publish(key, value).await;
                stopped_is_ok(published.map_err(ProviderError::from))?;
            }
            stop.cancelled().await;
            Ok(())
        })
        .await
    }

    async fn close(&self) -> Result<(), ProviderError> {
        self.lifecycle.stop();
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), ProviderError> {
        if self.publisher.is_stopped() {
            return Err(crate::error::BusError::Stopped.into());
        }
        if !lock(&self.values).contains_key(key) {
            return Err(ProviderError::read_only(key));
        }
        self.publisher.delete(key).await?;
        lock(&self.values).remove(key);
        Ok(())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), ProviderError> {
        if value.contains('\n') {
            return Err(ProviderError::InvalidValue {
                key: key.to_string(),
                value: value.to_string(),
                reason: "values are single-line".to_string(),
            });
        }
        if self.publisher.is_stopped() {
            return Err(crate::error::BusError::Stopped.into());
        }
        if !self.writable || !lock(&self.values).contains_key(key) {
            return Err(ProviderError::read_only(key));
        }
        // Committed only once the store has the new value.
        self.publisher.publish(key, value).await?;
        if let Some(current) = lock(&self.values).get_mut(key) {
            *current = value.to_string();
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use machina_core::ChangeEvent;

    use crate::error::BusError;

    fn table(writable: bool) -> AttrTable {
        AttrTable {
            prefixes: vec!["unit.".to_string()],
            values: BTreeMap::from([
                ("unit.fan".to_string(), "% max speed".to_string()),
                ("unit.temperature".to_string(), "°C".to_string()),
            ]),
            writable,
        }
    }

    #[tokio::test]
    async fn publishes_table_on_start() {
        let (bus, mut rx) = Bus::new();
        let provider = Arc::new(AttrsProvider::new("units", &table(false), &bus));
        let task = {
            let provider = provider.clone();
            tokio::spawn(async move { provider.main(&[]).await })
        };

        assert_eq!(
            rx.recv().await.unwrap(),
            ChangeEvent::set("unit.fan", "% max speed")
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            ChangeEvent::set("unit.temperature", "°C")
        );

        provider.close().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("main returned")
            .expect("join")
            .expect("main");
    }

    #[tokio::test]
    async fn writable_table_accepts_set_on_known_key() {
        let (bus, mut rx) = Bus::new();
        let provider = Arc::new(AttrsProvider::new("units", &table(true), &bus));

        let setter = {
            let provider = provider.clone();
            tokio::spawn(async move { provider.set("unit.temperature", "°F").await })
        };
        assert_eq!(
            rx.recv().await.unwrap(),
            ChangeEvent::set("unit.temperature", "°F")
        );
        setter.await.unwrap().expect("set");
        assert_eq!(provider.get("unit.temperature").as_deref(), Some("°F"));

        let err = provider.set("unit.voltage", "V").await.unwrap_err();
        assert!(matches!(err, ProviderError::ReadOnly { .. }));
    }

    #[tokio::test]
    async fn read_only_table_refuses_set_but_allows_del() {
        let (bus, mut rx) = Bus::new();
        let provider = Arc::new(AttrsProvider::new("units", &table(false), &bus));

        let err = provider.set("unit.fan", "rpm").await.unwrap_err();
        assert!(matches!(err, ProviderError::ReadOnly { ref key } if key == "unit.fan"));
        assert_eq!(provider.get("unit.fan").as_deref(), Some("% max speed"));

        let deleter = {
            let provider = provider.clone();
            tokio::spawn(async move { provider.del("unit.fan").await })
        };
        assert_eq!(rx.recv().await.unwrap(), ChangeEvent::delete("unit.fan"));
        deleter.await.unwrap().expect("del");
        assert_eq!(provider.get("unit.fan"), None);

        let err = provider.del("unit.fan").await.unwrap_err();
        assert!(matches!(err, ProviderError::ReadOnly { .. }));
    }

    #[tokio::test]
    async fn multi_line_value_is_invalid() {
        let (bus, _rx) = Bus::new();
        let provider = AttrsProvider::new("units", &table(true), &bus);
        let err = provider.set("unit.fan", "a\nb").await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidValue { .. }));
    }

    #[tokio::test]
    async fn closed_provider_refuses_mutation_without_changing_state() {
        let (bus, _rx) = Bus::new();
        let provider = AttrsProvider::new("units", &table(true), &bus);
        provider.close().await.unwrap();

        let err = provider.set("unit.fan", "rpm").await.unwrap_err();
        assert!(matches!(err, ProviderError::Bus(BusError::Stopped)));
        assert_eq!(provider.get("unit.fan").as_deref(), Some("% max speed"));
        assert!(provider.del("unit.fan").await.is_err());
        assert!(provider.get("unit.fan").is_some());
    }

    #[tokio::test]
    async fn close_during_publish_leaves_values_unchanged() {
        let (bus, _rx) = Bus::new();
        let provider = Arc::new(AttrsProvider::new("units", &table(true), &bus));

        let setter = {
            let provider = provider.clone();
            tokio::spawn(async move { provider.set("unit.fan", "rpm").await })
        };
        let deleter = {
            let provider = provider.clone();
            tokio::spawn(async move { provider.del("unit.temperature").await })
        };
        tokio::task::yield_now().await;
        provider.close().await.unwrap();

        let set = setter.await.unwrap();
        let del = deleter.await.unwrap();
        assert!(matches!(set, Err(ProviderError::Bus(BusError::Stopped))));
        assert!(matches!(del, Err(ProviderError::Bus(BusError::Stopped))));
        assert_eq!(provider.get("unit.fan").as_deref(), Some("% max speed"));
        assert_eq!(provider.get("unit.temperature").as_deref(), Some("°C"));
    }

    #[test]
    fn unusable_configured_keys_are_dropped() {
        let (bus, _rx) = Bus::new();
        let mut table = table(false);
        table
            .values
            .insert("unit.bad: key".to_string(), "x".to_string());
        let provider = AttrsProvider::new("units", &table, &bus);
        assert_eq!(provider.get("unit.bad: key"), None);
        assert!(provider.get("unit.fan").is_some());
    }

    #[test]
    fn args_replace_prefixes() {
        let (bus, _rx) = Bus::new();
        let provider = AttrsProvider::new("vnet", &table(false), &bus);
        assert_eq!(provider.prefixes(&[]), vec!["unit."]);
        let replaced = provider.prefixes(&["eth-".to_string(), "dp-".to_string()]);
        assert_eq!(replaced, vec!["eth-", "dp-"]);
        assert_eq!(provider.prefixes(&[]), vec!["eth-", "dp-"]);
    }
}
