//! Provider registry and key router.
//!
//! Providers are registered before any of them starts; afterwards the
//! registry is only read. A key belongs to the provider declaring the
//! longest prefix of it. When two providers declare an equally long matching
//! prefix the one registered first wins; [`Registry::register`] warns about
//! such collisions and [`Registry::conflicts`] lists them.

use std::sync::Arc;

use crate::error::{ProviderError, RouteError, ShutdownError};
use crate::provider::Provider;

struct Entry {
    provider: Arc<dyn Provider>,
    args: Vec<String>,
}

impl Entry {
    fn prefixes(&self) -> Vec<String> {
        self.provider.prefixes(&self.args)
    }
}

/// Two providers declaring the same prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixConflict {
    pub prefix: String,
    /// Provider that wins routing for this prefix.
    pub winner: String,
    pub shadowed: String,
}

#[derive(Default)]
pub struct Registry {
    entries: Vec<Entry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a provider that reports its default prefixes.
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.register_with_args(provider, Vec::new());
    }

    /// Append a provider whose prefixes and `main` receive `args`.
    pub fn register_with_args(&mut self, provider: Arc<dyn Provider>, args: Vec<String>) {
        let entry = Entry { provider, args };
        for prefix in entry.prefixes() {
            if let Some(existing) = self
                .entries
                .iter()
                .find(|e| e.prefixes().iter().any(|p| *p == prefix))
            {
                tracing::warn!(
                    prefix = %prefix,
                    winner = existing.provider.name(),
                    shadowed = entry.provider.name(),
                    "duplicate provider prefix; first registered wins",
                );
            }
        }
        tracing::debug!(
            provider = entry.provider.name(),
            prefixes = ?entry.prefixes(),
            "registered provider",
        );
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered providers with the args they were registered with.
    pub fn providers(&self) -> impl Iterator<Item = (&Arc<dyn Provider>, &[String])> {
        self.entries.iter().map(|e| (&e.provider, e.args.as_slice()))
    }

    /// Every `(prefix, provider name)` pair, in registration order.
    pub fn prefix_table(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .flat_map(|e| {
                let name = e.provider.name().to_string();
                e.prefixes().into_iter().map(move |p| (p, name.clone()))
            })
            .collect()
    }

    /// Identical prefixes declared by more than one provider.
    pub fn conflicts(&self) -> Vec<PrefixConflict> {
        let table = self.prefix_table();
        let mut conflicts = Vec::new();
        for (i, (prefix, winner)) in table.iter().enumerate() {
            if table[..i].iter().any(|(p, _)| p == prefix) {
                continue;
            }
            for (other, shadowed) in &table[i + 1..] {
                if other == prefix && shadowed != winner {
                    conflicts.push(PrefixConflict {
                        prefix: prefix.clone(),
                        winner: winner.clone(),
                        shadowed: shadowed.clone(),
                    });
                }
            }
        }
        conflicts
    }

    /// The provider owning `key`: longest matching prefix, first registered
    /// on a tie.
    pub fn route(&self, key: &str) -> Option<&Arc<dyn Provider>> {
        let mut best: Option<(usize, &Arc<dyn Provider>)> = None;
        for entry in &self.entries {
            for prefix in entry.prefixes() {
                if !key.starts_with(prefix.as_str()) {
                    continue;
                }
                let len = prefix.chars().count();
                if best.map_or(true, |(best_len, _)| len > best_len) {
                    best = Some((len, &entry.provider));
                }
            }
        }
        best.map(|(_, provider)| provider)
    }

    /// Route `key` and assign it through its owner.
    pub async fn set(&self, key: &str, value: &str) -> Result<(), RouteError> {
        let provider = self.owner(key)?;
        provider
            .set(key, value)
            .await
            .map_err(|source| routed_failure(provider.as_ref(), key, source))
    }

    /// Route `key` and remove it through its owner.
    pub async fn del(&self, key: &str) -> Result<(), RouteError> {
        let provider = self.owner(key)?;
        provider
            .del(key)
            .await
            .map_err(|source| routed_failure(provider.as_ref(), key, source))
    }

    /// Close every provider, continuing past failures.
    pub async fn shutdown(&self) -> Result<(), ShutdownError> {
        let mut failures = Vec::new();
        for entry in &self.entries {
            let name = entry.provider.name().to_string();
            match entry.provider.close().await {
                Ok(()) => tracing::debug!(provider = %name, "provider close requested"),
                Err(err) => {
                    tracing::error!(provider = %name, error = %err, "provider close failed");
                    failures.push((name, err));
                }
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ShutdownError { failures })
        }
    }

    fn owner(&self, key: &str) -> Result<&Arc<dyn Provider>, RouteError> {
        self.route(key).ok_or_else(|| {
            tracing::warn!(key = %key, "no provider owns key");
            RouteError::NoOwner {
                key: key.to_string(),
            }
        })
    }
}

fn routed_failure(provider: &dyn Provider, key: &str, source: ProviderError) -> RouteError {
    tracing::warn!(provider = provider.name(), key = %key, error = %source, "routed request refused");
    RouteError::Provider {
        provider: provider.name().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    /// Records routed calls; refuses keys under `ro.`.
    struct Recorder {
        name: String,
        prefixes: Vec<String>,
        calls: Mutex<Vec<String>>,
        close_fails: bool,
    }

    impl Recorder {
        fn new(name: &str, prefixes: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                prefixes: prefixes.iter().map(|p| p.to_string()).collect(),
                calls: Mutex::new(Vec::new()),
                close_fails: false,
            })
        }

        fn failing_close(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                prefixes: vec![format!("{name}.")],
                calls: Mutex::new(Vec::new()),
                close_fails: true,
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Provider for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn prefixes(&self, args: &[String]) -> Vec<String> {
            if args.is_empty() {
                self.prefixes.clone()
            } else {
                args.to_vec()
            }
        }

        async fn main(&self, _args: &[String]) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn close(&self) -> Result<(), ProviderError> {
            self.calls.lock().unwrap().push("close".to_string());
            if self.close_fails {
                return Err(ProviderError::Failed("descriptor busy".to_string()));
            }
            Ok(())
        }

        async fn del(&self, key: &str) -> Result<(), ProviderError> {
            if key.starts_with("ro.") {
                return Err(ProviderError::read_only(key));
            }
            self.calls.lock().unwrap().push(format!("del {key}"));
            Ok(())
        }

        async fn set(&self, key: &str, value: &str) -> Result<(), ProviderError> {
            if key.starts_with("ro.") {
                return Err(ProviderError::read_only(key));
            }
            self.calls.lock().unwrap().push(format!("set {key}={value}"));
            Ok(())
        }
    }

    fn name_of(provider: Option<&Arc<dyn Provider>>) -> Option<&str> {
        provider.map(|p| p.name())
    }

    #[test]
    fn disjoint_prefixes_route_to_unique_owner() {
        let mut registry = Registry::new();
        registry.register(Recorder::new("cmdline", &["cmdline"]));
        registry.register(Recorder::new("machine", &["machine"]));

        assert_eq!(name_of(registry.route("cmdline.boot")), Some("cmdline"));
        assert_eq!(name_of(registry.route("machine")), Some("machine"));
        assert_eq!(name_of(registry.route("uptime")), None);
    }

    #[test]
    fn longest_prefix_wins_regardless_of_order() {
        let mut registry = Registry::new();
        registry.register(Recorder::new("long", &["a.b"]));
        registry.register(Recorder::new("short", &["a"]));
        assert_eq!(name_of(registry.route("a.b.c")), Some("long"));
        assert_eq!(name_of(registry.route("a.c")), Some("short"));

        let mut reversed = Registry::new();
        reversed.register(Recorder::new("short", &["a"]));
        reversed.register(Recorder::new("long", &["a.b"]));
        assert_eq!(name_of(reversed.route("a.b.c")), Some("long"));
    }

    #[test]
    fn equal_length_collision_goes_to_first_registered_and_is_reported() {
        let mut registry = Registry::new();
        registry.register(Recorder::new("first", &["fan."]));
        registry.register(Recorder::new("second", &["fan."]));

        assert_eq!(name_of(registry.route("fan.front")), Some("first"));
        assert_eq!(
            registry.conflicts(),
            vec![PrefixConflict {
                prefix: "fan.".to_string(),
                winner: "first".to_string(),
                shadowed: "second".to_string(),
            }]
        );
    }

    #[test]
    fn registration_args_replace_prefixes() {
        let mut registry = Registry::new();
        registry.register_with_args(
            Recorder::new("netlink", &["lo."]),
            vec!["eth0.".to_string(), "eth1.".to_string()],
        );
        assert_eq!(name_of(registry.route("eth1.mtu")), Some("netlink"));
        assert_eq!(name_of(registry.route("lo.mtu")), None);
        assert!(registry.conflicts().is_empty());
    }

    #[tokio::test]
    async fn set_and_del_delegate_to_owner() {
        let fan = Recorder::new("fan", &["fan."]);
        let mut registry = Registry::new();
        registry.register(fan.clone());

        registry.set("fan.front", "80").await.expect("set");
        registry.del("fan.rear").await.expect("del");
        assert_eq!(fan.calls(), vec!["set fan.front=80", "del fan.rear"]);
    }

    #[tokio::test]
    async fn unowned_key_is_no_owner() {
        let registry = Registry::new();
        let err = registry.set("psu1.page", "0").await.unwrap_err();
        assert!(matches!(err, RouteError::NoOwner { ref key } if key == "psu1.page"));
        assert!(registry.del("psu1.page").await.is_err());
    }

    #[tokio::test]
    async fn provider_refusal_is_read_only() {
        let mut registry = Registry::new();
        registry.register(Recorder::new("ro", &["ro."]));
        let err = registry.del("ro.serial").await.unwrap_err();
        assert!(matches!(
            err.provider_error(),
            Some(ProviderError::ReadOnly { key }) if key == "ro.serial"
        ));
    }

    #[tokio::test]
    async fn shutdown_closes_every_provider_and_aggregates_failures() {
        let first = Recorder::failing_close("first");
        let middle = Recorder::new("middle", &["middle."]);
        let last = Recorder::failing_close("last");
        let mut registry = Registry::new();
        registry.register(first.clone());
        registry.register(middle.clone());
        registry.register(last.clone());

        let err = registry.shutdown().await.unwrap_err();
        let failed: Vec<_> = err.failures.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(failed, vec!["first", "last"]);
        for recorder in [&first, &middle, &last] {
            assert_eq!(recorder.calls(), vec!["close"]);
        }
        assert!(err.to_string().starts_with("2 provider(s) failed to close"));
    }
}
