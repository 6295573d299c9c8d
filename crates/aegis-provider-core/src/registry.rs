//! The live provider/route configuration, held as a snapshot that is swapped
//! in wholesale on reload so in-flight requests never see a half-updated
//! configuration.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::provider::ProviderDescriptor;
use crate::route::{RouteEntry, Router};

pub struct ProviderRegistrySnapshot {
    providers: Vec<ProviderDescriptor>,
    router: Router,
}

impl ProviderRegistrySnapshot {
    pub fn new(providers: Vec<ProviderDescriptor>, routes: Vec<RouteEntry>) -> Self {
        Self {
            providers,
            router: Router::new(routes),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ProviderDescriptor> {
        self.providers.iter().find(|provider| provider.name == name)
    }

    pub fn providers(&self) -> &[ProviderDescriptor] {
        &self.providers
    }

    pub fn router(&self) -> &Router {
        &self.router
    }
}

pub struct ProviderRegistry {
    snapshot: ArcSwap<ProviderRegistrySnapshot>,
}

impl ProviderRegistry {
    pub fn new(providers: Vec<ProviderDescriptor>, routes: Vec<RouteEntry>) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(ProviderRegistrySnapshot::new(providers, routes)),
        }
    }

    pub fn load(&self) -> Arc<ProviderRegistrySnapshot> {
        self.snapshot.load_full()
    }

    /// Atomically replaces the whole provider/route set. Requests that
    /// already loaded the previous snapshot keep running against it.
    pub fn reload(&self, providers: Vec<ProviderDescriptor>, routes: Vec<RouteEntry>) {
        self.snapshot
            .store(Arc::new(ProviderRegistrySnapshot::new(providers, routes)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{AuthSpec, ProtocolKind};

    fn provider(name: &str) -> ProviderDescriptor {
        ProviderDescriptor {
            name: name.to_string(),
            protocol: ProtocolKind::Anthropic,
            base_url: "https://example.invalid".to_string(),
            auth: AuthSpec::None,
            enabled: true,
            timeout_seconds: None,
        }
    }

    fn route(pattern: &str, provider: &str) -> RouteEntry {
        RouteEntry {
            pattern: pattern.to_string(),
            provider: provider.to_string(),
            model: "passthrough".to_string(),
            priority: 0,
            enabled: true,
        }
    }

    #[test]
    fn reload_is_visible_to_new_loads_only() {
        let registry = ProviderRegistry::new(vec![provider("a")], vec![route("*", "a")]);
        let before = registry.load();
        assert!(before.get("a").is_some());
        assert!(before.get("b").is_none());

        registry.reload(vec![provider("b")], vec![route("*", "b")]);
        let after = registry.load();
        assert!(after.get("b").is_some());
        assert!(before.get("b").is_none());
    }
}
