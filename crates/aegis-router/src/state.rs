//! Shared application state: the provider registry, health tracker, dedup
//! registry, sticky map and auth provider, plus the current settings, all
//! held behind an `Arc` so the axum handlers and the dispatch loop can share
//! one instance.

use std::path::PathBuf;
use std::sync::Arc;

use aegis_common::Settings;
use aegis_core::{AuthProvider, DedupRegistry, NoopAuth, StaticKeyAuth, StickyMap};
use aegis_provider_core::{HealthTracker, ProviderRegistry};
use arc_swap::ArcSwap;

use crate::upstream::UpstreamClient;

pub struct AppState {
    pub settings: ArcSwap<Settings>,
    pub registry: Arc<ProviderRegistry>,
    pub health: Arc<HealthTracker>,
    pub dedup: Arc<DedupRegistry>,
    pub sticky: Arc<StickyMap>,
    pub auth: ArcSwap<Arc<dyn AuthProvider>>,
    pub upstream_client: Arc<dyn UpstreamClient>,
    /// Source of the config document, re-read by `POST /providers/reload`.
    /// `None` when the process was started without a config file (settings
    /// supplied entirely by defaults/env), in which case reload is a no-op.
    pub config_path: Option<PathBuf>,
}

impl AppState {
    pub fn new(
        settings: Settings,
        registry: Arc<ProviderRegistry>,
        upstream_client: Arc<dyn UpstreamClient>,
        config_path: Option<PathBuf>,
    ) -> Arc<Self> {
        let health = Arc::new(HealthTracker::new(
            settings.cooldown(),
            settings.unhealthy_threshold,
            settings.unhealthy_window(),
            settings.unhealthy_reset_timeout(),
        ));
        let dedup = Arc::new(DedupRegistry::new(settings.stuck_request_ttl()));
        let sticky = Arc::new(StickyMap::new(settings.sticky_window()));
        let auth: Arc<dyn AuthProvider> = build_auth_provider(&settings);

        Arc::new(Self {
            settings: ArcSwap::from_pointee(settings),
            registry,
            health,
            dedup,
            sticky,
            auth: ArcSwap::from_pointee(auth),
            upstream_client,
            config_path,
        })
    }

    /// Replaces the live settings and, if the auth configuration changed,
    /// the auth provider. Does not touch the provider registry, health
    /// tracker, dedup registry or sticky map, all of which outlive reloads.
    pub fn apply_settings(&self, settings: Settings) {
        let auth = build_auth_provider(&settings);
        self.auth.store(Arc::new(auth));
        self.settings.store(Arc::new(settings));
    }
}

fn build_auth_provider(settings: &Settings) -> Arc<dyn AuthProvider> {
    if !settings.auth.enabled {
        return Arc::new(NoopAuth);
    }
    Arc::new(StaticKeyAuth::new(
        settings.auth.api_key.clone(),
        settings.auth.exempt_paths.clone(),
    ))
}
