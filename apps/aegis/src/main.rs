use std::path::PathBuf;
use std::sync::Arc;

use aegis_provider_core::ProviderRegistry;
use aegis_router::config::ConfigDocument;
use aegis_router::state::AppState;
use aegis_router::upstream::{UpstreamClientConfig, WreqUpstreamClient};
use anyhow::Context;
use clap::Parser;

mod cli;

use cli::CliArgs;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    let config_path = args.config.as_deref().map(PathBuf::from);
    let mut loaded = match &config_path {
        Some(path) => ConfigDocument::from_path(path)
            .with_context(|| format!("loading config document from {}", path.display()))?
            .into_loaded()
            .context("converting config document")?,
        None => ConfigDocument::default()
            .into_loaded()
            .context("applying default settings")?,
    };

    if let Some(host) = args.host {
        loaded.settings.host = host;
    }
    if let Some(port) = args.port {
        loaded.settings.port = port;
    }
    if let Some(log_level) = args.log_level {
        loaded.settings.log_level = log_level;
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(loaded.settings.log_level.clone()))
        .init();

    let registry = Arc::new(ProviderRegistry::new(loaded.providers, loaded.routes));
    let upstream_client: Arc<dyn aegis_router::upstream::UpstreamClient> =
        Arc::new(WreqUpstreamClient::new(UpstreamClientConfig::default()).context("building upstream client")?);

    let bind = format!("{}:{}", loaded.settings.host, loaded.settings.port);
    let state = AppState::new(loaded.settings, registry, upstream_client, config_path);
    let app = aegis_router::http::router(state);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    tracing::info!(%bind, "aegis listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving")?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
