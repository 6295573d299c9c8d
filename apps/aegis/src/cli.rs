use clap::Parser;

/// Command-line surface for the `aegis` binary. Every field can also be set
/// through its matching `AEGIS_*` environment variable; the CLI flag wins
/// when both are present.
#[derive(Debug, Clone, Parser)]
#[command(name = "aegis", version, about = "Anthropic Messages API reverse proxy")]
pub struct CliArgs {
    /// Path to the YAML config document (settings/providers/model_routes).
    #[arg(long, env = "AEGIS_CONFIG")]
    pub config: Option<String>,

    /// Bind host, overriding the config document's `settings.host`.
    #[arg(long, env = "AEGIS_HOST")]
    pub host: Option<String>,

    /// Bind port, overriding the config document's `settings.port`.
    #[arg(long, env = "AEGIS_PORT")]
    pub port: Option<u16>,

    /// Log level passed to `tracing_subscriber`'s `EnvFilter`, overriding the
    /// config document's `settings.log_level`.
    #[arg(long, env = "AEGIS_LOG_LEVEL")]
    pub log_level: Option<String>,
}
