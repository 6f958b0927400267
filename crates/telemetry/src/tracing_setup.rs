//! Tracing setup for structured logging.

use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// Tracing configuration.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Log level filter (e.g. "info", "spout=debug")
    pub filter: String,
    /// Whether to output JSON format
    pub json: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

/// Initialize tracing with the given configuration.
pub fn init_tracing(config: TracingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if config.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_target(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(true))
            .init();
    }

    tracing::info!("Tracing initialized with filter: {}", config.filter);
}

/// Initialize tracing from environment variables.
pub fn init_tracing_from_env() {
    let json = std::env::var("LOG_JSON")
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false);

    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

    init_tracing(TracingConfig { filter, json });
}
