//! Sideline-capable Kafka streaming spout.
//!
//! Standalone runner: consumes the configured firehose topic, resumes any
//! persisted sideline requests, and emits tuples to stdout, acking each one
//! as it is printed.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info};

use broker::{BrokerConsumerFactory, KafkaConfig, KafkaConsumerFactory};
use persistence::{PersistenceConfig, PersistenceManager, RedisPersistence};
use spout::{
    KafkaStreamSpout, KeyPrefixStepCodec, SidelineHandler, SpoutConfig, SpoutCoordinator,
    VirtualSpout,
};
use spout_core::{FilterChain, Utf8Deserializer};
use telemetry::init_tracing_from_env;

/// Application configuration.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
struct Config {
    #[serde(default)]
    kafka: KafkaConfig,
    #[serde(default)]
    persistence: PersistenceConfig,
    #[serde(default)]
    spout: SpoutConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install rustls crypto provider BEFORE any TLS operations
    // rustls 0.23+ requires explicit crypto provider selection
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing_from_env();

    info!("Starting sideline spout v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;
    info!(
        brokers = ?config.kafka.brokers,
        topic = %config.kafka.topic,
        persistence_root = config.persistence.root.as_deref().unwrap_or("none"),
        "Loaded configuration"
    );

    // Durable state store
    let persistence: Arc<dyn PersistenceManager> =
        Arc::new(RedisPersistence::new(config.persistence.clone()));
    persistence
        .open()
        .await
        .context("Failed to open persistence manager")?;

    // Firehose virtual spout, resuming from any persisted positions
    let firehose_id = config.spout.firehose_consumer_id();
    let starting = persistence
        .retrieve_consumer_state(&firehose_id)
        .await
        .context("Failed to retrieve firehose state")?;

    let consumer_factory: Arc<dyn BrokerConsumerFactory> =
        Arc::new(KafkaConsumerFactory::new(config.kafka.clone()));
    let consumer = consumer_factory
        .create(&firehose_id, starting)
        .await
        .context("Failed to create firehose consumer")?;

    let deserializer = Arc::new(Utf8Deserializer);
    let firehose_filters = Arc::new(FilterChain::new());
    let firehose = VirtualSpout::new(
        firehose_id,
        consumer,
        deserializer.clone(),
        firehose_filters.clone(),
        persistence.clone(),
        None,
    );
    let firehose_state = firehose.state_handle();

    let coordinator = SpoutCoordinator::new(firehose, config.spout.clone());

    // Re-apply persisted sideline requests before opening
    let handler = SidelineHandler::new(
        config.spout.clone(),
        persistence.clone(),
        Arc::new(KeyPrefixStepCodec),
        consumer_factory,
        deserializer,
        firehose_filters,
        firehose_state,
        coordinator.clone(),
    );
    handler
        .open()
        .await
        .context("Failed to resume sideline requests")?;

    let mut stream_spout = KafkaStreamSpout::new(coordinator, config.spout.clone());
    stream_spout
        .open()
        .await
        .context("Failed to open stream spout")?;

    tokio::pin! {
        let shutdown = shutdown_signal();
    }

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            message = stream_spout.next_tuple() => {
                let Some(message) = message else { continue };
                let id = message.id.to_value();
                println!(
                    "{}",
                    serde_json::json!({"id": &id, "values": message.values})
                );
                if let Err(e) = stream_spout.ack(Some(&id)) {
                    error!(error = %e, "Failed to ack tuple");
                }
            }
        }
    }

    info!("Shutting down...");
    stream_spout.close().await;
    if let Err(e) = persistence.close().await {
        error!(error = %e, "Failed to close persistence manager");
    }

    info!("Shutdown complete");
    Ok(())
}

/// Load configuration from files and environment.
fn load_config() -> Result<Config> {
    let config = config::Config::builder()
        // Start with defaults
        .add_source(config::Config::try_from(&Config::default())?)
        // Load from config file if exists
        .add_source(
            config::File::with_name("config/default")
                .required(false)
                .format(config::FileFormat::Toml),
        )
        // Override with environment variables
        .add_source(
            config::Environment::default()
                .separator("__")
                .prefix("SPOUT")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    let mut config: Config = config
        .try_deserialize()
        .context("Failed to deserialize configuration")?;

    // Manual overrides for nested config from environment
    // The config crate's nested parsing doesn't work reliably with underscored field names
    if let Ok(brokers) = std::env::var("SPOUT_KAFKA_BROKERS") {
        config.kafka.brokers = brokers.split(',').map(|s| s.trim().to_string()).collect();
    }
    if let Ok(topic) = std::env::var("SPOUT_KAFKA_TOPIC") {
        config.kafka.topic = topic;
    }
    if let Ok(servers) = std::env::var("SPOUT_PERSISTENCE_SERVERS") {
        config.persistence.servers = servers.split(',').map(|s| s.trim().to_string()).collect();
    }
    if let Ok(root) = std::env::var("SPOUT_PERSISTENCE_ROOT") {
        config.persistence.root = Some(root);
    }

    Ok(config)
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received terminate signal");
        }
    }
}
