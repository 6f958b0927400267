//! Host topology facade.
//!
//! The host drives the spout through `open` / `next_tuple` / `ack` / `fail`
//! / `close`; tuple ids cross the boundary as JSON values.

use spout_core::{MessageId, Result, StreamMessage};
use telemetry::metrics;
use tokio::sync::mpsc;
use tracing::info;

use crate::config::SpoutConfig;
use crate::coordinator::SpoutCoordinator;

/// Spout component as seen by the host topology.
pub struct KafkaStreamSpout {
    config: SpoutConfig,
    coordinator: SpoutCoordinator,
    output: Option<mpsc::Receiver<StreamMessage>>,
}

impl KafkaStreamSpout {
    pub fn new(coordinator: SpoutCoordinator, config: SpoutConfig) -> Self {
        Self {
            config,
            coordinator,
            output: None,
        }
    }

    pub fn coordinator(&self) -> &SpoutCoordinator {
        &self.coordinator
    }

    /// Creates the output queue and opens the coordinator; returns once
    /// every initial virtual spout is running.
    pub async fn open(&mut self) -> Result<()> {
        let (tx, rx) = mpsc::channel(self.config.output_queue_size);
        self.output = Some(rx);
        self.coordinator.open(tx).await?;
        info!("Stream spout open");
        Ok(())
    }

    /// Dequeues one message, waiting at most the configured short interval.
    pub async fn next_tuple(&mut self) -> Option<StreamMessage> {
        let rx = self.output.as_mut()?;
        match tokio::time::timeout(self.config.tuple_wait(), rx.recv()).await {
            Ok(Some(message)) => {
                metrics().queue_depth.set(rx.len() as u64);
                Some(message)
            }
            _ => None,
        }
    }

    /// Forwards an ack for a tuple id. `None` is silently ignored; a value
    /// that is not a message identifier fails with `InvalidArgument`.
    pub fn ack(&self, id: Option<&serde_json::Value>) -> Result<()> {
        let Some(value) = id else {
            return Ok(());
        };
        self.coordinator.ack(MessageId::from_value(value)?);
        Ok(())
    }

    /// Forwards a fail for a tuple id, with the same id handling as
    /// [`ack`](Self::ack).
    pub fn fail(&self, id: Option<&serde_json::Value>) -> Result<()> {
        let Some(value) = id else {
            return Ok(());
        };
        self.coordinator.fail(MessageId::from_value(value)?);
        Ok(())
    }

    pub async fn close(&mut self) {
        self.coordinator.close().await;
        self.output = None;
        info!("Stream spout closed");
    }
}
