//! Sideline handling: translates START/RESUME/STOP triggers into virtual
//! spout lifecycle events on the coordinator.

use std::sync::Arc;

use broker::BrokerConsumerFactory;
use persistence::{PersistenceManager, SidelineRequestRecord};
use serde::{Deserialize, Serialize};
use spout_core::{
    CompositeStep, Deserializer, Error, FilterChain, FilterStep, NegatedSteps, OffsetMap,
    RawRecord, Result, SidelineRequestId, SidelineRequestType,
};
use tracing::{info, warn};

use crate::config::SpoutConfig;
use crate::coordinator::SpoutCoordinator;
use crate::virtual_spout::{SharedConsumerState, VirtualSpout};

/// Decodes the opaque persisted blob back into filter steps.
///
/// Predicates are user-defined; triggers deliver them already serialized
/// and the persistence layer stores the bytes untouched. The codec is the
/// deployment's knowledge of what those bytes mean.
pub trait FilterStepCodec: Send + Sync {
    fn decode(&self, blob: &[u8]) -> Result<Vec<Arc<dyn FilterStep>>>;
}

/// Sidelines records whose UTF-8 key starts with the configured prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyPrefixStep {
    pub prefix: String,
}

impl FilterStep for KeyPrefixStep {
    fn evaluate(&self, record: &RawRecord) -> bool {
        record
            .key
            .as_deref()
            .map(|key| String::from_utf8_lossy(key).starts_with(&self.prefix))
            .unwrap_or(false)
    }
}

/// Codec for deployments whose predicates are [`KeyPrefixStep`]s; the blob
/// is a JSON array of steps.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyPrefixStepCodec;

impl FilterStepCodec for KeyPrefixStepCodec {
    fn decode(&self, blob: &[u8]) -> Result<Vec<Arc<dyn FilterStep>>> {
        let steps: Vec<KeyPrefixStep> = serde_json::from_slice(blob)?;
        Ok(steps
            .into_iter()
            .map(|step| Arc::new(step) as Arc<dyn FilterStep>)
            .collect())
    }
}

fn combine(mut steps: Vec<Arc<dyn FilterStep>>) -> Arc<dyn FilterStep> {
    if steps.len() == 1 {
        steps.remove(0)
    } else {
        Arc::new(CompositeStep::new(steps))
    }
}

/// Translates sideline triggers into filter-chain mutations on the firehose
/// and bounded virtual spouts on the coordinator.
pub struct SidelineHandler {
    config: SpoutConfig,
    persistence: Arc<dyn PersistenceManager>,
    codec: Arc<dyn FilterStepCodec>,
    consumer_factory: Arc<dyn BrokerConsumerFactory>,
    deserializer: Arc<dyn Deserializer>,
    firehose_filters: Arc<FilterChain>,
    firehose_state: SharedConsumerState,
    coordinator: SpoutCoordinator,
}

impl SidelineHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: SpoutConfig,
        persistence: Arc<dyn PersistenceManager>,
        codec: Arc<dyn FilterStepCodec>,
        consumer_factory: Arc<dyn BrokerConsumerFactory>,
        deserializer: Arc<dyn Deserializer>,
        firehose_filters: Arc<FilterChain>,
        firehose_state: SharedConsumerState,
        coordinator: SpoutCoordinator,
    ) -> Self {
        Self {
            config,
            persistence,
            codec,
            consumer_factory,
            deserializer,
            firehose_filters,
            firehose_state,
            coordinator,
        }
    }

    /// Re-applies persisted requests after a restart: started requests
    /// re-install their steps in the firehose, stopped requests rebuild
    /// their bounded spouts so interrupted drains complete.
    pub async fn open(&self) -> Result<()> {
        for id in self.persistence.list_sideline_requests().await? {
            let Some(record) = self.persistence.retrieve_sideline_request(&id).await? else {
                continue;
            };

            match record.request_type {
                SidelineRequestType::Start | SidelineRequestType::Resume => {
                    self.install_firehose_steps(&id, &record.filter_chain_steps)?;
                    info!(request_id = %id, "Resumed sidelining");
                }
                SidelineRequestType::Stop => {
                    let consumer_id = self.config.sideline_consumer_id(&id);
                    match self.persistence.retrieve_consumer_state(&consumer_id).await? {
                        Some(state) => {
                            self.spawn_bounded(&id, Some(state), record.ending_state.clone(), &record.filter_chain_steps)
                                .await?;
                            info!(request_id = %id, "Resumed sideline drain");
                        }
                        None => {
                            // The drain completed in a previous run.
                            self.persistence.clear_sideline_request(&id).await?;
                            info!(request_id = %id, "Cleared completed sideline request");
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// START: install the request's steps in the firehose chain, snapshot
    /// the firehose positions as the starting offsets, persist the request.
    pub async fn start_sideline(&self, id: SidelineRequestId, steps_blob: Vec<u8>) -> Result<()> {
        self.install_firehose_steps(&id, &steps_blob)?;

        let starting = self.firehose_state.get();
        let record = SidelineRequestRecord {
            request_type: SidelineRequestType::Start,
            starting_state: Some(starting),
            ending_state: None,
            filter_chain_steps: steps_blob,
        };
        self.persistence.persist_sideline_request(&id, &record).await?;

        info!(request_id = %id, "Sidelining started");
        Ok(())
    }

    /// STOP: remove the steps from the firehose, snapshot the firehose
    /// positions as the ending offsets, persist the updated request, and
    /// hand a bounded spout with the negated steps to the coordinator.
    pub async fn stop_sideline(&self, id: &SidelineRequestId) -> Result<()> {
        let Some(mut record) = self.persistence.retrieve_sideline_request(id).await? else {
            return Err(Error::invalid_argument(format!(
                "unknown sideline request: {id}"
            )));
        };

        if self.firehose_filters.remove_step(id).is_none() {
            warn!(request_id = %id, "Stopped request had no step installed");
        }

        let ending = self.firehose_state.get();
        record.request_type = SidelineRequestType::Stop;
        record.ending_state = Some(ending.clone());
        self.persistence.persist_sideline_request(id, &record).await?;

        self.spawn_bounded(
            id,
            record.starting_state.clone(),
            Some(ending),
            &record.filter_chain_steps,
        )
        .await?;

        info!(request_id = %id, "Sidelining stopped; draining");
        Ok(())
    }

    fn install_firehose_steps(&self, id: &SidelineRequestId, blob: &[u8]) -> Result<()> {
        let steps = self.codec.decode(blob)?;
        self.firehose_filters.add_step(id.clone(), combine(steps));
        Ok(())
    }

    /// Builds a bounded virtual spout draining `[starting, ending)` with
    /// the negation of the stopped steps and queues it on the coordinator.
    async fn spawn_bounded(
        &self,
        id: &SidelineRequestId,
        starting: Option<OffsetMap>,
        ending: Option<OffsetMap>,
        steps_blob: &[u8],
    ) -> Result<()> {
        let consumer_id = self.config.sideline_consumer_id(id);

        // Seed the bounded spout's persisted state so an interrupted drain
        // resumes where it left off on restart.
        if let Some(starting) = &starting {
            self.persistence
                .persist_consumer_state(&consumer_id, starting)
                .await?;
        }

        let consumer = self
            .consumer_factory
            .create(&consumer_id, starting)
            .await?;

        let steps = self.codec.decode(steps_blob)?;
        let chain = FilterChain::new();
        chain.add_step(id.clone(), Arc::new(NegatedSteps::new(steps)));

        let spout = VirtualSpout::new(
            consumer_id,
            consumer,
            self.deserializer.clone(),
            Arc::new(chain),
            self.persistence.clone(),
            ending,
        );
        self.coordinator.add_sideline_spout(spout);
        Ok(())
    }
}
