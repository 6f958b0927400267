//! In-memory persistence for tests and embedded runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use spout_core::{Error, OffsetMap, Result, SidelineRequestId};

use crate::config::PersistenceConfig;
use crate::manager::{consumer_key, request_key, PersistenceManager, SidelineRequestRecord};

/// Shared backing store. Cloning the handle shares the underlying map, so a
/// freshly opened manager over the same store observes earlier writes.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Persistence manager backed by an in-process map.
pub struct MemoryPersistence {
    config: PersistenceConfig,
    store: MemoryStore,
    opened: AtomicBool,
}

impl MemoryPersistence {
    pub fn new(config: PersistenceConfig) -> Self {
        Self::with_store(config, MemoryStore::new())
    }

    /// Builds a manager over an existing store, e.g. to reopen state
    /// written by an earlier manager instance.
    pub fn with_store(config: PersistenceConfig, store: MemoryStore) -> Self {
        Self {
            config,
            store,
            opened: AtomicBool::new(false),
        }
    }

    /// A handle to the backing store, for reopening.
    pub fn store(&self) -> MemoryStore {
        self.store.clone()
    }

    fn root(&self) -> Result<&str> {
        if !self.opened.load(Ordering::SeqCst) {
            return Err(Error::illegal_state("persistence manager is not open"));
        }
        self.config.require_root()
    }
}

#[async_trait]
impl PersistenceManager for MemoryPersistence {
    async fn open(&self) -> Result<()> {
        self.config.require_root()?;
        self.opened.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.opened.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn persist_consumer_state(&self, consumer_id: &str, state: &OffsetMap) -> Result<()> {
        let key = consumer_key(self.root()?, consumer_id);
        let json = serde_json::to_string(state)?;
        self.store.entries.write().insert(key, json);
        Ok(())
    }

    async fn retrieve_consumer_state(&self, consumer_id: &str) -> Result<Option<OffsetMap>> {
        let key = consumer_key(self.root()?, consumer_id);
        match self.store.entries.read().get(&key) {
            Some(json) => Ok(Some(serde_json::from_str(json)?)),
            None => Ok(None),
        }
    }

    async fn clear_consumer_state(&self, consumer_id: &str) -> Result<()> {
        let key = consumer_key(self.root()?, consumer_id);
        self.store.entries.write().remove(&key);
        Ok(())
    }

    async fn persist_sideline_request(
        &self,
        id: &SidelineRequestId,
        record: &SidelineRequestRecord,
    ) -> Result<()> {
        let key = request_key(self.root()?, id);
        let json = serde_json::to_string(record)?;
        self.store.entries.write().insert(key, json);
        Ok(())
    }

    async fn retrieve_sideline_request(
        &self,
        id: &SidelineRequestId,
    ) -> Result<Option<SidelineRequestRecord>> {
        let key = request_key(self.root()?, id);
        match self.store.entries.read().get(&key) {
            Some(json) => Ok(Some(serde_json::from_str(json)?)),
            None => Ok(None),
        }
    }

    async fn clear_sideline_request(&self, id: &SidelineRequestId) -> Result<()> {
        let key = request_key(self.root()?, id);
        self.store.entries.write().remove(&key);
        Ok(())
    }

    async fn list_sideline_requests(&self) -> Result<Vec<SidelineRequestId>> {
        let prefix = format!("{}/requests/", self.root()?);
        let mut ids: Vec<SidelineRequestId> = self
            .store
            .entries
            .read()
            .keys()
            .filter_map(|key| key.strip_prefix(&prefix))
            .map(SidelineRequestId::new)
            .collect();
        ids.sort();
        Ok(ids)
    }
}
