//! Redis-backed persistence manager.
//!
//! State lives under the configured root as plain keys:
//! `{root}/consumers/{consumerId}` and `{root}/requests/{requestId}`,
//! values are UTF-8 JSON.

use async_trait::async_trait;
use parking_lot::RwLock;
use redis::AsyncCommands;
use spout_core::{Error, OffsetMap, Result, SidelineRequestId};
use tracing::{debug, info};

use crate::config::PersistenceConfig;
use crate::manager::{consumer_key, request_key, PersistenceManager, SidelineRequestRecord};

struct OpenState {
    client: redis::Client,
    root: String,
}

/// Persistence manager over a Redis-compatible store.
pub struct RedisPersistence {
    config: PersistenceConfig,
    state: RwLock<Option<OpenState>>,
}

impl RedisPersistence {
    pub fn new(config: PersistenceConfig) -> Self {
        Self {
            config,
            state: RwLock::new(None),
        }
    }

    fn ensure_open(&self) -> Result<(redis::Client, String)> {
        let state = self.state.read();
        let state = state
            .as_ref()
            .ok_or_else(|| Error::illegal_state("persistence manager is not open"))?;
        Ok((state.client.clone(), state.root.clone()))
    }

    async fn connection(&self) -> Result<(redis::aio::MultiplexedConnection, String)> {
        let (client, root) = self.ensure_open()?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::persistence(format!("connection failed: {e}")))?;
        Ok((conn, root))
    }

    async fn put(&self, key: String, json: String) -> Result<()> {
        let (mut conn, _) = self.connection().await?;
        conn.set::<_, _, ()>(&key, json)
            .await
            .map_err(|e| Error::persistence(format!("set {key} failed: {e}")))?;
        debug!(key = %key, "Persisted entry");
        Ok(())
    }

    async fn fetch(&self, key: String) -> Result<Option<String>> {
        let (mut conn, _) = self.connection().await?;
        conn.get::<_, Option<String>>(&key)
            .await
            .map_err(|e| Error::persistence(format!("get {key} failed: {e}")))
    }

    async fn delete(&self, key: String) -> Result<()> {
        let (mut conn, _) = self.connection().await?;
        conn.del::<_, ()>(&key)
            .await
            .map_err(|e| Error::persistence(format!("del {key} failed: {e}")))?;
        debug!(key = %key, "Cleared entry");
        Ok(())
    }
}

#[async_trait]
impl PersistenceManager for RedisPersistence {
    async fn open(&self) -> Result<()> {
        let root = self.config.require_root()?.to_string();

        let server = self
            .config
            .servers
            .first()
            .ok_or_else(|| Error::illegal_state("no persistence servers configured"))?;

        let client = redis::Client::open(format!("redis://{server}"))
            .map_err(|e| Error::persistence(format!("invalid server address: {e}")))?;

        // Verify the store is reachable before declaring the manager open.
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::persistence(format!("connection failed: {e}")))?;
        redis::cmd("PING")
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| Error::persistence(format!("ping failed: {e}")))?;

        info!(server = %server, root = %root, "Persistence manager opened");
        *self.state.write() = Some(OpenState { client, root });
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        *self.state.write() = None;
        Ok(())
    }

    async fn persist_consumer_state(&self, consumer_id: &str, state: &OffsetMap) -> Result<()> {
        let (_, root) = self.ensure_open()?;
        let json = serde_json::to_string(state)?;
        self.put(consumer_key(&root, consumer_id), json).await
    }

    async fn retrieve_consumer_state(&self, consumer_id: &str) -> Result<Option<OffsetMap>> {
        let (_, root) = self.ensure_open()?;
        match self.fetch(consumer_key(&root, consumer_id)).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn clear_consumer_state(&self, consumer_id: &str) -> Result<()> {
        let (_, root) = self.ensure_open()?;
        self.delete(consumer_key(&root, consumer_id)).await
    }

    async fn persist_sideline_request(
        &self,
        id: &SidelineRequestId,
        record: &SidelineRequestRecord,
    ) -> Result<()> {
        let (_, root) = self.ensure_open()?;
        let json = serde_json::to_string(record)?;
        self.put(request_key(&root, id), json).await
    }

    async fn retrieve_sideline_request(
        &self,
        id: &SidelineRequestId,
    ) -> Result<Option<SidelineRequestRecord>> {
        let (_, root) = self.ensure_open()?;
        match self.fetch(request_key(&root, id)).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn clear_sideline_request(&self, id: &SidelineRequestId) -> Result<()> {
        let (_, root) = self.ensure_open()?;
        self.delete(request_key(&root, id)).await
    }

    async fn list_sideline_requests(&self) -> Result<Vec<SidelineRequestId>> {
        let (mut conn, root) = self.connection().await?;
        let prefix = format!("{root}/requests/");
        let pattern = format!("{prefix}*");

        let mut ids = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (new_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(|e| Error::persistence(format!("scan failed: {e}")))?;

            for key in keys {
                if let Some(id) = key.strip_prefix(&prefix) {
                    ids.push(SidelineRequestId::new(id));
                }
            }

            cursor = new_cursor;
            if cursor == 0 {
                break;
            }
        }

        ids.sort();
        Ok(ids)
    }
}
