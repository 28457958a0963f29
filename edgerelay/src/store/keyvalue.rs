//! Redis-style key-value engine.
//!
//! Checkpoints are stored as JSON wire strings under `checkpoint:<id>`, and
//! each service has an index set under `service:<key>` listing its IDs.

use super::{prepare_for_insert, require_id, Checkpoint, StoreClient};
use crate::errors::StoreError;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

const CHECKPOINT_PREFIX: &str = "checkpoint:";
const SERVICE_PREFIX: &str = "service:";

/// Key-value engine over a sharded concurrent keyspace.
#[derive(Debug, Default)]
pub struct KeyValueStore {
    namespace: String,
    values: DashMap<String, String>,
    indexes: DashMap<String, HashSet<String>>,
    disconnected: AtomicBool,
}

impl KeyValueStore {
    /// Creates an empty keyspace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefixes every key, so several stores can share a naming scheme.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    fn checkpoint_key(&self, id: &str) -> String {
        format!("{}{CHECKPOINT_PREFIX}{id}", self.namespace)
    }

    fn service_key(&self, service: &str) -> String {
        format!("{}{SERVICE_PREFIX}{service}", self.namespace)
    }

    fn ensure_connected(&self) -> Result<(), StoreError> {
        if self.disconnected.load(Ordering::SeqCst) {
            Err(StoreError::Disconnected)
        } else {
            Ok(())
        }
    }

    fn encode(checkpoint: &Checkpoint) -> Result<String, StoreError> {
        String::from_utf8(checkpoint.to_json()?).map_err(|e| StoreError::Backend(e.to_string()))
    }
}

#[async_trait]
impl StoreClient for KeyValueStore {
    async fn store(&self, mut checkpoint: Checkpoint) -> Result<String, StoreError> {
        self.ensure_connected()?;
        let id = prepare_for_insert(&mut checkpoint)?;
        let encoded = Self::encode(&checkpoint)?;

        match self.values.entry(self.checkpoint_key(&id)) {
            Entry::Occupied(_) => return Err(StoreError::AlreadyExists { id }),
            Entry::Vacant(slot) => {
                slot.insert(encoded);
            }
        }
        self.indexes
            .entry(self.service_key(checkpoint.service_key()))
            .or_default()
            .insert(id.clone());
        Ok(id)
    }

    async fn retrieve_by_service(&self, service_key: &str) -> Result<Vec<Checkpoint>, StoreError> {
        self.ensure_connected()?;
        let ids: Vec<String> = self
            .indexes
            .get(&self.service_key(service_key))
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();

        // An ID may be listed after its value was removed concurrently.
        ids.iter()
            .filter_map(|id| self.values.get(&self.checkpoint_key(id)))
            .map(|raw| Checkpoint::from_json(raw.as_bytes()))
            .collect()
    }

    async fn update(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        self.ensure_connected()?;
        let id = require_id(checkpoint)?;
        let encoded = Self::encode(checkpoint)?;

        match self.values.get_mut(&self.checkpoint_key(id)) {
            Some(mut existing) => {
                *existing = encoded;
                Ok(())
            }
            None => Err(StoreError::NotFound { id: id.to_string() }),
        }
    }

    async fn remove(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        self.ensure_connected()?;
        let id = require_id(checkpoint)?;

        let removed = self.values.remove(&self.checkpoint_key(id));
        let service = match removed {
            Some((_, raw)) => Checkpoint::from_json(raw.as_bytes())?.service_key().to_string(),
            None => checkpoint.service_key().to_string(),
        };

        let index_key = self.service_key(&service);
        if let Some(mut set) = self.indexes.get_mut(&index_key) {
            set.remove(id);
        }
        self.indexes.remove_if(&index_key, |_, set| set.is_empty());
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), StoreError> {
        self.disconnected.store(true, Ordering::SeqCst);
        self.values.clear();
        self.indexes.clear();
        Ok(())
    }
}
