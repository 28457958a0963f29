//! Document-style in-process engine.

use super::{prepare_for_insert, require_id, Checkpoint, StoreClient};
use crate::errors::StoreError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Keeps checkpoints as documents in a process-local collection.
///
/// Nothing survives a restart; use it for tests and for devices where the
/// at-least-once window only needs to cover transient outages.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<String, Checkpoint>>,
    disconnected: AtomicBool,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored checkpoints across all services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }

    fn ensure_connected(&self) -> Result<(), StoreError> {
        if self.disconnected.load(Ordering::SeqCst) {
            Err(StoreError::Disconnected)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StoreClient for MemoryStore {
    async fn store(&self, mut checkpoint: Checkpoint) -> Result<String, StoreError> {
        self.ensure_connected()?;
        let id = prepare_for_insert(&mut checkpoint)?;

        let mut documents = self.documents.write();
        if documents.contains_key(&id) {
            return Err(StoreError::AlreadyExists { id });
        }
        documents.insert(id.clone(), checkpoint);
        Ok(id)
    }

    async fn retrieve_by_service(&self, service_key: &str) -> Result<Vec<Checkpoint>, StoreError> {
        self.ensure_connected()?;
        Ok(self
            .documents
            .read()
            .values()
            .filter(|c| c.service_key() == service_key)
            .cloned()
            .collect())
    }

    async fn update(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        self.ensure_connected()?;
        let id = require_id(checkpoint)?;

        let mut documents = self.documents.write();
        match documents.get_mut(id) {
            Some(existing) => {
                *existing = checkpoint.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound { id: id.to_string() }),
        }
    }

    async fn remove(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        self.ensure_connected()?;
        let id = require_id(checkpoint)?;
        self.documents.write().remove(id);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), StoreError> {
        self.disconnected.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::conformance;

    #[tokio::test]
    async fn test_store_assigns_id() {
        conformance::store_assigns_id(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_duplicates_rejected() {
        conformance::store_keeps_given_id_and_rejects_duplicates(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_empty_payload_rejected() {
        conformance::store_rejects_empty_payload(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_retrieve_scoped() {
        conformance::retrieve_is_scoped_by_service(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_update() {
        conformance::update_persists_mutations(&MemoryStore::new()).await;
        conformance::update_unknown_fails(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_remove_idempotent() {
        let store = MemoryStore::new();
        conformance::remove_is_idempotent(&store).await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect() {
        conformance::disconnect_blocks_further_use(&MemoryStore::new()).await;
    }
}
