//! Durable persistence of failed exports.
//!
//! This module provides:
//! - [`Checkpoint`] and its JSON wire form
//! - The [`StoreClient`] capability trait implemented by every engine
//! - A [`StoreRegistry`] mapping engine names to constructors
//! - Three engines: `memory`, `keyvalue` and `file`

mod checkpoint;
mod file;
mod keyvalue;
mod memory;
mod registry;

pub use checkpoint::Checkpoint;
pub use file::FileStore;
pub use keyvalue::KeyValueStore;
pub use memory::MemoryStore;
pub use registry::{new_store_client, StoreConstructor, StoreRegistry};

use crate::errors::StoreError;
use async_trait::async_trait;

/// Operations every retry store engine provides.
///
/// Engines handle their own internal concurrency; callers share one client
/// per process through an `Arc`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Persists a new checkpoint and returns its ID.
    ///
    /// An ID is generated when the checkpoint has none.
    async fn store(&self, checkpoint: Checkpoint) -> Result<String, StoreError>;

    /// Returns every checkpoint owned by `service_key`, in no particular order.
    async fn retrieve_by_service(&self, service_key: &str) -> Result<Vec<Checkpoint>, StoreError>;

    /// Overwrites the stored fields of an existing checkpoint.
    async fn update(&self, checkpoint: &Checkpoint) -> Result<(), StoreError>;

    /// Deletes a checkpoint. Removing an unknown ID succeeds.
    async fn remove(&self, checkpoint: &Checkpoint) -> Result<(), StoreError>;

    /// Releases the engine's resources. Later calls fail with `Disconnected`.
    async fn disconnect(&self) -> Result<(), StoreError>;
}

/// Validates a checkpoint for insertion and assigns it an ID if needed.
pub(crate) fn prepare_for_insert(checkpoint: &mut Checkpoint) -> Result<String, StoreError> {
    if checkpoint.payload().is_empty() {
        return Err(StoreError::EmptyPayload);
    }
    if checkpoint.id().is_empty() {
        checkpoint.assign_id(uuid::Uuid::new_v4().to_string())?;
    }
    Ok(checkpoint.id().to_string())
}

/// Returns the checkpoint's ID, or `MissingId` if it was never stored.
pub(crate) fn require_id(checkpoint: &Checkpoint) -> Result<&str, StoreError> {
    match checkpoint.id() {
        "" => Err(StoreError::MissingId),
        id => Ok(id),
    }
}

#[cfg(test)]
pub(crate) mod conformance {
    //! Behaviour every engine must share, run against each one.

    use super::*;
    use pretty_assertions::assert_eq;

    fn sample(service: &str, payload: &[u8]) -> Checkpoint {
        Checkpoint::new(service, payload.to_vec(), 2, "v1")
            .unwrap()
            .with_correlation_id("corr")
    }

    pub async fn store_assigns_id(store: &dyn StoreClient) {
        let id = store.store(sample("svc", b"temp=72")).await.unwrap();
        assert!(!id.is_empty());

        let found = store.retrieve_by_service("svc").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), id);
        assert_eq!(found[0].payload(), b"temp=72");
        assert_eq!(found[0].pipeline_position(), 2);
        assert_eq!(found[0].correlation_id(), "corr");
    }

    pub async fn store_keeps_given_id_and_rejects_duplicates(store: &dyn StoreClient) {
        let mut cp = sample("svc", b"x");
        cp.assign_id("fixed").unwrap();
        assert_eq!(store.store(cp.clone()).await.unwrap(), "fixed");

        let err = store.store(cp).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { id } if id == "fixed"));
    }

    pub async fn store_rejects_empty_payload(store: &dyn StoreClient) {
        let err = store.store(Checkpoint::zero()).await.unwrap_err();
        assert!(matches!(err, StoreError::EmptyPayload));
    }

    pub async fn retrieve_is_scoped_by_service(store: &dyn StoreClient) {
        store.store(sample("a", b"1")).await.unwrap();
        store.store(sample("a", b"2")).await.unwrap();
        store.store(sample("b", b"3")).await.unwrap();

        let mut payloads: Vec<Vec<u8>> = store
            .retrieve_by_service("a")
            .await
            .unwrap()
            .iter()
            .map(|c| c.payload().to_vec())
            .collect();
        payloads.sort();
        assert_eq!(payloads, vec![b"1".to_vec(), b"2".to_vec()]);
        assert!(store.retrieve_by_service("missing").await.unwrap().is_empty());
    }

    pub async fn update_persists_mutations(store: &dyn StoreClient) {
        let id = store.store(sample("svc", b"x")).await.unwrap();
        let mut cp = store.retrieve_by_service("svc").await.unwrap().remove(0);
        assert_eq!(cp.id(), id);

        cp.increment_retry_count();
        cp.set_version("v2");
        store.update(&cp).await.unwrap();

        let reloaded = store.retrieve_by_service("svc").await.unwrap().remove(0);
        assert_eq!(reloaded.retry_count(), 1);
        assert_eq!(reloaded.version(), "v2");
    }

    pub async fn update_unknown_fails(store: &dyn StoreClient) {
        let mut cp = sample("svc", b"x");
        let err = store.update(&cp).await.unwrap_err();
        assert!(matches!(err, StoreError::MissingId));

        cp.assign_id("ghost").unwrap();
        let err = store.update(&cp).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { id } if id == "ghost"));
    }

    pub async fn remove_is_idempotent(store: &dyn StoreClient) {
        store.store(sample("svc", b"x")).await.unwrap();
        let cp = store.retrieve_by_service("svc").await.unwrap().remove(0);

        store.remove(&cp).await.unwrap();
        store.remove(&cp).await.unwrap();
        assert!(store.retrieve_by_service("svc").await.unwrap().is_empty());

        let mut ghost = sample("svc", b"x");
        ghost.assign_id("never-stored").unwrap();
        store.remove(&ghost).await.unwrap();
    }

    pub async fn disconnect_blocks_further_use(store: &dyn StoreClient) {
        store.disconnect().await.unwrap();
        let err = store.retrieve_by_service("svc").await.unwrap_err();
        assert!(matches!(err, StoreError::Disconnected));
    }
}
