//! Durable file-system engine.
//!
//! Layout: `<root>/<hex(service_key)>/<hex(id)>.json`, one wire-format
//! document per checkpoint. Names are hex-encoded so arbitrary keys are safe
//! path components.

use super::{prepare_for_insert, require_id, Checkpoint, StoreClient};
use crate::errors::StoreError;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::AsyncWriteExt;
use tracing::warn;

const EXTENSION: &str = "json";

/// Stores each checkpoint as a JSON file under a root directory.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    disconnected: AtomicBool,
}

impl FileStore {
    /// Opens a store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            disconnected: AtomicBool::new(false),
        })
    }

    /// The root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn service_dir(&self, service_key: &str) -> PathBuf {
        self.root.join(hex::encode(service_key))
    }

    fn document_path(&self, service_key: &str, id: &str) -> PathBuf {
        self.service_dir(service_key)
            .join(format!("{}.{EXTENSION}", hex::encode(id)))
    }

    fn ensure_connected(&self) -> Result<(), StoreError> {
        if self.disconnected.load(Ordering::SeqCst) {
            Err(StoreError::Disconnected)
        } else {
            Ok(())
        }
    }
}

/// Writes through a temporary file so readers never see a partial document.
async fn write_atomically(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    let tmp = path.with_extension("tmp");
    let mut file = tokio::fs::File::create(&tmp).await?;
    write_and_sync(&mut file, contents).await?;
    drop(file);
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn write_and_sync(file: &mut tokio::fs::File, contents: &[u8]) -> std::io::Result<()> {
    file.write_all(contents).await?;
    file.sync_all().await
}

#[async_trait]
impl StoreClient for FileStore {
    async fn store(&self, mut checkpoint: Checkpoint) -> Result<String, StoreError> {
        self.ensure_connected()?;
        let id = prepare_for_insert(&mut checkpoint)?;
        let encoded = checkpoint.to_json()?;

        tokio::fs::create_dir_all(self.service_dir(checkpoint.service_key())).await?;
        let path = self.document_path(checkpoint.service_key(), &id);

        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StoreError::AlreadyExists { id });
            }
            Err(e) => return Err(e.into()),
        };
        if let Err(e) = write_and_sync(&mut file, &encoded).await {
            drop(file);
            // A partial document must not outlive the failed insert.
            if let Err(cleanup) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %cleanup, "Failed to remove partial checkpoint");
            }
            return Err(e.into());
        }
        Ok(id)
    }

    async fn retrieve_by_service(&self, service_key: &str) -> Result<Vec<Checkpoint>, StoreError> {
        self.ensure_connected()?;
        let mut entries = match tokio::fs::read_dir(self.service_dir(service_key)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut checkpoints = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            match tokio::fs::read(&path).await {
                Ok(bytes) => match Checkpoint::from_json(&bytes) {
                    Ok(checkpoint) => checkpoints.push(checkpoint),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Skipping undecodable checkpoint");
                    }
                },
                // Removed between listing and reading.
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(checkpoints)
    }

    async fn update(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        self.ensure_connected()?;
        let id = require_id(checkpoint)?;
        let path = self.document_path(checkpoint.service_key(), id);

        if !tokio::fs::try_exists(&path).await? {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        write_atomically(&path, &checkpoint.to_json()?).await
    }

    async fn remove(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        self.ensure_connected()?;
        let id = require_id(checkpoint)?;
        match tokio::fs::remove_file(self.document_path(checkpoint.service_key(), id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
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
    use tempfile::TempDir;

    fn open() -> (TempDir, FileStore) {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path().join("checkpoints")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_store_assigns_id() {
        let (_dir, store) = open();
        conformance::store_assigns_id(&store).await;
    }

    #[tokio::test]
    async fn test_duplicates_rejected() {
        let (_dir, store) = open();
        conformance::store_keeps_given_id_and_rejects_duplicates(&store).await;
    }

    #[tokio::test]
    async fn test_empty_payload_rejected() {
        let (_dir, store) = open();
        conformance::store_rejects_empty_payload(&store).await;
    }

    #[tokio::test]
    async fn test_retrieve_scoped() {
        let (_dir, store) = open();
        conformance::retrieve_is_scoped_by_service(&store).await;
    }

    #[tokio::test]
    async fn test_update() {
        let (_dir, store) = open();
        conformance::update_persists_mutations(&store).await;
        let (_dir, store) = open();
        conformance::update_unknown_fails(&store).await;
    }

    #[tokio::test]
    async fn test_remove_idempotent() {
        let (_dir, store) = open();
        conformance::remove_is_idempotent(&store).await;
    }

    #[tokio::test]
    async fn test_disconnect() {
        let (_dir, store) = open();
        conformance::disconnect_blocks_further_use(&store).await;
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let id = {
            let store = FileStore::open(dir.path()).unwrap();
            store
                .store(Checkpoint::new("svc", b"temp=72".to_vec(), 1, "v1").unwrap())
                .await
                .unwrap()
        };

        let reopened = FileStore::open(dir.path()).unwrap();
        let found = reopened.retrieve_by_service("svc").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), id);
        assert_eq!(found[0].payload(), b"temp=72");
    }

    #[tokio::test]
    async fn test_corrupt_document_does_not_hide_others() {
        let (_dir, store) = open();
        let id = store
            .store(Checkpoint::new("svc", b"temp=72".to_vec(), 1, "v1").unwrap())
            .await
            .unwrap();
        let corrupt = store.service_dir("svc").join(format!("deadbeef.{EXTENSION}"));
        std::fs::write(&corrupt, br#"{"payl"#).unwrap();

        let found = store.retrieve_by_service("svc").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), id);
    }

    #[tokio::test]
    async fn test_update_leaves_no_temp_file() {
        let (_dir, store) = open();
        let id = store
            .store(Checkpoint::new("svc", b"temp=72".to_vec(), 1, "v1").unwrap())
            .await
            .unwrap();
        let mut checkpoint = store.retrieve_by_service("svc").await.unwrap().remove(0);
        checkpoint.increment_retry_count();
        store.update(&checkpoint).await.unwrap();

        let names: Vec<_> = std::fs::read_dir(store.service_dir("svc"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from(format!("{}.{EXTENSION}", hex::encode(&id)))]);
        assert_eq!(store.retrieve_by_service("svc").await.unwrap()[0].retry_count(), 1);
    }

    #[tokio::test]
    async fn test_service_dir_is_hex_encoded() {
        let (_dir, store) = open();
        store
            .store(Checkpoint::new("../escape", b"x".to_vec(), 0, "v").unwrap())
            .await
            .unwrap();
        assert!(store.root().join(hex::encode("../escape")).is_dir());
    }
}
