//! Secret provider interface and an in-process implementation.

use crate::errors::SecretError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Source of credentials for outbound clients.
///
/// A `secrets_last_updated` value strictly newer than a consumer's own fetch
/// time means the secrets have rotated.
#[async_trait]
pub trait SecretProvider: Send + Sync {
    /// Returns every secret stored under `path`.
    async fn get_secrets(&self, path: &str) -> Result<HashMap<String, String>, SecretError>;

    /// Returns when any secret was last written.
    fn secrets_last_updated(&self) -> DateTime<Utc>;
}

/// A secret provider holding secrets in memory.
///
/// Seeded from the `insecure_secrets` section of the service configuration;
/// [`InMemorySecretProvider::store_secrets`] replaces a path and marks a
/// rotation.
#[derive(Debug)]
pub struct InMemorySecretProvider {
    secrets: RwLock<HashMap<String, HashMap<String, String>>>,
    last_updated: RwLock<DateTime<Utc>>,
}

impl Default for InMemorySecretProvider {
    fn default() -> Self {
        Self {
            secrets: RwLock::new(HashMap::new()),
            last_updated: RwLock::new(DateTime::<Utc>::UNIX_EPOCH),
        }
    }
}

impl InMemorySecretProvider {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a provider seeded with secrets. Seeding is not a rotation.
    #[must_use]
    pub fn with_secrets(secrets: HashMap<String, HashMap<String, String>>) -> Self {
        Self {
            secrets: RwLock::new(secrets),
            ..Self::default()
        }
    }

    /// Replaces the secrets at `path` and bumps the last-updated timestamp.
    pub fn store_secrets(&self, path: impl Into<String>, secrets: HashMap<String, String>) {
        self.secrets.write().insert(path.into(), secrets);
        let mut last = self.last_updated.write();
        // Keep the timestamp strictly increasing even if the clock stalls.
        let now = Utc::now();
        *last = if now > *last {
            now
        } else {
            *last + chrono::Duration::microseconds(1)
        };
    }
}

#[async_trait]
impl SecretProvider for InMemorySecretProvider {
    async fn get_secrets(&self, path: &str) -> Result<HashMap<String, String>, SecretError> {
        self.secrets
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| SecretError::NotFound {
                path: path.to_string(),
            })
    }

    fn secrets_last_updated(&self) -> DateTime<Utc> {
        *self.last_updated.read()
    }
}
