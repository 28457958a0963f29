//! Lazily built, rotation-aware broker client.

use super::{build_client_options, ClientFactory, PublishClient};
use crate::config::MqttSinkConfig;
use crate::errors::ConnectionError;
use crate::security::SecretProvider;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Default)]
struct ConnectionState {
    client: Option<Arc<dyn PublishClient>>,
    secrets_fetched_at: Option<DateTime<Utc>>,
}

impl ConnectionState {
    /// The client, if it exists and its secrets have not rotated since.
    fn fresh_client(&self, last_updated: DateTime<Utc>) -> Option<Arc<dyn PublishClient>> {
        let client = self.client.as_ref()?;
        match self.secrets_fetched_at {
            Some(fetched_at) if fetched_at < last_updated => None,
            _ => Some(client.clone()),
        }
    }
}

/// Owns the publish client for one sink.
///
/// The client is built on first use from secrets at the configured path and
/// rebuilt when the provider reports a strictly newer update. Building and
/// connecting are serialized by one async lock; the unlocked fast path only
/// reads a snapshot, and every decision is re-checked under the lock.
pub struct SecretAwareConnectionManager {
    config: MqttSinkConfig,
    factory: Arc<dyn ClientFactory>,
    state: RwLock<ConnectionState>,
    lock: tokio::sync::Mutex<()>,
    builds: AtomicUsize,
}

impl SecretAwareConnectionManager {
    /// Creates an uninitialized manager.
    #[must_use]
    pub fn new(config: MqttSinkConfig, factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            config,
            factory,
            state: RwLock::new(ConnectionState::default()),
            lock: tokio::sync::Mutex::new(()),
            builds: AtomicUsize::new(0),
        }
    }

    /// The sink configuration.
    #[must_use]
    pub const fn config(&self) -> &MqttSinkConfig {
        &self.config
    }

    /// Number of clients built so far.
    #[must_use]
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    /// Returns true if a client exists.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state.read().client.is_some()
    }

    /// When the current client's secrets were fetched.
    #[must_use]
    pub fn secrets_fetched_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().secrets_fetched_at
    }

    /// Returns a client built from current secrets, building or rebuilding
    /// it if needed.
    ///
    /// A failed rebuild leaves the previous client installed, so it is still
    /// released by [`Self::disconnect`].
    pub async fn client(
        &self,
        provider: &dyn SecretProvider,
    ) -> Result<Arc<dyn PublishClient>, ConnectionError> {
        let fresh = self.state.read().fresh_client(provider.secrets_last_updated());
        if let Some(client) = fresh {
            return Ok(client);
        }

        let guard = self.lock.lock().await;
        let fresh = self.state.read().fresh_client(provider.secrets_last_updated());
        if let Some(client) = fresh {
            return Ok(client);
        }

        let (client, fetched_at) = self.build(provider).await?;
        let replaced = {
            let mut state = self.state.write();
            state.secrets_fetched_at = fetched_at;
            state.client.replace(client.clone())
        };
        drop(guard);

        if let Some(old) = replaced {
            info!(broker = %self.config.broker_address, "Secrets rotated, client rebuilt");
            if old.is_connected() {
                // The old session is unusable either way.
                if let Err(e) = old.disconnect().await {
                    debug!(error = %e, "Stale client disconnect failed");
                }
            }
        }
        Ok(client)
    }

    /// Returns a connected client, connecting it if needed.
    ///
    /// The connect attempt happens under the same lock as construction, and
    /// only for the installed, fresh client. A client replaced while this
    /// call waited for the lock is never dialed.
    pub async fn connect(
        &self,
        provider: &dyn SecretProvider,
    ) -> Result<Arc<dyn PublishClient>, ConnectionError> {
        loop {
            let client = self.client(provider).await?;
            if client.is_connected() {
                return Ok(client);
            }

            let _guard = self.lock.lock().await;
            let current = self.state.read().fresh_client(provider.secrets_last_updated());
            if !current.is_some_and(|current| Arc::ptr_eq(&current, &client)) {
                debug!(broker = %self.config.broker_address, "Client replaced while waiting, retrying");
                continue;
            }
            if client.is_connected() {
                return Ok(client);
            }
            debug!(broker = %self.config.broker_address, "Connecting to broker");
            client.connect().await.map_err(|e| {
                warn!(broker = %self.config.broker_address, error = %e, "Broker connect failed");
                e
            })?;
            info!(broker = %self.config.broker_address, "Connected to broker");
            return Ok(client);
        }
    }

    /// Disconnects and drops the current client.
    pub async fn disconnect(&self) -> Result<(), ConnectionError> {
        let _guard = self.lock.lock().await;
        let client = {
            let mut state = self.state.write();
            state.secrets_fetched_at = None;
            state.client.take()
        };
        match client {
            Some(client) if client.is_connected() => client.disconnect().await,
            _ => Ok(()),
        }
    }

    /// Fetches secrets and constructs a client without installing it.
    /// Caller holds the lock.
    async fn build(
        &self,
        provider: &dyn SecretProvider,
    ) -> Result<(Arc<dyn PublishClient>, Option<DateTime<Utc>>), ConnectionError> {
        let (secrets, fetched_at) = if self.config.auth_mode.requires_secrets() {
            // Taken before the fetch so a rotation during it is seen next time.
            let fetched_at = Utc::now().max(provider.secrets_last_updated());
            let secrets = provider.get_secrets(&self.config.secret_path).await?;
            (secrets, Some(fetched_at))
        } else {
            (HashMap::new(), None)
        };

        let options = build_client_options(&self.config, &secrets)?;
        let client = self.factory.create(options)?;
        self.builds.fetch_add(1, Ordering::SeqCst);

        debug!(
            broker = %self.config.broker_address,
            auth_mode = %self.config.auth_mode,
            "Client built"
        );
        Ok((client, fetched_at))
    }
}

impl std::fmt::Debug for SecretAwareConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretAwareConnectionManager")
            .field("broker_address", &self.config.broker_address)
            .field("auth_mode", &self.config.auth_mode)
            .field("initialized", &self.is_initialized())
            .field("builds", &self.build_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::InMemorySecretProvider;
    use crate::sink::AuthMode;
    use crate::testing::{CountingSecretProvider, FakeClientFactory};
    use futures::future::join_all;
    use std::time::Duration;

    fn creds(user: &str) -> HashMap<String, String> {
        HashMap::from([
            ("username".to_string(), user.to_string()),
            ("password".to_string(), "p".to_string()),
        ])
    }

    fn manager(factory: Arc<FakeClientFactory>) -> SecretAwareConnectionManager {
        let config = MqttSinkConfig::new("tcp://broker:1883", "events")
            .with_auth_mode(AuthMode::UsernamePassword);
        SecretAwareConnectionManager::new(config, factory)
    }

    #[tokio::test]
    async fn test_first_use_builds_once() {
        let factory = Arc::new(FakeClientFactory::new());
        let provider = CountingSecretProvider::new("mqtt", creds("a"));
        let mgr = manager(factory.clone());

        assert!(!mgr.is_initialized());
        let first = mgr.client(&provider).await.unwrap();
        let second = mgr.client(&provider).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(provider.fetch_count(), 1);
        assert_eq!(factory.create_count(), 1);
        assert!(mgr.secrets_fetched_at().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_callers_share_one_client() {
        let factory = Arc::new(FakeClientFactory::new());
        let provider = Arc::new(
            CountingSecretProvider::new("mqtt", creds("a")).with_delay(Duration::from_millis(20)),
        );
        let mgr = Arc::new(manager(factory.clone()));

        let tasks = (0..16).map(|_| {
            let mgr = mgr.clone();
            let provider = provider.clone();
            tokio::spawn(async move { mgr.connect(provider.as_ref()).await })
        });
        for result in join_all(tasks).await {
            assert!(result.unwrap().is_ok());
        }

        assert_eq!(provider.fetch_count(), 1);
        assert_eq!(factory.create_count(), 1);
        assert_eq!(factory.clients()[0].connect_count(), 1);
    }

    #[tokio::test]
    async fn test_rotation_rebuilds_exactly_once() {
        let factory = Arc::new(FakeClientFactory::new());
        let provider = CountingSecretProvider::new("mqtt", creds("a"));
        let mgr = manager(factory.clone());

        mgr.connect(&provider).await.unwrap();
        mgr.connect(&provider).await.unwrap();
        assert_eq!(factory.create_count(), 1);

        provider.rotate(creds("b"));
        mgr.connect(&provider).await.unwrap();
        mgr.connect(&provider).await.unwrap();

        assert_eq!(factory.create_count(), 2);
        assert_eq!(provider.fetch_count(), 2);
        let clients = factory.clients();
        assert!(!clients[0].is_connected());
        assert_eq!(clients[1].options().username.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_none_mode_skips_secret_fetch() {
        let factory = Arc::new(FakeClientFactory::new());
        let provider = CountingSecretProvider::new("mqtt", HashMap::new());
        let mgr = SecretAwareConnectionManager::new(
            MqttSinkConfig::new("tcp://broker:1883", "events"),
            factory.clone(),
        );

        mgr.client(&provider).await.unwrap();
        provider.rotate(HashMap::new());
        mgr.client(&provider).await.unwrap();

        assert_eq!(provider.fetch_count(), 0);
        assert_eq!(factory.create_count(), 1);
    }

    #[tokio::test]
    async fn test_secret_error_leaves_uninitialized() {
        let factory = Arc::new(FakeClientFactory::new());
        let provider = InMemorySecretProvider::new();
        let mgr = manager(factory.clone());

        let err = mgr.client(&provider).await.err().unwrap();
        assert!(matches!(err, ConnectionError::Secret(_)));
        assert!(!mgr.is_initialized());
        assert_eq!(factory.create_count(), 0);
    }

    #[tokio::test]
    async fn test_connect_failure_is_returned() {
        let factory = Arc::new(FakeClientFactory::new().failing_connects(1));
        let provider = CountingSecretProvider::new("mqtt", creds("a"));
        let mgr = manager(factory.clone());

        let err = mgr.connect(&provider).await.err().unwrap();
        assert!(err.is_delivery_failure());

        // The client survives; the next call dials again.
        mgr.connect(&provider).await.unwrap();
        assert_eq!(factory.create_count(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_resets() {
        let factory = Arc::new(FakeClientFactory::new());
        let provider = CountingSecretProvider::new("mqtt", creds("a"));
        let mgr = manager(factory.clone());

        mgr.connect(&provider).await.unwrap();
        mgr.disconnect().await.unwrap();
        assert!(!mgr.is_initialized());
        assert!(!factory.clients()[0].is_connected());
    }

    #[tokio::test]
    async fn test_failed_rebuild_keeps_current_client() {
        let factory = Arc::new(FakeClientFactory::new());
        let provider = CountingSecretProvider::new("mqtt", creds("a"));
        let mgr = manager(factory.clone());
        let first = mgr.connect(&provider).await.unwrap();

        provider.rotate(HashMap::from([("username".to_string(), "b".to_string())]));
        let err = mgr.connect(&provider).await.err().unwrap();
        assert!(matches!(err, ConnectionError::MissingSecret { ref key, .. } if key == "password"));

        assert!(mgr.is_initialized());
        assert!(first.is_connected());
        assert_eq!(factory.create_count(), 1);

        mgr.disconnect().await.unwrap();
        assert!(!first.is_connected());
    }

    #[tokio::test]
    async fn test_waiter_never_dials_replaced_client() {
        let factory = Arc::new(FakeClientFactory::new());
        let provider = Arc::new(CountingSecretProvider::new("mqtt", creds("a")));
        let mgr = Arc::new(manager(factory.clone()));
        mgr.client(provider.as_ref()).await.unwrap();

        let guard = mgr.lock.lock().await;
        let waiter = {
            let mgr = mgr.clone();
            let provider = provider.clone();
            tokio::spawn(async move { mgr.connect(provider.as_ref()).await })
        };
        // Let the waiter pick up the first client and park on the lock.
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        provider.rotate(creds("b"));
        drop(guard);

        let connected = waiter.await.unwrap().unwrap();
        let clients = factory.clients();
        assert_eq!(clients.len(), 2);
        assert_eq!(clients[0].connect_count(), 0);
        assert!(!clients[0].is_connected());
        assert_eq!(clients[1].connect_count(), 1);
        assert!(connected.is_connected());
    }

    #[tokio::test]
    async fn test_dropped_session_reconnects_same_client() {
        let factory = Arc::new(FakeClientFactory::new());
        let provider = CountingSecretProvider::new("mqtt", creds("a"));
        let mgr = manager(factory.clone());

        mgr.connect(&provider).await.unwrap();
        factory.clients()[0].drop_connection();

        let client = mgr.connect(&provider).await.unwrap();
        assert!(client.is_connected());
        assert_eq!(factory.create_count(), 1);
        assert_eq!(factory.clients()[0].connect_count(), 2);
        assert_eq!(provider.fetch_count(), 1);
    }
}
