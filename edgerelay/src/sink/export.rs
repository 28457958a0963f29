//! The MQTT export function.

use super::{ClientFactory, SecretAwareConnectionManager};
use crate::config::MqttSinkConfig;
use crate::context::PipelineContext;
use crate::core::{Data, Flow};
use crate::errors::{ConnectionError, PipelineError};
use crate::pipeline::PipelineFunction;
use crate::store::StoreClient;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Whether failed exports are persisted for replay.
#[derive(Clone, Default)]
pub enum RetryPersistence {
    /// Failed payloads are dropped.
    #[default]
    Disabled,
    /// Failed payloads are written to the store as checkpoints.
    Enabled(Arc<dyn StoreClient>),
}

impl RetryPersistence {
    /// Returns true if persistence is on.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled(_))
    }
}

impl std::fmt::Debug for RetryPersistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disabled => f.write_str("Disabled"),
            Self::Enabled(_) => f.write_str("Enabled"),
        }
    }
}

/// Publishes the prior output to an MQTT topic.
///
/// Must be the last function that needs the payload: on success it continues
/// with no output. On a connect or publish failure, with persistence enabled,
/// it writes exactly one checkpoint that resumes at its own position.
#[derive(Debug)]
pub struct MqttExportStage {
    name: String,
    manager: Arc<SecretAwareConnectionManager>,
    persistence: RetryPersistence,
}

impl MqttExportStage {
    /// Creates an export stage over a shared connection manager.
    #[must_use]
    pub fn new(manager: Arc<SecretAwareConnectionManager>) -> Self {
        Self {
            name: "mqtt-export".to_string(),
            manager,
            persistence: RetryPersistence::Disabled,
        }
    }

    /// Builds the stage and its manager from configuration.
    ///
    /// Persistence is enabled when the sink asks for it and a store is given.
    #[must_use]
    pub fn from_config(
        config: MqttSinkConfig,
        factory: Arc<dyn ClientFactory>,
        store: Option<Arc<dyn StoreClient>>,
    ) -> Self {
        let persistence = match store {
            Some(store) if config.persist_on_error => RetryPersistence::Enabled(store),
            _ => RetryPersistence::Disabled,
        };
        Self::new(Arc::new(SecretAwareConnectionManager::new(config, factory)))
            .with_persistence(persistence)
    }

    /// Sets the function name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the persistence mode.
    #[must_use]
    pub fn with_persistence(mut self, persistence: RetryPersistence) -> Self {
        self.persistence = persistence;
        self
    }

    /// The shared connection manager.
    #[must_use]
    pub const fn manager(&self) -> &Arc<SecretAwareConnectionManager> {
        &self.manager
    }

    async fn send(&self, ctx: &PipelineContext, payload: &[u8]) -> Result<(), ConnectionError> {
        let config = self.manager.config();
        let client = self.manager.connect(ctx.secret_provider().as_ref()).await?;
        client
            .publish(&config.topic, config.qos, config.retain, payload)
            .await
    }

    async fn handle_failure(
        &self,
        ctx: &mut PipelineContext,
        payload: Vec<u8>,
        error: ConnectionError,
    ) -> PipelineError {
        let RetryPersistence::Enabled(store) = &self.persistence else {
            return PipelineError::Export {
                source: error,
                checkpoint_id: None,
            };
        };

        ctx.set_retry_data(payload.clone());

        // A replayed payload already has its checkpoint.
        if ctx.is_replay() {
            return PipelineError::Export {
                source: error,
                checkpoint_id: ctx.checkpoint_id().map(str::to_string),
            };
        }

        let stored = match ctx.checkpoint(payload) {
            Ok(checkpoint) => store.store(checkpoint).await,
            Err(e) => Err(e),
        };
        match stored {
            Ok(id) => {
                info!(
                    checkpoint_id = %id,
                    correlation_id = %ctx.correlation_id(),
                    position = ctx.position(),
                    "Export failed, payload persisted for retry"
                );
                PipelineError::Export {
                    source: error,
                    checkpoint_id: Some(id),
                }
            }
            Err(store_error) => PipelineError::PersistFailed {
                export: error,
                store: store_error,
            },
        }
    }
}

#[async_trait]
impl PipelineFunction for MqttExportStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn fingerprint(&self) -> String {
        let config = self.manager.config();
        format!(
            "{}|{}|{}|{}|{}",
            self.name,
            config.broker_address,
            config.topic,
            u8::from(config.qos),
            config.retain
        )
    }

    async fn call(&self, ctx: &mut PipelineContext, input: Option<Data>) -> Flow {
        let Some(data) = input else {
            return Flow::Fail(PipelineError::NoData {
                function: self.name.clone(),
            });
        };
        let payload = match data.coerce_bytes() {
            Ok(payload) => payload,
            Err(e) => return Flow::Fail(e),
        };

        match self.send(ctx, &payload).await {
            Ok(()) => {
                debug!(
                    correlation_id = %ctx.correlation_id(),
                    topic = %self.manager.config().topic,
                    bytes = payload.len(),
                    "Payload exported"
                );
                Flow::done()
            }
            Err(error) if error.is_delivery_failure() => {
                warn!(correlation_id = %ctx.correlation_id(), error = %error, "Export failed");
                Flow::Fail(self.handle_failure(ctx, payload, error).await)
            }
            Err(error) => Flow::Fail(PipelineError::Connection(error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StoreError;
    use crate::security::InMemorySecretProvider;
    use crate::store::{Checkpoint, MemoryStore, MockStoreClient};
    use crate::testing::FakeClientFactory;
    use pretty_assertions::assert_eq;

    fn stage(factory: &Arc<FakeClientFactory>, persistence: RetryPersistence) -> MqttExportStage {
        let config = MqttSinkConfig::new("tcp://broker:1883", "sensors/temp");
        MqttExportStage::from_config(config, factory.clone(), None).with_persistence(persistence)
    }

    fn ctx() -> PipelineContext {
        PipelineContext::new("svc", Arc::new(InMemorySecretProvider::new()))
            .with_correlation_id("corr")
    }

    #[tokio::test]
    async fn test_success_continues_without_output() {
        let factory = Arc::new(FakeClientFactory::new());
        let export = stage(&factory, RetryPersistence::Disabled);

        let flow = export.call(&mut ctx(), Some(Data::from("temp=72"))).await;
        assert!(matches!(flow, Flow::Continue(None)));

        let published = factory.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "sensors/temp");
        assert_eq!(published[0].payload, b"temp=72".to_vec());
    }

    #[tokio::test]
    async fn test_missing_input_is_fatal() {
        let factory = Arc::new(FakeClientFactory::new());
        let export = stage(&factory, RetryPersistence::Disabled);

        let flow = export.call(&mut ctx(), None).await;
        assert!(matches!(flow, Flow::Fail(PipelineError::NoData { .. })));
        assert_eq!(factory.create_count(), 0);
    }

    #[tokio::test]
    async fn test_uncoercible_input_is_fatal_and_not_persisted() {
        let factory = Arc::new(FakeClientFactory::new());
        let store = Arc::new(MemoryStore::new());
        let export = stage(&factory, RetryPersistence::Enabled(store.clone()));

        let flow = export.call(&mut ctx(), Some(Data::opaque(42_u32))).await;
        match flow {
            Flow::Fail(e) => assert!(e.is_input_error() && !e.is_retryable()),
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_failure_without_persistence_creates_nothing() {
        let factory = Arc::new(FakeClientFactory::new().failing_publishes(1));
        let export = stage(&factory, RetryPersistence::Disabled);

        let mut ctx = ctx();
        let flow = export.call(&mut ctx, Some(Data::from("temp=72"))).await;
        assert!(matches!(
            flow,
            Flow::Fail(PipelineError::Export { checkpoint_id: None, .. })
        ));
        assert!(ctx.retry_data().is_none());
    }

    #[tokio::test]
    async fn test_failure_with_persistence_creates_one_checkpoint() {
        let factory = Arc::new(FakeClientFactory::new().failing_publishes(1));
        let store = Arc::new(MemoryStore::new());
        let export = stage(&factory, RetryPersistence::Enabled(store.clone()));

        let mut ctx = ctx();
        let flow = export.call(&mut ctx, Some(Data::from("temp=72"))).await;
        let Flow::Fail(PipelineError::Export { checkpoint_id: Some(id), .. }) = flow else {
            panic!("expected persisted export failure");
        };

        let stored = store.retrieve_by_service("svc").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id(), id);
        assert_eq!(stored[0].payload(), b"temp=72");
        assert_eq!(stored[0].retry_count(), 0);
        assert_eq!(stored[0].correlation_id(), "corr");
        assert_eq!(ctx.retry_data(), Some(b"temp=72".as_slice()));
    }

    #[tokio::test]
    async fn test_connect_failure_is_persisted() {
        let factory = Arc::new(FakeClientFactory::new().failing_connects(1));
        let store = Arc::new(MemoryStore::new());
        let export = stage(&factory, RetryPersistence::Enabled(store.clone()));

        let flow = export.call(&mut ctx(), Some(Data::from("x"))).await;
        assert!(matches!(flow, Flow::Fail(PipelineError::Export { checkpoint_id: Some(_), .. })));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_store_failure_is_compound() {
        let factory = Arc::new(FakeClientFactory::new().failing_publishes(1));
        let mut store = MockStoreClient::new();
        store
            .expect_store()
            .times(1)
            .returning(|_| Err(StoreError::Backend("disk full".to_string())));
        let export = stage(&factory, RetryPersistence::Enabled(Arc::new(store)));

        let flow = export.call(&mut ctx(), Some(Data::from("x"))).await;
        match flow {
            Flow::Fail(PipelineError::PersistFailed { export, store }) => {
                assert!(matches!(export, ConnectionError::Publish(_)));
                assert!(store.to_string().contains("disk full"));
            }
            other => panic!("expected compound error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_replay_failure_does_not_duplicate_checkpoint() {
        let factory = Arc::new(FakeClientFactory::new().failing_publishes(1));
        let mut store = MockStoreClient::new();
        store.expect_store().never();
        let export = stage(&factory, RetryPersistence::Enabled(Arc::new(store)));

        let mut cp = Checkpoint::new("svc", b"x".to_vec(), 0, "v").unwrap();
        cp.assign_id("existing").unwrap();
        let mut ctx = PipelineContext::from_checkpoint(&cp, Arc::new(InMemorySecretProvider::new()));

        let flow = export.call(&mut ctx, Some(Data::from("x"))).await;
        assert!(matches!(
            flow,
            Flow::Fail(PipelineError::Export { checkpoint_id: Some(ref id), .. }) if id == "existing"
        ));
    }

    #[tokio::test]
    async fn test_secret_failure_is_not_persisted() {
        use crate::sink::AuthMode;

        let factory = Arc::new(FakeClientFactory::new());
        let store = Arc::new(MemoryStore::new());
        let config = MqttSinkConfig::new("tcp://broker:1883", "t")
            .with_auth_mode(AuthMode::UsernamePassword)
            .with_persist_on_error(true);
        let export = MqttExportStage::from_config(config, factory, Some(store.clone()));

        let flow = export.call(&mut ctx(), Some(Data::from("x"))).await;
        assert!(matches!(flow, Flow::Fail(PipelineError::Connection(ConnectionError::Secret(_)))));
        assert!(store.is_empty());
    }

    #[test]
    fn test_fingerprint_tracks_topic() {
        let factory: Arc<dyn ClientFactory> = Arc::new(FakeClientFactory::new());
        let a = MqttExportStage::from_config(MqttSinkConfig::new("tcp://b", "t1"), factory.clone(), None);
        let b = MqttExportStage::from_config(MqttSinkConfig::new("tcp://b", "t2"), factory, None);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
