//! Assembled test relays and envelope builders.

use super::{CountingSecretProvider, FakeClientFactory};
use crate::cancellation::CancellationToken;
use crate::config::{MqttSinkConfig, VersionPolicy};
use crate::context::{MessageEnvelope, CONTENT_TYPE_JSON};
use crate::errors::{PipelineError, StoreError};
use crate::pipeline::{ExecutionOutcome, FunctionChain, PipelineFunction};
use crate::runtime::Runtime;
use crate::sink::{AuthMode, MqttExportStage, RetryPersistence, SecretAwareConnectionManager};
use crate::store::{Checkpoint, MemoryStore, StoreClient};
use std::collections::HashMap;
use std::sync::Arc;

/// Secret path used by [`TestRelay`].
pub const TEST_SECRET_PATH: &str = "mqtt";

/// An envelope carrying a text payload.
#[must_use]
pub fn sensor_envelope(payload: &str) -> MessageEnvelope {
    MessageEnvelope::new(payload.as_bytes().to_vec()).with_event_id(uuid::Uuid::new_v4().to_string())
}

/// An envelope carrying a JSON payload.
#[must_use]
pub fn json_envelope(value: &serde_json::Value) -> MessageEnvelope {
    MessageEnvelope::new(value.to_string().into_bytes()).with_content_type(CONTENT_TYPE_JSON)
}

/// Username/password secrets for the fake broker.
#[must_use]
pub fn broker_credentials(username: &str) -> HashMap<String, String> {
    HashMap::from([
        ("username".to_string(), username.to_string()),
        ("password".to_string(), "secret".to_string()),
    ])
}

/// A runtime wired to a fake broker, a memory store and a counting provider.
///
/// The chain is the configured functions followed by an MQTT export stage.
#[derive(Debug)]
pub struct TestRelay {
    /// The runtime under test.
    pub runtime: Arc<Runtime>,
    /// The retry store.
    pub store: Arc<MemoryStore>,
    /// The fake broker client factory.
    pub factory: Arc<FakeClientFactory>,
    /// The secret provider.
    pub provider: Arc<CountingSecretProvider>,
    /// The shared export stage.
    pub export: Arc<MqttExportStage>,
}

impl TestRelay {
    /// Starts a builder.
    #[must_use]
    pub fn builder() -> TestRelayBuilder {
        TestRelayBuilder::default()
    }

    /// Runs one text message through the chain.
    pub async fn process(&self, payload: &str) -> ExecutionOutcome {
        self.runtime
            .process_message(sensor_envelope(payload), Arc::new(CancellationToken::new()))
            .await
    }

    /// Every checkpoint stored for the relay's service.
    pub async fn checkpoints(&self) -> Result<Vec<Checkpoint>, StoreError> {
        self.store.retrieve_by_service(self.runtime.service_key()).await
    }

    /// Swaps in a new chain of `functions` followed by the same export stage.
    pub fn reconfigure(&self, functions: Vec<Arc<dyn PipelineFunction>>) -> Result<(), PipelineError> {
        let mut functions = functions;
        functions.push(self.export.clone());
        self.runtime.set_chain(FunctionChain::new(functions)?);
        Ok(())
    }
}

/// Builder for [`TestRelay`].
#[derive(Debug)]
pub struct TestRelayBuilder {
    service_key: String,
    functions: Vec<Arc<dyn PipelineFunction>>,
    persist_on_error: bool,
    version_policy: VersionPolicy,
    max_retry_count: u32,
    factory: FakeClientFactory,
}

impl Default for TestRelayBuilder {
    fn default() -> Self {
        Self {
            service_key: "test-service".to_string(),
            functions: Vec::new(),
            persist_on_error: true,
            version_policy: VersionPolicy::Reject,
            max_retry_count: 0,
            factory: FakeClientFactory::new(),
        }
    }
}

impl TestRelayBuilder {
    /// Sets the service key.
    #[must_use]
    pub fn service_key(mut self, key: impl Into<String>) -> Self {
        self.service_key = key.into();
        self
    }

    /// Adds a function before the export stage.
    #[must_use]
    pub fn function(mut self, function: Arc<dyn PipelineFunction>) -> Self {
        self.functions.push(function);
        self
    }

    /// Enables or disables persistence on export failure.
    #[must_use]
    pub const fn persist_on_error(mut self, persist: bool) -> Self {
        self.persist_on_error = persist;
        self
    }

    /// Sets the replay version policy.
    #[must_use]
    pub const fn version_policy(mut self, policy: VersionPolicy) -> Self {
        self.version_policy = policy;
        self
    }

    /// Sets the retry cap.
    #[must_use]
    pub const fn max_retry_count(mut self, max: u32) -> Self {
        self.max_retry_count = max;
        self
    }

    /// Uses a pre-scripted client factory.
    #[must_use]
    pub fn factory(mut self, factory: FakeClientFactory) -> Self {
        self.factory = factory;
        self
    }

    /// Assembles the relay.
    pub fn build(self) -> Result<TestRelay, PipelineError> {
        let store = Arc::new(MemoryStore::new());
        let factory = Arc::new(self.factory);
        let provider = Arc::new(CountingSecretProvider::new(
            TEST_SECRET_PATH,
            broker_credentials("edge"),
        ));

        let sink = MqttSinkConfig::new("tcp://broker:1883", "edge/events")
            .with_client_id("edge-test")
            .with_secret_path(TEST_SECRET_PATH)
            .with_auth_mode(AuthMode::UsernamePassword)
            .with_persist_on_error(self.persist_on_error);
        let manager = Arc::new(SecretAwareConnectionManager::new(sink, factory.clone()));

        let persistence = if self.persist_on_error {
            RetryPersistence::Enabled(store.clone())
        } else {
            RetryPersistence::Disabled
        };
        let export = Arc::new(MqttExportStage::new(manager.clone()).with_persistence(persistence));

        let mut functions = self.functions;
        functions.push(export.clone());
        let runtime = Runtime::new(self.service_key, FunctionChain::new(functions)?, provider.clone())
            .with_store(store.clone())
            .with_version_policy(self.version_policy)
            .with_max_retry_count(self.max_retry_count)
            .with_connection_manager(manager);

        Ok(TestRelay {
            runtime: Arc::new(runtime),
            store,
            factory,
            provider,
            export,
        })
    }
}
