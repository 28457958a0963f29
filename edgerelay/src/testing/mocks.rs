//! Fakes for the secret provider, broker client and pipeline functions.

use crate::context::PipelineContext;
use crate::core::{Data, Flow};
use crate::errors::{ConnectionError, SecretError};
use crate::pipeline::PipelineFunction;
use crate::security::SecretProvider;
use crate::sink::{ClientFactory, ClientOptions, PublishClient, QoS};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A secret provider for one path that counts fetches and can rotate.
#[derive(Debug)]
pub struct CountingSecretProvider {
    path: String,
    secrets: RwLock<HashMap<String, String>>,
    last_updated: RwLock<DateTime<Utc>>,
    fetches: AtomicUsize,
    delay: Option<Duration>,
}

impl CountingSecretProvider {
    /// Creates a provider serving `secrets` at `path`.
    #[must_use]
    pub fn new(path: impl Into<String>, secrets: HashMap<String, String>) -> Self {
        Self {
            path: path.into(),
            secrets: RwLock::new(secrets),
            last_updated: RwLock::new(DateTime::<Utc>::UNIX_EPOCH),
            fetches: AtomicUsize::new(0),
            delay: None,
        }
    }

    /// Makes every fetch take `delay`, widening race windows in tests.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Replaces the secrets and advances `secrets_last_updated`.
    pub fn rotate(&self, secrets: HashMap<String, String>) {
        *self.secrets.write() = secrets;
        let mut last = self.last_updated.write();
        let now = Utc::now();
        *last = if now > *last {
            now
        } else {
            *last + chrono::Duration::microseconds(1)
        };
    }

    /// Number of `get_secrets` calls so far.
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretProvider for CountingSecretProvider {
    async fn get_secrets(&self, path: &str) -> Result<HashMap<String, String>, SecretError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if path != self.path {
            return Err(SecretError::NotFound {
                path: path.to_string(),
            });
        }
        Ok(self.secrets.read().clone())
    }

    fn secrets_last_updated(&self) -> DateTime<Utc> {
        *self.last_updated.read()
    }
}

/// Remaining scripted failures, shared by every client a factory creates.
#[derive(Debug, Default)]
struct FailureScript {
    connects: AtomicUsize,
    publishes: AtomicUsize,
}

impl FailureScript {
    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// One message accepted by a [`FakePublishClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Publish topic.
    pub topic: String,
    /// Publish QoS.
    pub qos: QoS,
    /// Retained flag.
    pub retain: bool,
    /// Payload bytes.
    pub payload: Vec<u8>,
}

/// An in-memory broker client with scripted failures.
#[derive(Debug)]
pub struct FakePublishClient {
    options: ClientOptions,
    connected: AtomicBool,
    connects: AtomicUsize,
    script: Arc<FailureScript>,
    published: Mutex<Vec<PublishedMessage>>,
}

impl FakePublishClient {
    /// Creates a client that never fails.
    #[must_use]
    pub fn new(options: ClientOptions) -> Self {
        Self::scripted(options, Arc::new(FailureScript::default()))
    }

    fn scripted(options: ClientOptions, script: Arc<FailureScript>) -> Self {
        Self {
            options,
            connected: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            script,
            published: Mutex::new(Vec::new()),
        }
    }

    /// The options the client was built with.
    #[must_use]
    pub const fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Number of connect attempts, successful or not.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Messages accepted so far.
    #[must_use]
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().clone()
    }

    /// Simulates the broker dropping the session.
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl PublishClient for FakePublishClient {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<(), ConnectionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if FailureScript::take(&self.script.connects) {
            return Err(ConnectionError::Connect(format!(
                "{} unreachable",
                self.options.broker_address
            )));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: &[u8],
    ) -> Result<(), ConnectionError> {
        if !self.is_connected() {
            return Err(ConnectionError::Publish("not connected".to_string()));
        }
        if FailureScript::take(&self.script.publishes) {
            return Err(ConnectionError::Publish("network unreachable".to_string()));
        }
        self.published.lock().push(PublishedMessage {
            topic: topic.to_string(),
            qos,
            retain,
            payload: payload.to_vec(),
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ConnectionError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// A client factory that records every client it creates.
#[derive(Debug, Default)]
pub struct FakeClientFactory {
    script: Arc<FailureScript>,
    clients: Mutex<Vec<Arc<FakePublishClient>>>,
}

impl FakeClientFactory {
    /// Creates a factory whose clients never fail.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` connect attempts fail, across all clients.
    #[must_use]
    pub fn failing_connects(self, n: usize) -> Self {
        self.fail_connects(n);
        self
    }

    /// Makes the next `n` publishes fail, across all clients.
    #[must_use]
    pub fn failing_publishes(self, n: usize) -> Self {
        self.fail_publishes(n);
        self
    }

    /// Sets the remaining connect failures.
    pub fn fail_connects(&self, n: usize) {
        self.script.connects.store(n, Ordering::SeqCst);
    }

    /// Sets the remaining publish failures.
    pub fn fail_publishes(&self, n: usize) {
        self.script.publishes.store(n, Ordering::SeqCst);
    }

    /// Number of clients created.
    #[must_use]
    pub fn create_count(&self) -> usize {
        self.clients.lock().len()
    }

    /// Every client created, oldest first.
    #[must_use]
    pub fn clients(&self) -> Vec<Arc<FakePublishClient>> {
        self.clients.lock().clone()
    }

    /// Every message published through any client.
    #[must_use]
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.clients
            .lock()
            .iter()
            .flat_map(|c| c.published())
            .collect()
    }
}

impl ClientFactory for FakeClientFactory {
    fn create(&self, options: ClientOptions) -> Result<Arc<dyn PublishClient>, ConnectionError> {
        let client = Arc::new(FakePublishClient::scripted(options, self.script.clone()));
        self.clients.lock().push(client.clone());
        Ok(client)
    }
}

/// A pass-through function that records every input it sees.
#[derive(Debug)]
pub struct RecordingFunction {
    name: String,
    inputs: Mutex<Vec<Option<Data>>>,
    positions: Mutex<Vec<usize>>,
}

impl RecordingFunction {
    /// Creates a recording function.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: Mutex::new(Vec::new()),
            positions: Mutex::new(Vec::new()),
        }
    }

    /// Number of invocations.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.inputs.lock().len()
    }

    /// Inputs received, in order.
    #[must_use]
    pub fn inputs(&self) -> Vec<Option<Data>> {
        self.inputs.lock().clone()
    }

    /// Context positions observed, in order.
    #[must_use]
    pub fn positions(&self) -> Vec<usize> {
        self.positions.lock().clone()
    }
}

#[async_trait]
impl PipelineFunction for RecordingFunction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, ctx: &mut PipelineContext, input: Option<Data>) -> Flow {
        self.inputs.lock().push(input.clone());
        self.positions.lock().push(ctx.position());
        Flow::Continue(input)
    }
}
