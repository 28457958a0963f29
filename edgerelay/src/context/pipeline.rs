//! Per-message state threaded through the function chain.

use super::MessageEnvelope;
use crate::cancellation::CancellationToken;
use crate::errors::StoreError;
use crate::security::SecretProvider;
use crate::store::Checkpoint;
use std::sync::Arc;

/// The mutable context for one pipeline execution.
///
/// Created by the runtime for each inbound message, or rebuilt from a
/// [`Checkpoint`] for a replay. The executor keeps `position` and `version`
/// current; functions may fill the retry-data slot.
pub struct PipelineContext {
    service_key: String,
    correlation_id: String,
    event_id: String,
    event_checksum: String,
    secret_provider: Arc<dyn SecretProvider>,
    retry_data: Option<Vec<u8>>,
    position: usize,
    version: String,
    replay: bool,
    checkpoint_id: String,
    cancellation: Arc<CancellationToken>,
}

impl PipelineContext {
    /// Creates a context with no message metadata.
    #[must_use]
    pub fn new(service_key: impl Into<String>, secret_provider: Arc<dyn SecretProvider>) -> Self {
        Self {
            service_key: service_key.into(),
            correlation_id: String::new(),
            event_id: String::new(),
            event_checksum: String::new(),
            secret_provider,
            retry_data: None,
            position: 0,
            version: String::new(),
            replay: false,
            checkpoint_id: String::new(),
            cancellation: Arc::new(CancellationToken::new()),
        }
    }

    /// Creates a context for a freshly triggered message.
    #[must_use]
    pub fn from_envelope(
        service_key: impl Into<String>,
        envelope: &MessageEnvelope,
        secret_provider: Arc<dyn SecretProvider>,
    ) -> Self {
        Self {
            correlation_id: envelope.correlation_id.clone(),
            event_id: envelope.event_id.clone(),
            event_checksum: envelope.checksum.clone(),
            ..Self::new(service_key, secret_provider)
        }
    }

    /// Rebuilds a context from a stored checkpoint for replay.
    #[must_use]
    pub fn from_checkpoint(checkpoint: &Checkpoint, secret_provider: Arc<dyn SecretProvider>) -> Self {
        Self {
            correlation_id: checkpoint.correlation_id().to_string(),
            event_id: checkpoint.event_id().to_string(),
            event_checksum: checkpoint.event_checksum().to_string(),
            position: checkpoint.pipeline_position(),
            version: checkpoint.version().to_string(),
            replay: true,
            checkpoint_id: checkpoint.id().to_string(),
            ..Self::new(checkpoint.service_key(), secret_provider)
        }
    }

    /// Shares a cancellation token with this execution.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancellation = token;
        self
    }

    /// Sets the correlation ID.
    #[must_use]
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = id.into();
        self
    }

    /// The owning service.
    #[must_use]
    pub fn service_key(&self) -> &str {
        &self.service_key
    }

    /// End-to-end tracing identifier.
    #[must_use]
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Identifier of the source event.
    #[must_use]
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    /// Checksum of the source message.
    #[must_use]
    pub fn event_checksum(&self) -> &str {
        &self.event_checksum
    }

    /// The credential provider for outbound clients.
    #[must_use]
    pub fn secret_provider(&self) -> &Arc<dyn SecretProvider> {
        &self.secret_provider
    }

    /// Index of the function currently executing.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }

    /// Fingerprint of the chain executing this context.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// True when this execution is a replay of a stored checkpoint.
    #[must_use]
    pub const fn is_replay(&self) -> bool {
        self.replay
    }

    /// ID of the checkpoint being replayed, if any.
    #[must_use]
    pub fn checkpoint_id(&self) -> Option<&str> {
        (!self.checkpoint_id.is_empty()).then_some(self.checkpoint_id.as_str())
    }

    /// The execution's cancellation token.
    #[must_use]
    pub fn cancellation(&self) -> &Arc<CancellationToken> {
        &self.cancellation
    }

    /// Returns true if cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub(crate) fn set_position(&mut self, position: usize) {
        self.position = position;
    }

    pub(crate) fn set_version(&mut self, version: impl Into<String>) {
        self.version = version.into();
    }

    /// Records the payload that should be retried later.
    pub fn set_retry_data(&mut self, payload: Vec<u8>) {
        self.retry_data = Some(payload);
    }

    /// The payload recorded for retry, if any.
    #[must_use]
    pub fn retry_data(&self) -> Option<&[u8]> {
        self.retry_data.as_deref()
    }

    /// Takes the recorded retry payload.
    pub fn take_retry_data(&mut self) -> Option<Vec<u8>> {
        self.retry_data.take()
    }

    /// Builds a checkpoint that resumes this execution at the current function.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::EmptyPayload`] if `payload` is empty.
    pub fn checkpoint(&self, payload: Vec<u8>) -> Result<Checkpoint, StoreError> {
        Ok(
            Checkpoint::new(&self.service_key, payload, self.position, &self.version)?
                .with_correlation_id(&self.correlation_id)
                .with_event_id(&self.event_id)
                .with_event_checksum(&self.event_checksum),
        )
    }
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("service_key", &self.service_key)
            .field("correlation_id", &self.correlation_id)
            .field("position", &self.position)
            .field("version", &self.version)
            .field("replay", &self.replay)
            .field("retry_data", &self.retry_data.as_ref().map(Vec::len))
            .finish_non_exhaustive()
    }
}
