//! Per-service runtime: message execution and checkpoint replay.

use crate::cancellation::CancellationToken;
use crate::config::{StoreAndForwardConfig, VersionPolicy};
use crate::context::{MessageEnvelope, PipelineContext};
use crate::core::Data;
use crate::errors::PipelineError;
use crate::pipeline::{ExecutionOutcome, FunctionChain};
use crate::security::SecretProvider;
use crate::sink::SecretAwareConnectionManager;
use crate::store::{Checkpoint, StoreClient};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What happened to one checkpoint during replay.
#[derive(Debug)]
pub enum ReplayOutcome {
    /// The remaining steps succeeded; the checkpoint was removed.
    Delivered,
    /// The replay failed; the checkpoint was updated with a higher retry count.
    Retrying {
        /// Retry count after this attempt.
        retry_count: u32,
        /// Why the attempt failed.
        error: PipelineError,
    },
    /// The replay failed and the retry cap was reached; the checkpoint was removed.
    Dropped {
        /// Final retry count.
        retry_count: u32,
        /// Why the last attempt failed.
        error: PipelineError,
    },
    /// Cancellation stopped the replay before the chain finished.
    Cancelled,
}

/// A checkpoint that could not be replayed at all.
#[derive(Debug)]
pub struct ReplayFailure {
    /// The checkpoint's ID.
    pub checkpoint_id: String,
    /// The error, e.g. a version mismatch.
    pub error: PipelineError,
}

/// Totals for one replay pass.
#[derive(Debug, Default)]
pub struct ReplayReport {
    /// Checkpoints delivered and removed.
    pub delivered: usize,
    /// Checkpoints kept for another attempt.
    pub retrying: usize,
    /// Checkpoints removed after reaching the retry cap.
    pub dropped: usize,
    /// Checkpoints left untouched by cancellation.
    pub cancelled: usize,
    /// Checkpoints that could not be replayed; they are left in the store.
    pub failures: Vec<ReplayFailure>,
}

impl ReplayReport {
    /// Number of checkpoints looked at.
    #[must_use]
    pub fn total(&self) -> usize {
        self.delivered + self.retrying + self.dropped + self.cancelled + self.failures.len()
    }

    fn record(&mut self, outcome: &ReplayOutcome) {
        match outcome {
            ReplayOutcome::Delivered => self.delivered += 1,
            ReplayOutcome::Retrying { .. } => self.retrying += 1,
            ReplayOutcome::Dropped { .. } => self.dropped += 1,
            ReplayOutcome::Cancelled => self.cancelled += 1,
        }
    }
}

/// Runs one service's function chain for inbound messages and replays its
/// stored checkpoints.
///
/// The chain can be swapped at runtime; executions in flight keep the chain
/// they started with.
pub struct Runtime {
    service_key: String,
    chain: RwLock<Arc<FunctionChain>>,
    secret_provider: Arc<dyn SecretProvider>,
    store: Option<Arc<dyn StoreClient>>,
    version_policy: VersionPolicy,
    max_retry_count: u32,
    shutdown: Arc<CancellationToken>,
    connections: Vec<Arc<SecretAwareConnectionManager>>,
}

impl Runtime {
    /// Creates a runtime without store-and-forward.
    #[must_use]
    pub fn new(
        service_key: impl Into<String>,
        chain: FunctionChain,
        secret_provider: Arc<dyn SecretProvider>,
    ) -> Self {
        Self {
            service_key: service_key.into(),
            chain: RwLock::new(Arc::new(chain)),
            secret_provider,
            store: None,
            version_policy: VersionPolicy::Reject,
            max_retry_count: 0,
            shutdown: Arc::new(CancellationToken::new()),
            connections: Vec::new(),
        }
    }

    /// Sets the retry store used for replay.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn StoreClient>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the version policy.
    #[must_use]
    pub const fn with_version_policy(mut self, policy: VersionPolicy) -> Self {
        self.version_policy = policy;
        self
    }

    /// Sets the retry cap. 0 means unlimited.
    #[must_use]
    pub const fn with_max_retry_count(mut self, max: u32) -> Self {
        self.max_retry_count = max;
        self
    }

    /// Applies the replay settings of a store-and-forward section.
    #[must_use]
    pub const fn with_store_and_forward(self, config: &StoreAndForwardConfig) -> Self {
        self.with_version_policy(config.version_policy)
            .with_max_retry_count(config.max_retry_count)
    }

    /// Registers a connection manager to be disconnected on shutdown.
    #[must_use]
    pub fn with_connection_manager(mut self, manager: Arc<SecretAwareConnectionManager>) -> Self {
        self.connections.push(manager);
        self
    }

    /// The service identity.
    #[must_use]
    pub fn service_key(&self) -> &str {
        &self.service_key
    }

    /// The live chain.
    #[must_use]
    pub fn chain(&self) -> Arc<FunctionChain> {
        self.chain.read().clone()
    }

    /// Replaces the live chain.
    ///
    /// Checkpoints written by the old chain no longer match its fingerprint.
    pub fn set_chain(&self, chain: FunctionChain) {
        let mut current = self.chain.write();
        if current.version() != chain.version() {
            info!(
                service_key = %self.service_key,
                old_version = %current.version(),
                new_version = %chain.version(),
                "Function chain reconfigured"
            );
        }
        *current = Arc::new(chain);
    }

    /// The retry store, if store-and-forward is configured.
    #[must_use]
    pub fn store(&self) -> Option<&Arc<dyn StoreClient>> {
        self.store.as_ref()
    }

    /// Cancelled by [`Runtime::shutdown`].
    #[must_use]
    pub fn shutdown_token(&self) -> &Arc<CancellationToken> {
        &self.shutdown
    }

    /// Runs the chain for one inbound message.
    pub async fn process_message(
        &self,
        mut envelope: MessageEnvelope,
        token: Arc<CancellationToken>,
    ) -> ExecutionOutcome {
        envelope.normalize();
        let mut ctx = PipelineContext::from_envelope(
            self.service_key.clone(),
            &envelope,
            self.secret_provider.clone(),
        )
        .with_cancellation(token);

        let input = if envelope.is_json() {
            serde_json::from_slice(&envelope.payload)
                .map_or_else(|_| Data::Bytes(envelope.payload), Data::Json)
        } else {
            Data::Bytes(envelope.payload)
        };

        self.chain().execute(&mut ctx, Some(input)).await
    }

    /// Replays one checkpoint and records the result in the store.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::VersionMismatch`] under the reject policy and
    /// [`PipelineError::PositionOutOfRange`] when the position does not
    /// exist; the stored checkpoint is left untouched in both cases. If a
    /// failed replay cannot be recorded, [`PipelineError::ReplayNotRecorded`]
    /// carries both causes. A delivered checkpoint that cannot be removed
    /// yields [`PipelineError::Store`] and is delivered again next pass.
    pub async fn replay_checkpoint(
        &self,
        mut checkpoint: Checkpoint,
    ) -> Result<ReplayOutcome, PipelineError> {
        let store = self.store.as_ref().ok_or(PipelineError::NoStore)?;
        let chain = self.chain();

        if checkpoint.version() != chain.version() && self.version_policy == VersionPolicy::Migrate {
            if checkpoint.pipeline_position() >= chain.len() {
                return Err(PipelineError::PositionOutOfRange {
                    position: checkpoint.pipeline_position(),
                    len: chain.len(),
                });
            }
            warn!(
                checkpoint_id = %checkpoint.id(),
                old_version = %checkpoint.version(),
                new_version = %chain.version(),
                "Migrating checkpoint to current chain"
            );
            checkpoint.set_version(chain.version());
        }

        let mut ctx = PipelineContext::from_checkpoint(&checkpoint, self.secret_provider.clone())
            .with_cancellation(self.shutdown.clone());
        let outcome = chain.resume(&mut ctx, &checkpoint).await?;

        match outcome {
            ExecutionOutcome::Completed(_) | ExecutionOutcome::Stopped { .. } => {
                if let Err(e) = store.remove(&checkpoint).await {
                    warn!(
                        checkpoint_id = %checkpoint.id(),
                        error = %e,
                        "Checkpoint delivered but not removed"
                    );
                    return Err(e.into());
                }
                info!(
                    checkpoint_id = %checkpoint.id(),
                    correlation_id = %checkpoint.correlation_id(),
                    retry_count = checkpoint.retry_count(),
                    "Checkpoint replayed"
                );
                Ok(ReplayOutcome::Delivered)
            }
            ExecutionOutcome::Cancelled { .. } => Ok(ReplayOutcome::Cancelled),
            ExecutionOutcome::Failed { error, .. } => {
                checkpoint.increment_retry_count();
                let retry_count = checkpoint.retry_count();
                let capped = self.max_retry_count > 0 && retry_count >= self.max_retry_count;
                let recorded = if capped {
                    store.remove(&checkpoint).await
                } else {
                    store.update(&checkpoint).await
                };
                if let Err(store_error) = recorded {
                    return Err(PipelineError::ReplayNotRecorded {
                        replay: Box::new(error),
                        store: store_error,
                    });
                }

                if capped {
                    warn!(
                        checkpoint_id = %checkpoint.id(),
                        retry_count,
                        error = %error,
                        "Retry limit reached, checkpoint dropped"
                    );
                    Ok(ReplayOutcome::Dropped { retry_count, error })
                } else {
                    debug!(
                        checkpoint_id = %checkpoint.id(),
                        retry_count,
                        error = %error,
                        "Replay failed, checkpoint kept"
                    );
                    Ok(ReplayOutcome::Retrying { retry_count, error })
                }
            }
        }
    }

    /// Replays every stored checkpoint for this service.
    ///
    /// Per-checkpoint errors are collected in the report; only a failed
    /// retrieval fails the pass.
    pub async fn replay_pending(&self) -> Result<ReplayReport, PipelineError> {
        let store = self.store.as_ref().ok_or(PipelineError::NoStore)?;
        let checkpoints = store.retrieve_by_service(&self.service_key).await?;

        let mut report = ReplayReport::default();
        for checkpoint in checkpoints {
            if self.shutdown.is_cancelled() {
                report.cancelled += 1;
                continue;
            }
            let checkpoint_id = checkpoint.id().to_string();
            match self.replay_checkpoint(checkpoint).await {
                Ok(outcome) => report.record(&outcome),
                Err(error) => {
                    warn!(checkpoint_id = %checkpoint_id, error = %error, "Checkpoint not replayed");
                    report.failures.push(ReplayFailure {
                        checkpoint_id,
                        error,
                    });
                }
            }
        }

        if report.total() > 0 {
            info!(
                service_key = %self.service_key,
                delivered = report.delivered,
                retrying = report.retrying,
                dropped = report.dropped,
                failed = report.failures.len(),
                "Replay pass complete"
            );
        }
        Ok(report)
    }

    /// Cancels in-flight work and releases the sink clients and the store.
    pub async fn shutdown(&self) -> Result<(), PipelineError> {
        self.shutdown.cancel("runtime shutdown");
        for manager in &self.connections {
            manager.disconnect().await?;
        }
        if let Some(store) = &self.store {
            store.disconnect().await?;
        }
        info!(service_key = %self.service_key, "Runtime stopped");
        Ok(())
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("service_key", &self.service_key)
            .field("version", &self.chain().version())
            .field("store_and_forward", &self.store.is_some())
            .field("version_policy", &self.version_policy)
            .field("max_retry_count", &self.max_retry_count)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Flow;
    use crate::pipeline::{FnFunction, PassThrough, PipelineFunction};
    use crate::security::InMemorySecretProvider;
    use crate::store::{MemoryStore, MockStoreClient};
    use crate::testing::RecordingFunction;
    use pretty_assertions::assert_eq;

    fn failing() -> Arc<dyn PipelineFunction> {
        Arc::new(FnFunction::new("flaky", |_ctx, _input| {
            Flow::Fail(PipelineError::function("flaky", "still down"))
        }))
    }

    fn runtime(functions: Vec<Arc<dyn PipelineFunction>>, store: Arc<dyn StoreClient>) -> Runtime {
        Runtime::new(
            "svc",
            FunctionChain::new(functions).unwrap(),
            Arc::new(InMemorySecretProvider::new()),
        )
        .with_store(store)
    }

    async fn seed(store: &MemoryStore, version: &str, position: usize) -> Checkpoint {
        store
            .store(Checkpoint::new("svc", b"temp=72".to_vec(), position, version).unwrap())
            .await
            .unwrap();
        store.retrieve_by_service("svc").await.unwrap().remove(0)
    }

    #[tokio::test]
    async fn test_process_message_parses_json() {
        let recorder = Arc::new(RecordingFunction::new("rec"));
        let rt = Runtime::new(
            "svc",
            FunctionChain::new(vec![recorder.clone()]).unwrap(),
            Arc::new(InMemorySecretProvider::new()),
        );

        let envelope = MessageEnvelope::new(br#"{"t":72}"#.to_vec())
            .with_content_type(crate::context::CONTENT_TYPE_JSON);
        let outcome = rt.process_message(envelope, Arc::new(CancellationToken::new())).await;
        assert!(outcome.is_success());
        assert_eq!(recorder.inputs(), vec![Some(Data::Json(serde_json::json!({"t": 72})))]);
    }

    #[tokio::test]
    async fn test_replay_success_removes() {
        let store = Arc::new(MemoryStore::new());
        let tail = Arc::new(RecordingFunction::new("tail"));
        let rt = runtime(vec![Arc::new(PassThrough::new("head")), tail.clone()], store.clone());
        let cp = seed(&store, rt.chain().version(), 1).await;

        let outcome = rt.replay_checkpoint(cp).await.unwrap();
        assert!(matches!(outcome, ReplayOutcome::Delivered));
        assert!(store.is_empty());
        assert_eq!(tail.positions(), vec![1]);
    }

    #[tokio::test]
    async fn test_replay_failure_increments_and_updates() {
        let store = Arc::new(MemoryStore::new());
        let rt = runtime(vec![failing()], store.clone());
        let cp = seed(&store, rt.chain().version(), 0).await;

        let outcome = rt.replay_checkpoint(cp).await.unwrap();
        assert!(matches!(outcome, ReplayOutcome::Retrying { retry_count: 1, .. }));
        let stored = store.retrieve_by_service("svc").await.unwrap();
        assert_eq!(stored[0].retry_count(), 1);
    }

    #[tokio::test]
    async fn test_retry_cap_drops() {
        let store = Arc::new(MemoryStore::new());
        let rt = runtime(vec![failing()], store.clone()).with_max_retry_count(2);
        seed(&store, rt.chain().version(), 0).await;

        let first = rt.replay_pending().await.unwrap();
        assert_eq!(first.retrying, 1);
        let second = rt.replay_pending().await.unwrap();
        assert_eq!(second.dropped, 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_version_mismatch_rejected_and_kept() {
        let store = Arc::new(MemoryStore::new());
        let rt = runtime(vec![Arc::new(PassThrough::new("a"))], store.clone());
        let cp = seed(&store, "old-version", 0).await;

        let err = rt.replay_checkpoint(cp.clone()).await.unwrap_err();
        assert!(matches!(err, PipelineError::VersionMismatch { .. }));
        assert_eq!(store.retrieve_by_service("svc").await.unwrap(), vec![cp]);
    }

    #[tokio::test]
    async fn test_migrate_policy_restamps() {
        let store = Arc::new(MemoryStore::new());
        let rt = runtime(vec![failing()], store.clone()).with_version_policy(VersionPolicy::Migrate);
        let cp = seed(&store, "old-version", 0).await;

        rt.replay_checkpoint(cp).await.unwrap();
        let stored = store.retrieve_by_service("svc").await.unwrap();
        assert_eq!(stored[0].version(), rt.chain().version());
    }

    #[tokio::test]
    async fn test_migrate_policy_checks_position() {
        let store = Arc::new(MemoryStore::new());
        let rt = runtime(vec![failing()], store.clone()).with_version_policy(VersionPolicy::Migrate);
        let cp = seed(&store, "old-version", 3).await;

        let err = rt.replay_checkpoint(cp).await.unwrap_err();
        assert!(matches!(err, PipelineError::PositionOutOfRange { position: 3, len: 1 }));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_set_chain_changes_version() {
        let store = Arc::new(MemoryStore::new());
        let rt = runtime(vec![Arc::new(PassThrough::new("a"))], store);
        let before = rt.chain().version().to_string();

        rt.set_chain(FunctionChain::new(vec![Arc::new(PassThrough::new("b"))]).unwrap());
        assert_ne!(rt.chain().version(), before);
    }

    #[tokio::test]
    async fn test_replay_without_store() {
        let rt = Runtime::new(
            "svc",
            FunctionChain::new(vec![Arc::new(PassThrough::new("a"))]).unwrap(),
            Arc::new(InMemorySecretProvider::new()),
        );
        assert!(matches!(rt.replay_pending().await, Err(PipelineError::NoStore)));
    }

    #[tokio::test]
    async fn test_retrieval_failure_fails_pass() {
        let mut store = MockStoreClient::new();
        store
            .expect_retrieve_by_service()
            .returning(|_| Err(crate::errors::StoreError::Disconnected));
        let rt = runtime(vec![Arc::new(PassThrough::new("a"))], Arc::new(store));

        assert!(matches!(rt.replay_pending().await, Err(PipelineError::Store(_))));
    }

    #[tokio::test]
    async fn test_shutdown_disconnects_store() {
        let store = Arc::new(MemoryStore::new());
        let rt = runtime(vec![Arc::new(PassThrough::new("a"))], store.clone());
        rt.shutdown().await.unwrap();

        assert!(rt.shutdown_token().is_cancelled());
        assert!(store.retrieve_by_service("svc").await.is_err());
    }

    #[tokio::test]
    async fn test_unrecorded_failure_keeps_replay_cause() {
        let mut store = MockStoreClient::new();
        store
            .expect_update()
            .returning(|_| Err(crate::errors::StoreError::Backend("disk full".to_string())));
        let broker_down: Arc<dyn PipelineFunction> = Arc::new(FnFunction::new("export", |_ctx, _input| {
            Flow::Fail(PipelineError::function("export", "broker still down"))
        }));
        let rt = runtime(vec![broker_down], Arc::new(store));
        let mut cp = Checkpoint::new("svc", b"temp=72".to_vec(), 0, rt.chain().version()).unwrap();
        cp.assign_id("cp-1").unwrap();

        let err = rt.replay_checkpoint(cp).await.unwrap_err();
        let PipelineError::ReplayNotRecorded { replay, store } = &err else {
            panic!("expected both causes, got {err:?}");
        };
        assert!(replay.to_string().contains("broker still down"));
        assert!(matches!(store, crate::errors::StoreError::Backend(_)));
    }

    #[tokio::test]
    async fn test_unrecorded_drop_keeps_replay_cause() {
        let mut store = MockStoreClient::new();
        store
            .expect_remove()
            .returning(|_| Err(crate::errors::StoreError::Disconnected));
        let rt = runtime(vec![failing()], Arc::new(store)).with_max_retry_count(1);
        let mut cp = Checkpoint::new("svc", b"temp=72".to_vec(), 0, rt.chain().version()).unwrap();
        cp.assign_id("cp-1").unwrap();

        let err = rt.replay_checkpoint(cp).await.unwrap_err();
        assert!(matches!(err, PipelineError::ReplayNotRecorded { .. }));
        assert!(err.to_string().contains("still down"));
    }
}
