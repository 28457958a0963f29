//! Periodic replay of stored checkpoints.

use super::JitterStrategy;
use crate::cancellation::CancellationToken;
use crate::config::StoreAndForwardConfig;
use crate::runtime::Runtime;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Replays a runtime's pending checkpoints on a fixed, jittered interval.
#[derive(Debug)]
pub struct RetryReplayLoop {
    runtime: Arc<Runtime>,
    interval: Duration,
    jitter: JitterStrategy,
    token: Arc<CancellationToken>,
}

impl RetryReplayLoop {
    /// Creates a loop that stops when the runtime shuts down.
    #[must_use]
    pub fn new(runtime: Arc<Runtime>, interval: Duration) -> Self {
        let token = runtime.shutdown_token().clone();
        Self {
            runtime,
            interval,
            jitter: JitterStrategy::None,
            token,
        }
    }

    /// Creates a loop from a store-and-forward section.
    #[must_use]
    pub fn from_config(runtime: Arc<Runtime>, config: &StoreAndForwardConfig) -> Self {
        Self::new(runtime, config.retry_interval()).with_jitter(config.jitter)
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub const fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Stops the loop on this token instead of the runtime's.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.token = token;
        self
    }

    /// Runs until cancelled, sleeping before every pass.
    ///
    /// Returns the number of passes completed.
    pub async fn run(self) -> usize {
        info!(
            service_key = %self.runtime.service_key(),
            interval_ms = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX),
            "Replay loop started"
        );

        let mut passes = 0;
        loop {
            let delay = self.jitter.apply(self.interval);
            tokio::select! {
                () = self.token.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }

            match self.runtime.replay_pending().await {
                Ok(report) => debug!(total = report.total(), "Replay pass finished"),
                Err(e) => error!(error = %e, "Replay pass failed"),
            }
            passes += 1;
        }

        info!(service_key = %self.runtime.service_key(), passes, "Replay loop stopped");
        passes
    }

    /// Spawns the loop on the current tokio runtime.
    pub fn spawn(self) -> JoinHandle<usize> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{FunctionChain, PassThrough};
    use crate::security::InMemorySecretProvider;
    use crate::store::{Checkpoint, MemoryStore, StoreClient};

    fn runtime(store: Arc<MemoryStore>) -> Arc<Runtime> {
        Arc::new(
            Runtime::new(
                "svc",
                FunctionChain::new(vec![Arc::new(PassThrough::new("export"))]).unwrap(),
                Arc::new(InMemorySecretProvider::new()),
            )
            .with_store(store),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_replays_then_stops() {
        let store = Arc::new(MemoryStore::new());
        let rt = runtime(store.clone());
        let cp = Checkpoint::new("svc", b"temp=72".to_vec(), 0, rt.chain().version()).unwrap();
        store.store(cp).await.unwrap();

        let token = Arc::new(CancellationToken::new());
        let handle = RetryReplayLoop::new(rt, Duration::from_secs(60))
            .with_cancellation(token.clone())
            .spawn();

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(store.is_empty());

        token.cancel("test done");
        assert_eq!(handle.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_pass() {
        let rt = runtime(Arc::new(MemoryStore::new()));
        rt.shutdown_token().cancel("stop");
        let passes = RetryReplayLoop::new(rt, Duration::from_secs(3600)).run().await;
        assert_eq!(passes, 0);
    }
}
