//! Message sources feeding the runtime.
//!
//! Concrete network triggers live outside this crate; they implement
//! [`Trigger`] and hand each message to [`Runtime::process_message`].

use crate::cancellation::CancellationToken;
use crate::context::MessageEnvelope;
use crate::errors::TriggerError;
use crate::pipeline::ExecutionOutcome;
use crate::runtime::Runtime;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

/// A source of inbound messages.
#[async_trait]
pub trait Trigger: Send + Sync {
    /// Feeds messages to `runtime` until `token` is cancelled or the source
    /// is exhausted. Returns the number of messages processed.
    async fn run(
        &self,
        runtime: Arc<Runtime>,
        token: Arc<CancellationToken>,
    ) -> Result<usize, TriggerError>;
}

/// Consumes envelopes from a tokio channel, one task per message.
#[derive(Debug)]
pub struct ChannelTrigger {
    receiver: Mutex<Option<mpsc::Receiver<MessageEnvelope>>>,
}

impl ChannelTrigger {
    /// Creates a trigger and the sender that feeds it.
    #[must_use]
    pub fn new(buffer: usize) -> (Self, mpsc::Sender<MessageEnvelope>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (Self::from_receiver(receiver), sender)
    }

    /// Wraps an existing receiver.
    #[must_use]
    pub fn from_receiver(receiver: mpsc::Receiver<MessageEnvelope>) -> Self {
        Self {
            receiver: Mutex::new(Some(receiver)),
        }
    }
}

fn log_outcome(outcome: &ExecutionOutcome) {
    match outcome {
        ExecutionOutcome::Failed { at, error } => {
            warn!(position = at, error = %error, "Message execution failed");
        }
        ExecutionOutcome::Cancelled { at, .. } => debug!(position = at, "Message execution cancelled"),
        ExecutionOutcome::Completed(_) | ExecutionOutcome::Stopped { .. } => {}
    }
}

/// Logs a finished message task. Panicked tasks are counted separately and
/// the set keeps draining.
fn record(
    finished: Result<ExecutionOutcome, JoinError>,
    processed: &mut usize,
    panicked: &mut usize,
) {
    match finished {
        Ok(outcome) => {
            log_outcome(&outcome);
            *processed += 1;
        }
        Err(e) => {
            error!(error = %e, "Message task failed");
            *panicked += 1;
        }
    }
}

#[async_trait]
impl Trigger for ChannelTrigger {
    async fn run(
        &self,
        runtime: Arc<Runtime>,
        token: Arc<CancellationToken>,
    ) -> Result<usize, TriggerError> {
        let mut receiver = self.receiver.lock().take().ok_or(TriggerError::AlreadyRunning)?;
        info!(service_key = %runtime.service_key(), "Channel trigger started");

        let mut tasks = JoinSet::new();
        let mut processed = 0;
        let mut panicked = 0;
        loop {
            let envelope = tokio::select! {
                () = token.cancelled() => break,
                received = receiver.recv() => match received {
                    Some(envelope) => envelope,
                    None => break,
                },
            };

            let runtime = runtime.clone();
            let token = token.clone();
            tasks.spawn(async move { runtime.process_message(envelope, token).await });

            while let Some(finished) = tasks.try_join_next() {
                record(finished, &mut processed, &mut panicked);
            }
        }

        while let Some(finished) = tasks.join_next().await {
            record(finished, &mut processed, &mut panicked);
        }

        info!(processed, panicked, "Channel trigger stopped");
        Ok(processed)
    }
}
