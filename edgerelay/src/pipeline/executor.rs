//! Sequential chain execution and resume-from-checkpoint.

use super::FunctionChain;
use crate::context::PipelineContext;
use crate::core::{Data, Flow};
use crate::errors::PipelineError;
use crate::store::Checkpoint;
use tracing::{debug, info_span, warn, Instrument};

/// How a chain execution ended.
#[derive(Debug)]
pub enum ExecutionOutcome {
    /// Every function returned `Continue`; carries the last output.
    Completed(Option<Data>),
    /// A function halted the chain without error.
    Stopped {
        /// Index of the halting function.
        at: usize,
        /// Its terminal output.
        output: Option<Data>,
    },
    /// A function halted the chain with an error.
    Failed {
        /// Index of the failing function.
        at: usize,
        /// The terminal error.
        error: PipelineError,
    },
    /// Cancellation was observed before the function at `at` ran.
    Cancelled {
        /// Index of the function that was not run.
        at: usize,
        /// Cancellation reason.
        reason: String,
    },
}

impl ExecutionOutcome {
    /// Returns true for `Completed` and `Stopped`.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Stopped { .. })
    }

    /// Returns the error, if the execution failed.
    #[must_use]
    pub const fn error(&self) -> Option<&PipelineError> {
        match self {
            Self::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Converts the outcome into the terminal result.
    pub fn into_result(self) -> Result<Option<Data>, PipelineError> {
        match self {
            Self::Completed(output) | Self::Stopped { output, .. } => Ok(output),
            Self::Failed { error, .. } => Err(error),
            Self::Cancelled { reason, .. } => Err(PipelineError::Cancelled(reason)),
        }
    }
}

impl FunctionChain {
    /// Runs the whole chain with `input` as the first function's prior output.
    pub async fn execute(&self, ctx: &mut PipelineContext, input: Option<Data>) -> ExecutionOutcome {
        self.run_from(ctx, 0, input).await
    }

    /// Runs the chain starting at `start`.
    ///
    /// Functions run strictly in order. The context's position and version
    /// are kept current so a function can checkpoint itself. A `start` past
    /// the end completes immediately with `input`.
    pub async fn run_from(
        &self,
        ctx: &mut PipelineContext,
        start: usize,
        input: Option<Data>,
    ) -> ExecutionOutcome {
        ctx.set_version(self.version());
        let span = info_span!(
            "pipeline",
            service_key = %ctx.service_key(),
            correlation_id = %ctx.correlation_id(),
            start,
            replay = ctx.is_replay(),
        );

        async move {
            let mut data = input;
            for (index, function) in self.functions().iter().enumerate().skip(start) {
                if ctx.is_cancelled() {
                    let reason = ctx.cancellation().reason().unwrap_or_default();
                    debug!(position = index, %reason, "Execution cancelled");
                    return ExecutionOutcome::Cancelled { at: index, reason };
                }

                ctx.set_position(index);
                debug!(function = function.name(), position = index, "Invoking function");

                match function.call(ctx, data).await {
                    Flow::Continue(output) => data = output,
                    Flow::Stop(output) => {
                        debug!(function = function.name(), position = index, "Chain halted");
                        return ExecutionOutcome::Stopped { at: index, output };
                    }
                    Flow::Fail(error) => {
                        warn!(
                            function = function.name(),
                            position = index,
                            error = %error,
                            "Function failed"
                        );
                        return ExecutionOutcome::Failed { at: index, error };
                    }
                }
            }
            ExecutionOutcome::Completed(data)
        }
        .instrument(span)
        .await
    }

    /// Resumes a stored checkpoint at its recorded position.
    ///
    /// The checkpoint payload becomes the prior output of the function at
    /// the recorded position.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::VersionMismatch`] if the checkpoint was
    /// written by a different chain and [`PipelineError::PositionOutOfRange`]
    /// if its position does not exist in this chain. Nothing runs in either
    /// case.
    pub async fn resume(
        &self,
        ctx: &mut PipelineContext,
        checkpoint: &Checkpoint,
    ) -> Result<ExecutionOutcome, PipelineError> {
        self.check_resumable(checkpoint)?;
        let input = Some(Data::Bytes(checkpoint.payload().to_vec()));
        Ok(self.run_from(ctx, checkpoint.pipeline_position(), input).await)
    }

    /// Verifies that a checkpoint can be resumed on this chain.
    pub fn check_resumable(&self, checkpoint: &Checkpoint) -> Result<(), PipelineError> {
        if checkpoint.version() != self.version() {
            return Err(PipelineError::VersionMismatch {
                checkpoint: checkpoint.version().to_string(),
                current: self.version().to_string(),
            });
        }
        if checkpoint.pipeline_position() >= self.len() {
            return Err(PipelineError::PositionOutOfRange {
                position: checkpoint.pipeline_position(),
                len: self.len(),
            });
        }
        Ok(())
    }
}
