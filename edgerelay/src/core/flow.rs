//! The result a pipeline function hands back to the executor.

use super::Data;
use crate::errors::PipelineError;

/// Outcome of a single function invocation.
///
/// `Continue` is the `continue = true` case of the chaining contract. `Stop`
/// and `Fail` both halt the chain; no later function runs.
#[derive(Debug)]
pub enum Flow {
    /// Pass the output to the next function.
    Continue(Option<Data>),
    /// Halt without error; the output is the terminal result.
    Stop(Option<Data>),
    /// Halt with an error.
    Fail(PipelineError),
}

impl Flow {
    /// Continues with a value.
    #[must_use]
    pub fn next(data: impl Into<Data>) -> Self {
        Self::Continue(Some(data.into()))
    }

    /// Continues with no output.
    #[must_use]
    pub const fn done() -> Self {
        Self::Continue(None)
    }

    /// Returns true if the chain should keep going.
    #[must_use]
    pub const fn should_continue(&self) -> bool {
        matches!(self, Self::Continue(_))
    }
}

impl From<PipelineError> for Flow {
    fn from(err: PipelineError) -> Self {
        Self::Fail(err)
    }
}
