//! The pipeline function trait and closure adapters.

use crate::context::PipelineContext;
use crate::core::{Data, Flow};
use async_trait::async_trait;
use std::fmt::Debug;

/// A single step in a function chain.
///
/// Receives the previous function's output (or the trigger payload for the
/// first function) and decides whether the chain continues.
#[async_trait]
pub trait PipelineFunction: Send + Sync + Debug {
    /// Returns the name of the function.
    fn name(&self) -> &str;

    /// Contribution to the chain's version fingerprint.
    ///
    /// Defaults to the name; functions whose configuration changes what a
    /// resumed run would do should include that configuration.
    fn fingerprint(&self) -> String {
        self.name().to_string()
    }

    /// Executes the function.
    async fn call(&self, ctx: &mut PipelineContext, input: Option<Data>) -> Flow;
}

/// A synchronous closure-based function.
pub struct FnFunction<F>
where
    F: Fn(&mut PipelineContext, Option<Data>) -> Flow + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnFunction<F>
where
    F: Fn(&mut PipelineContext, Option<Data>) -> Flow + Send + Sync,
{
    /// Creates a new closure-based function.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnFunction<F>
where
    F: Fn(&mut PipelineContext, Option<Data>) -> Flow + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnFunction").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F> PipelineFunction for FnFunction<F>
where
    F: Fn(&mut PipelineContext, Option<Data>) -> Flow + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, ctx: &mut PipelineContext, input: Option<Data>) -> Flow {
        (self.func)(ctx, input)
    }
}

/// Passes its input through unchanged.
#[derive(Debug, Clone)]
pub struct PassThrough {
    name: String,
}

impl PassThrough {
    /// Creates a new pass-through function.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl PipelineFunction for PassThrough {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, _ctx: &mut PipelineContext, input: Option<Data>) -> Flow {
        Flow::Continue(input)
    }
}
