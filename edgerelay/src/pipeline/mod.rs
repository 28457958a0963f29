//! Function chains and their execution.
//!
//! This module provides:
//! - The [`PipelineFunction`] contract and closure adapters
//! - [`FunctionChain`], an ordered chain with a version fingerprint
//! - Sequential execution and resume-from-checkpoint

mod chain;
mod executor;
mod function;


pub use chain::{ChainBuilder, FunctionChain};
pub use executor::ExecutionOutcome;
pub use function::{FnFunction, PassThrough, PipelineFunction};
