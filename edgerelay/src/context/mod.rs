//! Execution context for pipeline runs.
//!
//! This module provides:
//! - The inbound message envelope handed over by triggers
//! - The per-execution context threaded through every function

mod envelope;
mod pipeline;

pub use envelope::{checksum_of, MessageEnvelope, CONTENT_TYPE_BYTES, CONTENT_TYPE_JSON};
pub use pipeline::PipelineContext;
