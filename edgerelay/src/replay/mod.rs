//! Store-and-forward replay scheduling.
//!
//! Replay itself lives on [`crate::runtime::Runtime`]; this module decides
//! when it runs.

mod schedule;
mod scheduler;

pub use schedule::JitterStrategy;
pub use scheduler::RetryReplayLoop;
