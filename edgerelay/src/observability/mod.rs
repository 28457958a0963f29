//! Logging initialization.
//!
//! The library emits `tracing` events with structured fields
//! (`service_key`, `correlation_id`, `checkpoint_id`, `position`); hosts call
//! [`init_logging`] once at startup to print them.

mod logging;

pub use logging::init_logging;
