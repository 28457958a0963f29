//! Testing utilities for edgerelay pipelines.
//!
//! This module provides:
//! - A counting, rotatable secret provider
//! - A fake broker client and factory with scripted failures
//! - A recording pipeline function
//! - [`TestRelay`], a runtime wired to all of the above

mod fixtures;
mod mocks;

pub use fixtures::{
    broker_credentials, json_envelope, sensor_envelope, TestRelay, TestRelayBuilder,
    TEST_SECRET_PATH,
};
pub use mocks::{
    CountingSecretProvider, FakeClientFactory, FakePublishClient, PublishedMessage,
    RecordingFunction,
};
