//! Publish client seam.
//!
//! The broker client is an owned resource behind these traits, so the
//! connection manager works with any MQTT library or with test fakes.

use super::{ClientOptions, QoS};
use crate::errors::ConnectionError;
use async_trait::async_trait;
use std::sync::Arc;

/// A connected (or connectable) broker client.
#[async_trait]
pub trait PublishClient: Send + Sync {
    /// Returns true while the session is up.
    fn is_connected(&self) -> bool;

    /// Opens the session.
    async fn connect(&self) -> Result<(), ConnectionError>;

    /// Publishes one message.
    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: &[u8],
    ) -> Result<(), ConnectionError>;

    /// Closes the session.
    async fn disconnect(&self) -> Result<(), ConnectionError>;
}

/// Constructs broker clients from options.
pub trait ClientFactory: Send + Sync {
    /// Builds an unconnected client.
    fn create(&self, options: ClientOptions) -> Result<Arc<dyn PublishClient>, ConnectionError>;
}
