//! The MQTT export sink.
//!
//! This module provides:
//! - Client options and the auth-mode to secret mapping
//! - The [`PublishClient`] and [`ClientFactory`] seams
//! - [`SecretAwareConnectionManager`], which owns the client for one sink
//! - [`MqttExportStage`], the exporting pipeline function

mod client;
mod export;
mod manager;
mod options;

pub use client::{ClientFactory, PublishClient};
pub use export::{MqttExportStage, RetryPersistence};
pub use manager::SecretAwareConnectionManager;
pub use options::{
    build_client_options, AuthMode, ClientOptions, QoS, TlsMaterials, SECRET_CA_CERT,
    SECRET_CLIENT_CERT, SECRET_CLIENT_KEY, SECRET_PASSWORD, SECRET_USERNAME,
};
