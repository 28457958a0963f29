//! # Edgerelay
//!
//! A store-and-forward function pipeline for edge devices.
//!
//! Messages arrive from a trigger, run through an ordered chain of functions,
//! and are published to an MQTT broker. Edgerelay provides:
//!
//! - **Versioned function chains**: a chain fingerprint guards resumption
//! - **Checkpoints**: failed exports persist the payload and chain position
//! - **Pluggable stores**: in-memory, key-value and file engines behind one trait
//! - **Periodic replay**: pending checkpoints resume where they failed
//! - **Secret-aware connections**: broker clients rebuild when credentials rotate
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use edgerelay::prelude::*;
//!
//! let config = ServiceConfig::from_path("edgerelay.json")?;
//! init_logging(&config.logging);
//!
//! let store = config.build_store()?;
//! let manager = Arc::new(SecretAwareConnectionManager::new(sink, factory));
//! let chain = FunctionChain::builder()
//!     .function(Arc::new(AddTags::new([("site", "north")])))
//!     .function(Arc::new(MqttExportStage::new(manager.clone())))
//!     .build()?;
//!
//! let runtime = Arc::new(Runtime::new(config.service_key, chain, provider));
//! RetryReplayLoop::from_config(runtime.clone(), &config.store_and_forward).spawn();
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod context;
pub mod core;
pub mod errors;
pub mod observability;
pub mod pipeline;
pub mod replay;
pub mod runtime;
pub mod security;
pub mod sink;
pub mod store;
pub mod testing;
pub mod transforms;
pub mod trigger;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{
        DatabaseInfo, LoggingConfig, MqttSinkConfig, ServiceConfig, StoreAndForwardConfig,
        VersionPolicy,
    };
    pub use crate::context::{MessageEnvelope, PipelineContext};
    pub use crate::core::{Data, Flow};
    pub use crate::errors::{
        ConfigError, ConnectionError, PipelineError, SecretError, StoreError, TriggerError,
    };
    pub use crate::observability::init_logging;
    pub use crate::pipeline::{ExecutionOutcome, FnFunction, FunctionChain, PipelineFunction};
    pub use crate::replay::{JitterStrategy, RetryReplayLoop};
    pub use crate::runtime::{ReplayOutcome, ReplayReport, Runtime};
    pub use crate::security::{InMemorySecretProvider, SecretProvider};
    pub use crate::sink::{
        AuthMode, ClientFactory, MqttExportStage, PublishClient, QoS,
        SecretAwareConnectionManager,
    };
    pub use crate::store::{new_store_client, Checkpoint, StoreClient};
    pub use crate::transforms::AddTags;
    pub use crate::trigger::{ChannelTrigger, Trigger};
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn prelude_builds_a_chain() {
        let chain = FunctionChain::builder()
            .function(std::sync::Arc::new(AddTags::new([("site", "north")])))
            .build();
        assert!(chain.is_ok());
    }
}
