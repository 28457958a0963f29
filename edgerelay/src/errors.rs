//! Error types for the edgerelay pipeline.
//!
//! Errors are grouped by the subsystem that raises them. Every error is
//! surfaced to the immediate caller; nothing in the core logs an error and
//! then drops it.

use thiserror::Error;

/// Errors raised while executing or resuming a function chain.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A function was invoked without a prior output.
    #[error("No data received by '{function}'")]
    NoData {
        /// The function that expected input.
        function: String,
    },

    /// The prior output could not be converted to bytes.
    #[error("Cannot coerce value of type '{type_name}' to bytes")]
    UncoercibleType {
        /// Rust type name of the offending value.
        type_name: String,
    },

    /// The prior output had the wrong shape for this function.
    #[error("Function '{function}' expected {expected}, received {found}")]
    UnexpectedType {
        /// The function that rejected its input.
        function: String,
        /// What the function accepts.
        expected: String,
        /// What it actually received.
        found: String,
    },

    /// The connection manager could not provide a usable client.
    #[error("{0}")]
    Connection(#[from] ConnectionError),

    /// The send failed. `checkpoint_id` is set when the payload was persisted.
    #[error("Export failed, {}: {source}", persisted_note(.checkpoint_id.as_deref()))]
    Export {
        /// The underlying connect or publish failure.
        #[source]
        source: ConnectionError,
        /// Identifier of the checkpoint written for later replay.
        checkpoint_id: Option<String>,
    },

    /// The send failed and the payload could not be persisted either.
    #[error("Export failed ({export}) and the payload could not be persisted: {store}")]
    PersistFailed {
        /// The original connect or publish failure.
        export: ConnectionError,
        /// The store failure raised while persisting.
        #[source]
        store: StoreError,
    },

    /// The checkpoint was written by a different chain configuration.
    #[error("Pipeline version mismatch: checkpoint has '{checkpoint}', current chain is '{current}'")]
    VersionMismatch {
        /// Version recorded in the checkpoint.
        checkpoint: String,
        /// Fingerprint of the live chain.
        current: String,
    },

    /// The resume position does not exist in the chain.
    #[error("Pipeline position {position} is out of range for a chain of {len} functions")]
    PositionOutOfRange {
        /// Requested resume index.
        position: usize,
        /// Number of functions in the chain.
        len: usize,
    },

    /// A chain must contain at least one function.
    #[error("Function chain is empty")]
    EmptyChain,

    /// Execution was cancelled between functions.
    #[error("Pipeline cancelled: {0}")]
    Cancelled(String),

    /// A function failed for its own reasons.
    #[error("Function '{function}' failed: {message}")]
    Function {
        /// The failing function.
        function: String,
        /// Failure description.
        message: String,
    },

    /// A store operation failed during replay bookkeeping.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// A replay failed and the store could not record the attempt; the
    /// stored checkpoint still holds its previous retry count.
    #[error("Replay failed ({replay}) and the checkpoint could not be updated: {store}")]
    ReplayNotRecorded {
        /// The failure from the replayed execution.
        replay: Box<PipelineError>,
        /// The store failure raised while recording it.
        #[source]
        store: StoreError,
    },

    /// Replay was requested but no retry store is configured.
    #[error("Store-and-forward is not configured for this service")]
    NoStore,
}

fn persisted_note(checkpoint_id: Option<&str>) -> String {
    checkpoint_id.map_or_else(
        || "dropping payload".to_string(),
        |id| format!("payload persisted for later retry as '{id}'"),
    )
}

impl PipelineError {
    /// Creates a generic function failure.
    #[must_use]
    pub fn function(function: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Function {
            function: function.into(),
            message: message.into(),
        }
    }

    /// Returns true if a later invocation may succeed.
    ///
    /// Input errors and version mismatches are final for the execution.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(e) | Self::Export { source: e, .. } => e.is_retryable(),
            Self::PersistFailed { .. }
            | Self::ReplayNotRecorded { .. }
            | Self::Store(_)
            | Self::Cancelled(_) => true,
            Self::NoData { .. }
            | Self::UncoercibleType { .. }
            | Self::UnexpectedType { .. }
            | Self::VersionMismatch { .. }
            | Self::PositionOutOfRange { .. }
            | Self::EmptyChain
            | Self::NoStore
            | Self::Function { .. } => false,
        }
    }

    /// Returns true for input errors: missing or mistyped prior output.
    #[must_use]
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::NoData { .. } | Self::UncoercibleType { .. } | Self::UnexpectedType { .. }
        )
    }
}

/// Errors raised by a secret provider.
#[derive(Debug, Clone, Error)]
pub enum SecretError {
    /// No secrets exist at the requested path.
    #[error("No secrets found at path '{path}'")]
    NotFound {
        /// The requested secret path.
        path: String,
    },

    /// The provider itself failed.
    #[error("Secret provider error: {0}")]
    Provider(String),
}

/// Errors raised while building, connecting or using a publish client.
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    /// Secrets could not be retrieved.
    #[error("Failed to retrieve secrets: {0}")]
    Secret(#[from] SecretError),

    /// A secret required by the auth mode is absent.
    #[error("Auth mode '{auth_mode}' requires secret '{key}'")]
    MissingSecret {
        /// The configured auth mode.
        auth_mode: String,
        /// The absent key.
        key: String,
    },

    /// The sink configuration is unusable.
    #[error("Invalid sink configuration: {0}")]
    InvalidConfig(String),

    /// The client factory could not construct a client.
    #[error("Failed to create client: {0}")]
    Create(String),

    /// Connecting to the broker failed.
    #[error("Could not connect to broker: {0}")]
    Connect(String),

    /// Publishing to the broker failed.
    #[error("Publish failed: {0}")]
    Publish(String),
}

impl ConnectionError {
    /// Returns true if the failure is transient.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Secret(_) | Self::Connect(_) | Self::Publish(_))
    }

    /// Returns true if the failure happened on the wire and warrants persistence.
    #[must_use]
    pub fn is_delivery_failure(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Publish(_))
    }
}

/// Errors raised by a retry store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The configured engine name is not registered.
    #[error("Unsupported database type '{engine}'")]
    UnsupportedDatabase {
        /// The unrecognized engine name.
        engine: String,
    },

    /// Checkpoints must carry a payload.
    #[error("Checkpoint payload cannot be empty")]
    EmptyPayload,

    /// The operation requires a checkpoint that has an ID.
    #[error("Checkpoint has no ID")]
    MissingId,

    /// The checkpoint ID was already assigned.
    #[error("Checkpoint ID already assigned as '{id}'")]
    IdAlreadyAssigned {
        /// The existing ID.
        id: String,
    },

    /// No checkpoint exists with this ID.
    #[error("Checkpoint '{id}' not found")]
    NotFound {
        /// The unknown ID.
        id: String,
    },

    /// A checkpoint with this ID is already stored.
    #[error("Checkpoint '{id}' already exists")]
    AlreadyExists {
        /// The duplicate ID.
        id: String,
    },

    /// The store was used after `disconnect`.
    #[error("Store is disconnected")]
    Disconnected,

    /// Encoding or decoding a checkpoint failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// File-system failure in a durable engine.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other backend failure.
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The document is not valid JSON for the expected shape.
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// The configuration file could not be read.
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// A value failed validation.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors raised by a trigger while feeding the runtime.
#[derive(Debug, Error)]
pub enum TriggerError {
    /// The trigger was started twice.
    #[error("Trigger already running")]
    AlreadyRunning,

    /// The underlying message source failed, e.g. a broker subscription
    /// dropped. Raised by triggers implemented outside this crate.
    #[error("Message source failed: {0}")]
    Source(#[from] anyhow::Error),
}
