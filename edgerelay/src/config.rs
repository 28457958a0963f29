//! Service configuration.
//!
//! Loaded once at startup from JSON. Every section has defaults, so a minimal
//! document only needs a `service_key`.

use crate::errors::{ConfigError, StoreError};
use crate::replay::JitterStrategy;
use crate::security::InMemorySecretProvider;
use crate::sink::{AuthMode, QoS};
use crate::store::{new_store_client, StoreClient};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Top-level configuration for one edge service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Identity of the service; scopes stored checkpoints.
    pub service_key: String,
    /// Log output settings.
    pub logging: LoggingConfig,
    /// Retry store backend.
    pub store: Option<DatabaseInfo>,
    /// Store-and-forward behaviour.
    pub store_and_forward: StoreAndForwardConfig,
    /// MQTT export sink.
    pub mqtt: Option<MqttSinkConfig>,
    /// Secrets served by the in-process provider, keyed by path.
    pub insecure_secrets: HashMap<String, HashMap<String, String>>,
}

impl ServiceConfig {
    /// Creates a configuration with defaults for `service_key`.
    #[must_use]
    pub fn new(service_key: impl Into<String>) -> Self {
        Self {
            service_key: service_key.into(),
            ..Self::default()
        }
    }

    /// Parses and validates a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_key.trim().is_empty() {
            return Err(ConfigError::Invalid("service_key is required".to_string()));
        }
        if self.store_and_forward.enabled && self.store.is_none() {
            return Err(ConfigError::Invalid(
                "store_and_forward is enabled but no store is configured".to_string(),
            ));
        }
        if self.store_and_forward.enabled && self.store_and_forward.retry_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "store_and_forward.retry_interval_ms must be positive".to_string(),
            ));
        }
        if let Some(mqtt) = &self.mqtt {
            mqtt.validate()?;
        }
        Ok(())
    }

    /// Builds the in-process secret provider from `insecure_secrets`.
    #[must_use]
    pub fn secret_provider(&self) -> InMemorySecretProvider {
        InMemorySecretProvider::with_secrets(self.insecure_secrets.clone())
    }

    /// Creates the retry store when store-and-forward is enabled.
    ///
    /// Returns `Ok(None)` when it is disabled.
    pub fn build_store(&self) -> Result<Option<Arc<dyn StoreClient>>, StoreError> {
        match (&self.store, self.store_and_forward.enabled) {
            (Some(info), true) => new_store_client(info).map(Some),
            _ => Ok(None),
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Selects and addresses a retry store engine.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseInfo {
    /// Registered engine name: `memory`, `keyvalue`, `file`, or a custom one.
    #[serde(rename = "type")]
    pub engine: String,
    /// Backend host, for networked engines.
    pub host: String,
    /// Backend port, for networked engines.
    pub port: u16,
    /// Operation timeout in milliseconds.
    pub timeout_ms: u64,
    /// Backend username.
    pub username: String,
    /// Backend password.
    pub password: String,
    /// Directory for the `file` engine.
    pub path: String,
}

impl DatabaseInfo {
    /// Creates a descriptor for `engine`.
    #[must_use]
    pub fn new(engine: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            ..Self::default()
        }
    }

    /// Sets the directory used by the `file` engine.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Sets host and port.
    #[must_use]
    pub fn with_address(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    /// Operation timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl fmt::Debug for DatabaseInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseInfo")
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("timeout_ms", &self.timeout_ms)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("path", &self.path)
            .finish()
    }
}

/// What replay does with a checkpoint written by a different chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionPolicy {
    /// Report a version mismatch and leave the checkpoint untouched.
    #[default]
    Reject,
    /// Re-stamp the checkpoint with the current fingerprint and resume.
    Migrate,
}

/// Store-and-forward settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreAndForwardConfig {
    /// Persist failed exports and replay them.
    pub enabled: bool,
    /// Base interval between replay passes, in milliseconds.
    pub retry_interval_ms: u64,
    /// Jitter applied to the interval.
    pub jitter: JitterStrategy,
    /// Drop a checkpoint after this many failed replays. 0 means unlimited.
    pub max_retry_count: u32,
    /// Handling of checkpoints from an older chain.
    pub version_policy: VersionPolicy,
}

impl Default for StoreAndForwardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            retry_interval_ms: 300_000,
            jitter: JitterStrategy::None,
            max_retry_count: 0,
            version_policy: VersionPolicy::Reject,
        }
    }
}

impl StoreAndForwardConfig {
    /// Creates an enabled configuration with default timings.
    #[must_use]
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    /// Sets the replay interval.
    #[must_use]
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub const fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Sets the retry cap.
    #[must_use]
    pub const fn with_max_retry_count(mut self, max: u32) -> Self {
        self.max_retry_count = max;
        self
    }

    /// Sets the version policy.
    #[must_use]
    pub const fn with_version_policy(mut self, policy: VersionPolicy) -> Self {
        self.version_policy = policy;
        self
    }

    /// Base replay interval.
    #[must_use]
    pub const fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

/// MQTT export sink settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttSinkConfig {
    /// Broker URL, e.g. `tcp://broker:1883` or `ssl://broker:8883`.
    pub broker_address: String,
    /// MQTT client identifier.
    pub client_id: String,
    /// Secret provider path holding credentials.
    pub secret_path: String,
    /// Let the client reconnect on its own.
    pub auto_reconnect: bool,
    /// Publish topic.
    pub topic: String,
    /// Publish QoS.
    pub qos: QoS,
    /// Publish with the retained flag.
    pub retain: bool,
    /// Disable broker certificate verification.
    pub skip_cert_verify: bool,
    /// Authentication mode.
    pub auth_mode: AuthMode,
    /// Persist the payload for replay when the export fails.
    pub persist_on_error: bool,
    /// Keep-alive interval in seconds.
    pub keep_alive_secs: u64,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for MqttSinkConfig {
    fn default() -> Self {
        Self {
            broker_address: String::new(),
            client_id: String::new(),
            secret_path: "mqtt".to_string(),
            auto_reconnect: true,
            topic: String::new(),
            qos: QoS::AtMostOnce,
            retain: false,
            skip_cert_verify: false,
            auth_mode: AuthMode::None,
            persist_on_error: false,
            keep_alive_secs: 60,
            connect_timeout_ms: 30_000,
        }
    }
}

impl MqttSinkConfig {
    /// Creates a sink configuration for a broker and topic.
    #[must_use]
    pub fn new(broker_address: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            broker_address: broker_address.into(),
            topic: topic.into(),
            ..Self::default()
        }
    }

    /// Sets the client identifier.
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Sets the secret path.
    #[must_use]
    pub fn with_secret_path(mut self, path: impl Into<String>) -> Self {
        self.secret_path = path.into();
        self
    }

    /// Sets the auth mode.
    #[must_use]
    pub const fn with_auth_mode(mut self, mode: AuthMode) -> Self {
        self.auth_mode = mode;
        self
    }

    /// Sets QoS.
    #[must_use]
    pub const fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    /// Sets the retained flag.
    #[must_use]
    pub const fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    /// Disables certificate verification.
    #[must_use]
    pub const fn with_skip_cert_verify(mut self, skip: bool) -> Self {
        self.skip_cert_verify = skip;
        self
    }

    /// Enables persistence on export failure.
    #[must_use]
    pub const fn with_persist_on_error(mut self, persist: bool) -> Self {
        self.persist_on_error = persist;
        self
    }

    /// Checks required fields.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker_address.trim().is_empty() {
            return Err(ConfigError::Invalid("mqtt.broker_address is required".to_string()));
        }
        if self.topic.trim().is_empty() {
            return Err(ConfigError::Invalid("mqtt.topic is required".to_string()));
        }
        if self.auth_mode.requires_secrets() && self.secret_path.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "mqtt.secret_path is required for auth mode '{}'",
                self.auth_mode
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const FULL: &str = r#"{
        "service_key": "edge-temp",
        "logging": { "level": "debug", "json": true },
        "store": { "type": "file", "path": "/var/lib/edgerelay" },
        "store_and_forward": {
            "enabled": true,
            "retry_interval_ms": 1000,
            "jitter": "full",
            "max_retry_count": 5,
            "version_policy": "migrate"
        },
        "mqtt": {
            "broker_address": "ssl://broker:8883",
            "client_id": "edge-1",
            "secret_path": "mqtt",
            "topic": "sensors/temp",
            "qos": 1,
            "retain": true,
            "auth_mode": "UsernamePassword",
            "persist_on_error": true
        },
        "insecure_secrets": { "mqtt": { "username": "u", "password": "p" } }
    }"#;

    #[test]
    fn test_minimal_document_uses_defaults() {
        let config = ServiceConfig::from_json(r#"{"service_key": "svc"}"#).unwrap();
        assert_eq!(config.logging, LoggingConfig::default());
        assert!(!config.store_and_forward.enabled);
        assert_eq!(config.store_and_forward.retry_interval(), Duration::from_secs(300));
        assert_eq!(config.store_and_forward.max_retry_count, 0);
        assert!(config.mqtt.is_none());
    }

    #[test]
    fn test_full_document() {
        let config = ServiceConfig::from_json(FULL).unwrap();
        assert_eq!(config.service_key, "edge-temp");
        assert!(config.logging.json);

        let store = config.store.as_ref().unwrap();
        assert_eq!(store.engine, "file");
        assert_eq!(store.path, "/var/lib/edgerelay");

        let sf = &config.store_and_forward;
        assert_eq!(sf.jitter, JitterStrategy::Full);
        assert_eq!(sf.max_retry_count, 5);
        assert_eq!(sf.version_policy, VersionPolicy::Migrate);

        let mqtt = config.mqtt.as_ref().unwrap();
        assert_eq!(mqtt.auth_mode, AuthMode::UsernamePassword);
        assert_eq!(mqtt.qos, QoS::AtLeastOnce);
        assert!(mqtt.persist_on_error);
        assert!(mqtt.auto_reconnect);
    }

    #[test]
    fn test_missing_service_key_rejected() {
        let err = ServiceConfig::from_json("{}").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_store_and_forward_requires_store() {
        let err = ServiceConfig::from_json(
            r#"{"service_key": "svc", "store_and_forward": {"enabled": true}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("no store"));
    }

    #[test]
    fn test_bad_auth_mode_is_parse_error() {
        let err = ServiceConfig::from_json(
            r#"{"service_key": "svc", "mqtt": {"broker_address": "tcp://b", "topic": "t", "auth_mode": "magic"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FULL.as_bytes()).unwrap();
        let config = ServiceConfig::from_path(file.path()).unwrap();
        assert_eq!(config.service_key, "edge-temp");
    }

    #[tokio::test]
    async fn test_secret_provider_is_seeded() {
        use crate::security::SecretProvider;

        let config = ServiceConfig::from_json(FULL).unwrap();
        let provider = config.secret_provider();
        let secrets = provider.get_secrets("mqtt").await.unwrap();
        assert_eq!(secrets["username"], "u");
    }

    #[test]
    fn test_build_store() {
        let mut config = ServiceConfig::new("svc");
        config.store = Some(DatabaseInfo::new("memory"));
        assert!(config.build_store().unwrap().is_none());

        config.store_and_forward = StoreAndForwardConfig::enabled();
        assert!(config.build_store().unwrap().is_some());

        config.store = Some(DatabaseInfo::new("cassandra"));
        assert!(matches!(
            config.build_store(),
            Err(StoreError::UnsupportedDatabase { .. })
        ));
    }

    #[test]
    fn test_database_info_debug_redacts_password() {
        let mut info = DatabaseInfo::new("keyvalue").with_address("localhost", 6379);
        info.password = "hunter2".to_string();
        assert!(!format!("{info:?}").contains("hunter2"));
    }
}
