//! Broker client options and how secrets map onto them.

use crate::config::MqttSinkConfig;
use crate::errors::ConnectionError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Secret key holding the broker username.
pub const SECRET_USERNAME: &str = "username";
/// Secret key holding the broker password.
pub const SECRET_PASSWORD: &str = "password";
/// Secret key holding the PEM CA certificate.
pub const SECRET_CA_CERT: &str = "cacert";
/// Secret key holding the PEM client certificate.
pub const SECRET_CLIENT_CERT: &str = "clientcert";
/// Secret key holding the PEM client private key.
pub const SECRET_CLIENT_KEY: &str = "clientkey";

/// How the client authenticates to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AuthMode {
    /// No credentials; no secrets are fetched.
    #[default]
    None,
    /// Server verification with a custom CA certificate.
    CaCert,
    /// Username and password, plus the CA certificate if present.
    UsernamePassword,
    /// Mutual TLS with a client certificate and key.
    ClientCert,
}

impl AuthMode {
    /// The canonical lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::CaCert => "cacert",
            Self::UsernamePassword => "usernamepassword",
            Self::ClientCert => "clientcert",
        }
    }

    /// Returns true if this mode needs secrets from the provider.
    #[must_use]
    pub const fn requires_secrets(self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthMode {
    type Err = ConnectionError;

    /// Parses case-insensitively. An empty string means `none`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Self::None),
            "cacert" => Ok(Self::CaCert),
            "usernamepassword" => Ok(Self::UsernamePassword),
            "clientcert" => Ok(Self::ClientCert),
            other => Err(ConnectionError::InvalidConfig(format!(
                "unknown auth mode '{other}'"
            ))),
        }
    }
}

impl TryFrom<String> for AuthMode {
    type Error = ConnectionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AuthMode> for String {
    fn from(mode: AuthMode) -> Self {
        mode.as_str().to_string()
    }
}

/// MQTT delivery guarantee for a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QoS {
    /// Fire and forget.
    #[default]
    AtMostOnce = 0,
    /// Acknowledged delivery, possibly duplicated.
    AtLeastOnce = 1,
    /// Four-way handshake delivery.
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = ConnectionError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            other => Err(ConnectionError::InvalidConfig(format!(
                "QoS must be 0, 1 or 2, got {other}"
            ))),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        qos as Self
    }
}

/// PEM materials for a TLS session.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct TlsMaterials {
    /// CA certificate used to verify the broker.
    pub ca_cert: Option<String>,
    /// Client certificate for mutual TLS.
    pub client_cert: Option<String>,
    /// Client private key for mutual TLS.
    pub client_key: Option<String>,
    /// Disables broker certificate verification.
    pub skip_cert_verify: bool,
}

impl fmt::Debug for TlsMaterials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsMaterials")
            .field("ca_cert", &self.ca_cert.as_ref().map(|_| "<pem>"))
            .field("client_cert", &self.client_cert.as_ref().map(|_| "<pem>"))
            .field("client_key", &self.client_key.as_ref().map(|_| "<redacted>"))
            .field("skip_cert_verify", &self.skip_cert_verify)
            .finish()
    }
}

/// Everything a client factory needs to construct a broker client.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Broker URL, e.g. `tcp://broker:1883`.
    pub broker_address: String,
    /// MQTT client identifier.
    pub client_id: String,
    /// Username for `usernamepassword` mode.
    pub username: Option<String>,
    /// Password for `usernamepassword` mode.
    pub password: Option<String>,
    /// TLS materials, when the session is encrypted.
    pub tls: Option<TlsMaterials>,
    /// Let the client reconnect on its own after a drop.
    pub auto_reconnect: bool,
    /// MQTT keep-alive interval.
    pub keep_alive: Duration,
    /// Upper bound on a single connect attempt.
    pub connect_timeout: Duration,
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("broker_address", &self.broker_address)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("tls", &self.tls)
            .field("auto_reconnect", &self.auto_reconnect)
            .field("keep_alive", &self.keep_alive)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

fn is_tls_scheme(broker_address: &str) -> bool {
    let scheme = broker_address.split("://").next().unwrap_or_default();
    matches!(
        scheme.to_ascii_lowercase().as_str(),
        "ssl" | "tls" | "mqtts" | "wss"
    )
}

fn require(
    secrets: &HashMap<String, String>,
    mode: AuthMode,
    key: &str,
) -> Result<String, ConnectionError> {
    secrets
        .get(key)
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or_else(|| ConnectionError::MissingSecret {
            auth_mode: mode.to_string(),
            key: key.to_string(),
        })
}

/// Builds client options from the sink configuration and fetched secrets.
///
/// Each auth mode checks that its required keys are present. A CA
/// certificate found in `secrets` is used by every mode except `none`.
pub fn build_client_options(
    config: &MqttSinkConfig,
    secrets: &HashMap<String, String>,
) -> Result<ClientOptions, ConnectionError> {
    if config.broker_address.is_empty() {
        return Err(ConnectionError::InvalidConfig(
            "broker address is required".to_string(),
        ));
    }

    let mode = config.auth_mode;
    let mut options = ClientOptions {
        broker_address: config.broker_address.clone(),
        client_id: config.client_id.clone(),
        username: None,
        password: None,
        tls: None,
        auto_reconnect: config.auto_reconnect,
        keep_alive: Duration::from_secs(config.keep_alive_secs),
        connect_timeout: Duration::from_millis(config.connect_timeout_ms),
    };

    let mut tls = TlsMaterials {
        skip_cert_verify: config.skip_cert_verify,
        ..TlsMaterials::default()
    };
    if mode.requires_secrets() {
        tls.ca_cert = secrets.get(SECRET_CA_CERT).filter(|v| !v.is_empty()).cloned();
    }

    match mode {
        AuthMode::None => {}
        AuthMode::CaCert => {
            tls.ca_cert = Some(require(secrets, mode, SECRET_CA_CERT)?);
        }
        AuthMode::UsernamePassword => {
            options.username = Some(require(secrets, mode, SECRET_USERNAME)?);
            options.password = Some(require(secrets, mode, SECRET_PASSWORD)?);
        }
        AuthMode::ClientCert => {
            tls.client_cert = Some(require(secrets, mode, SECRET_CLIENT_CERT)?);
            tls.client_key = Some(require(secrets, mode, SECRET_CLIENT_KEY)?);
        }
    }

    let encrypted = tls.ca_cert.is_some() || tls.client_cert.is_some();
    if encrypted || is_tls_scheme(&config.broker_address) {
        options.tls = Some(tls);
    }
    Ok(options)
}
