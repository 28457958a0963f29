//! Credential access for outbound connections.

mod provider;

pub use provider::{InMemorySecretProvider, SecretProvider};
