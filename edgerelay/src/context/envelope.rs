//! Inbound message envelope supplied by a trigger.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Default content type for raw payloads.
pub const CONTENT_TYPE_BYTES: &str = "application/octet-stream";

/// Default content type for JSON payloads.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// A message yielded by a trigger, plus the metadata needed for tracing
/// and downstream deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// End-to-end tracing identifier.
    #[serde(default)]
    pub correlation_id: String,
    /// Identifier of the source event, if the producer assigned one.
    #[serde(default)]
    pub event_id: String,
    /// Checksum of the source message.
    #[serde(default)]
    pub checksum: String,
    /// Payload content type.
    #[serde(default = "default_content_type")]
    pub content_type: String,
    /// Raw payload bytes.
    #[serde(default)]
    pub payload: Vec<u8>,
}

fn default_content_type() -> String {
    CONTENT_TYPE_BYTES.to_string()
}

impl MessageEnvelope {
    /// Creates an envelope with a fresh correlation ID and a computed checksum.
    #[must_use]
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        let payload = payload.into();
        Self {
            correlation_id: uuid::Uuid::new_v4().to_string(),
            event_id: String::new(),
            checksum: checksum_of(&payload),
            content_type: default_content_type(),
            payload,
        }
    }

    /// Sets the correlation ID.
    #[must_use]
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = id.into();
        self
    }

    /// Sets the source event ID.
    #[must_use]
    pub fn with_event_id(mut self, id: impl Into<String>) -> Self {
        self.event_id = id.into();
        self
    }

    /// Sets the content type.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Returns true if the payload is declared as JSON.
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.content_type.starts_with(CONTENT_TYPE_JSON)
    }

    /// Fills in any identifiers the trigger left blank.
    pub fn normalize(&mut self) {
        if self.correlation_id.is_empty() {
            self.correlation_id = uuid::Uuid::new_v4().to_string();
        }
        if self.checksum.is_empty() {
            self.checksum = checksum_of(&self.payload);
        }
    }
}

/// Hex-encoded SHA-256 of a payload.
#[must_use]
pub fn checksum_of(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_envelope_has_ids() {
        let envelope = MessageEnvelope::new(b"temp=72".to_vec());
        assert!(!envelope.correlation_id.is_empty());
        assert_eq!(envelope.checksum, checksum_of(b"temp=72"));
        assert!(!envelope.is_json());
    }

    #[test]
    fn test_normalize_keeps_existing_ids() {
        let mut envelope = MessageEnvelope::new(b"x".to_vec()).with_correlation_id("corr");
        envelope.checksum = "given".to_string();
        envelope.normalize();
        assert_eq!(envelope.correlation_id, "corr");
        assert_eq!(envelope.checksum, "given");
    }

    #[test]
    fn test_normalize_fills_blanks() {
        let mut envelope: MessageEnvelope = serde_json::from_str(r#"{"payload":[1,2]}"#).unwrap();
        envelope.normalize();
        assert!(!envelope.correlation_id.is_empty());
        assert_eq!(envelope.checksum, checksum_of(&[1, 2]));
        assert_eq!(envelope.content_type, CONTENT_TYPE_BYTES);
    }
}
