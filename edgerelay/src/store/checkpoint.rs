//! Persisted export records and their JSON wire form.

use crate::errors::StoreError;
use serde::{Deserialize, Serialize};

/// Durable record of a failed export, sufficient to resume the pipeline.
///
/// The ID is empty until a store assigns one and is immutable afterwards.
/// `retry_count` only ever grows; capping it is the replay loop's decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    id: String,
    service_key: String,
    payload: Vec<u8>,
    retry_count: u32,
    pipeline_position: usize,
    version: String,
    correlation_id: String,
    event_id: String,
    event_checksum: String,
}

impl Checkpoint {
    /// Creates a checkpoint for a payload that failed to export.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::EmptyPayload`] if `payload` is empty.
    pub fn new(
        service_key: impl Into<String>,
        payload: Vec<u8>,
        pipeline_position: usize,
        version: impl Into<String>,
    ) -> Result<Self, StoreError> {
        if payload.is_empty() {
            return Err(StoreError::EmptyPayload);
        }
        Ok(Self {
            service_key: service_key.into(),
            payload,
            pipeline_position,
            version: version.into(),
            ..Self::zero()
        })
    }

    /// The all-empty record that absent wire fields decode to.
    ///
    /// Crate-private: it carries no payload, which stores reject.
    pub(crate) fn zero() -> Self {
        CheckpointWire::default().into()
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

    /// Sets the source event checksum.
    #[must_use]
    pub fn with_event_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.event_checksum = checksum.into();
        self
    }

    /// Assigns the store identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::IdAlreadyAssigned`] if a different ID is already set.
    pub fn assign_id(&mut self, id: impl Into<String>) -> Result<(), StoreError> {
        let id = id.into();
        if !self.id.is_empty() && self.id != id {
            return Err(StoreError::IdAlreadyAssigned {
                id: self.id.clone(),
            });
        }
        self.id = id;
        Ok(())
    }

    /// Records one more failed replay attempt.
    pub fn increment_retry_count(&mut self) {
        self.retry_count = self.retry_count.saturating_add(1);
    }

    /// Moves the resume position.
    pub fn set_pipeline_position(&mut self, position: usize) {
        self.pipeline_position = position;
    }

    /// Re-stamps the checkpoint with a new chain fingerprint.
    pub fn set_version(&mut self, version: impl Into<String>) {
        self.version = version.into();
    }

    /// The store-assigned ID, empty before the first `store` call.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The owning service.
    #[must_use]
    pub fn service_key(&self) -> &str {
        &self.service_key
    }

    /// The bytes that failed to export.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Number of failed replays so far.
    #[must_use]
    pub const fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Index of the function at which replay resumes.
    #[must_use]
    pub const fn pipeline_position(&self) -> usize {
        self.pipeline_position
    }

    /// Chain fingerprint at checkpoint time.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// End-to-end tracing identifier.
    #[must_use]
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Identifier of the originating event.
    #[must_use]
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    /// Checksum of the originating message.
    #[must_use]
    pub fn event_checksum(&self) -> &str {
        &self.event_checksum
    }

    /// Encodes the checkpoint in its JSON wire form.
    pub fn to_json(&self) -> Result<Vec<u8>, StoreError> {
        Ok(serde_json::to_vec(&CheckpointWire::from(self))?)
    }

    /// Decodes a checkpoint from its JSON wire form.
    ///
    /// Absent fields decode to their zero value.
    pub fn from_json(bytes: &[u8]) -> Result<Self, StoreError> {
        let wire: CheckpointWire = serde_json::from_slice(bytes)?;
        Ok(wire.into())
    }
}

/// The wire shape: every optional field is `Option` so that empty values are
/// omitted on encode and absent keys are tolerated on decode.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckpointWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    app_service_key: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "base64_bytes")]
    payload: Vec<u8>,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    retry_count: u32,
    #[serde(default, skip_serializing_if = "is_zero_usize")]
    pipeline_position: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(rename = "correlationID", default, skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
    #[serde(rename = "eventID", default, skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    event_checksum: Option<String>,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_zero_u32(value: &u32) -> bool {
    *value == 0
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_zero_usize(value: &usize) -> bool {
    *value == 0
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

impl From<&Checkpoint> for CheckpointWire {
    fn from(c: &Checkpoint) -> Self {
        Self {
            id: non_empty(&c.id),
            app_service_key: non_empty(&c.service_key),
            payload: c.payload.clone(),
            retry_count: c.retry_count,
            pipeline_position: c.pipeline_position,
            version: non_empty(&c.version),
            correlation_id: non_empty(&c.correlation_id),
            event_id: non_empty(&c.event_id),
            event_checksum: non_empty(&c.event_checksum),
        }
    }
}

impl From<CheckpointWire> for Checkpoint {
    fn from(w: CheckpointWire) -> Self {
        Self {
            id: w.id.unwrap_or_default(),
            service_key: w.app_service_key.unwrap_or_default(),
            payload: w.payload,
            retry_count: w.retry_count,
            pipeline_position: w.pipeline_position,
            version: w.version.unwrap_or_default(),
            correlation_id: w.correlation_id.unwrap_or_default(),
            event_id: w.event_id.unwrap_or_default(),
            event_checksum: w.event_checksum.unwrap_or_default(),
        }
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?;
        match encoded {
            Some(text) => STANDARD.decode(text).map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}
