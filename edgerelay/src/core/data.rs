//! Values passed between pipeline functions.

use crate::errors::PipelineError;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A value produced by one pipeline function and consumed by the next.
#[derive(Clone)]
pub enum Data {
    /// Raw bytes, passed through unchanged on export.
    Bytes(Vec<u8>),
    /// UTF-8 text.
    Text(String),
    /// A structured JSON document, exported in its serialized form.
    Json(serde_json::Value),
    /// An in-process value with no byte representation.
    Opaque {
        /// Rust type name, kept for diagnostics.
        type_name: &'static str,
        /// The wrapped value.
        value: Arc<dyn Any + Send + Sync>,
    },
}

impl Data {
    /// Wraps an arbitrary value.
    pub fn opaque<T: Any + Send + Sync>(value: T) -> Self {
        Self::Opaque {
            type_name: std::any::type_name::<T>(),
            value: Arc::new(value),
        }
    }

    /// Returns a reference to an opaque value of type `T`.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Opaque { value, .. } => value.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Short name of the variant, for error messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bytes(_) => "bytes",
            Self::Text(_) => "text",
            Self::Json(_) => "json",
            Self::Opaque { type_name, .. } => *type_name,
        }
    }

    /// Converts the value to the bytes that would be sent on the wire.
    ///
    /// Opaque values cannot be coerced and yield an input error.
    pub fn coerce_bytes(&self) -> Result<Vec<u8>, PipelineError> {
        match self {
            Self::Bytes(bytes) => Ok(bytes.clone()),
            Self::Text(text) => Ok(text.as_bytes().to_vec()),
            Self::Json(value) => serde_json::to_vec(value).map_err(|_| PipelineError::UncoercibleType {
                type_name: "json".to_string(),
            }),
            Self::Opaque { type_name, .. } => Err(PipelineError::UncoercibleType {
                type_name: (*type_name).to_string(),
            }),
        }
    }
}

impl fmt::Debug for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Self::Opaque { type_name, .. } => f.debug_tuple("Opaque").field(type_name).finish(),
        }
    }
}

impl PartialEq for Data {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Json(a), Self::Json(b)) => a == b,
            (Self::Opaque { value: a, .. }, Self::Opaque { value: b, .. }) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<Vec<u8>> for Data {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<&[u8]> for Data {
    fn from(bytes: &[u8]) -> Self {
        Self::Bytes(bytes.to_vec())
    }
}

impl From<String> for Data {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Data {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<serde_json::Value> for Data {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}
