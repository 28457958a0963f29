//! Adds configured tags to JSON events.

use crate::context::PipelineContext;
use crate::core::{Data, Flow};
use crate::errors::PipelineError;
use crate::pipeline::PipelineFunction;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// Merges a fixed set of tags into an event's `tags` object.
///
/// Accepts a JSON object, or bytes/text holding one. Existing tags with the
/// same key are overwritten.
#[derive(Debug, Clone)]
pub struct AddTags {
    name: String,
    tags: BTreeMap<String, String>,
}

impl AddTags {
    /// Creates the transform.
    #[must_use]
    pub fn new<K, V>(tags: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            name: "add-tags".to_string(),
            tags: tags.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// Sets the function name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn unexpected(&self, found: &str) -> PipelineError {
        PipelineError::UnexpectedType {
            function: self.name.clone(),
            expected: "a JSON object".to_string(),
            found: found.to_string(),
        }
    }

    fn event(&self, data: Data) -> Result<Map<String, Value>, PipelineError> {
        let value = match data {
            Data::Json(value) => value,
            Data::Bytes(bytes) => {
                serde_json::from_slice(&bytes).map_err(|_| self.unexpected("non-JSON bytes"))?
            }
            Data::Text(text) => {
                serde_json::from_str(&text).map_err(|_| self.unexpected("non-JSON text"))?
            }
            other @ Data::Opaque { .. } => return Err(self.unexpected(other.kind())),
        };
        match value {
            Value::Object(map) => Ok(map),
            other => Err(self.unexpected(&json_kind(&other))),
        }
    }
}

fn json_kind(value: &Value) -> String {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
    .to_string()
}

#[async_trait]
impl PipelineFunction for AddTags {
    fn name(&self) -> &str {
        &self.name
    }

    fn fingerprint(&self) -> String {
        let tags: Vec<String> = self.tags.iter().map(|(k, v)| format!("{k}={v}")).collect();
        format!("{}[{}]", self.name, tags.join(","))
    }

    async fn call(&self, ctx: &mut PipelineContext, input: Option<Data>) -> Flow {
        let Some(data) = input else {
            return Flow::Fail(PipelineError::NoData {
                function: self.name.clone(),
            });
        };
        let mut event = match self.event(data) {
            Ok(event) => event,
            Err(e) => return Flow::Fail(e),
        };
        if self.tags.is_empty() {
            return Flow::next(Value::Object(event));
        }

        let tags = event
            .entry("tags")
            .or_insert_with(|| Value::Object(Map::new()));
        if !tags.is_object() {
            *tags = Value::Object(Map::new());
        }
        if let Value::Object(tags) = tags {
            for (key, value) in &self.tags {
                tags.insert(key.clone(), Value::String(value.clone()));
            }
        }

        debug!(
            correlation_id = %ctx.correlation_id(),
            count = self.tags.len(),
            "Tags added"
        );
        Flow::next(Value::Object(event))
    }
}
