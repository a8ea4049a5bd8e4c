use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Message, ModelType, Params};
use crate::LmError;

const TEXT_PROMPT_TERMINATOR: &str = "BEGIN RESPONSE:";
const DEFAULT_PROVIDER: &str = "openai";

/// A fully merged completion request, as seen by caches and backends.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub model_type: ModelType,
    pub messages: Vec<Message>,
    pub params: Params,
}

impl CompletionRequest {
    /// Deterministic serialization used as the cache key.
    ///
    /// Object keys are sorted at every depth, so two requests that differ only
    /// in parameter insertion order produce the same key.
    pub fn canonical_key(&self) -> Result<String, LmError> {
        let value =
            serde_json::to_value(self).map_err(|source| LmError::InvalidRequest { source })?;
        serde_json::to_string(&Canonical(&value))
            .map_err(|source| LmError::InvalidRequest { source })
    }

    /// Flattens the messages into a single prompt for text-completion endpoints.
    pub fn text_prompt(&self) -> String {
        self.messages
            .iter()
            .map(|message| message.content.as_str())
            .chain(std::iter::once(TEXT_PROMPT_TERMINATOR))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// `(provider, model)` for this request's model identifier.
    pub fn provider_and_model(&self) -> (&str, &str) {
        split_provider(&self.model)
    }
}

/// Splits `provider/model`; identifiers without a provider default to `openai`.
pub fn split_provider(model: &str) -> (&str, &str) {
    model.split_once('/').unwrap_or((DEFAULT_PROVIDER, model))
}

/// Serializes a JSON value with object keys in sorted order.
struct Canonical<'a>(&'a Value);

impl Serialize for Canonical<'_> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Value::Object(map) => {
                let sorted: BTreeMap<&String, Canonical<'_>> =
                    map.iter().map(|(key, value)| (key, Canonical(value))).collect();
                sorted.serialize(serializer)
            }
            Value::Array(items) => serializer.collect_seq(items.iter().map(Canonical)),
            other => other.serialize(serializer),
        }
    }
}
