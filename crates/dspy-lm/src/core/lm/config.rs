use std::sync::LazyLock;

use bon::Builder;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::LmError;

/// Named request parameters forwarded verbatim to the completion backend.
pub type Params = serde_json::Map<String, Value>;

/// Completion style the configured model speaks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    #[default]
    Chat,
    Text,
}

/// A model family whose provider pins the sampling parameters.
struct ReasoningFamily {
    pattern: Regex,
    temperature: f64,
    min_max_tokens: u32,
}

static REASONING_FAMILIES: LazyLock<Vec<ReasoningFamily>> = LazyLock::new(|| {
    vec![ReasoningFamily {
        pattern: Regex::new(r"o1-").expect("valid reasoning family pattern"),
        temperature: 1.0,
        min_max_tokens: 5000,
    }]
});

/// Defaults applied to every [`LM::invoke`](crate::LM::invoke).
///
/// Per-call overrides are merged on top of [`LMConfig::default_params`].
#[derive(Clone, Debug, Builder)]
pub struct LMConfig {
    /// Model identifier, optionally prefixed with its provider (`openai/gpt-4o-mini`).
    #[builder(into, default = "openai/gpt-4o-mini".to_string())]
    pub model: String,
    /// Chat or text completion.
    #[builder(default)]
    pub model_type: ModelType,
    /// Sampling temperature.
    #[builder(default = 0.0)]
    pub temperature: f64,
    /// Maximum tokens requested for the completion.
    #[builder(default = 1000)]
    pub max_tokens: u32,
    /// Routes calls through the memory and persistent caches.
    #[builder(default = true)]
    pub cache: bool,
    /// Retries a call uncached when the persistent cache is unavailable.
    #[builder(default = false)]
    pub cache_fallback: bool,
    /// Extra provider parameters, merged after `temperature` and `max_tokens`.
    #[builder(default)]
    pub kwargs: Params,
}

impl Default for LMConfig {
    fn default() -> Self {
        LMConfig::builder().build()
    }
}

impl LMConfig {
    /// `{temperature, max_tokens, **kwargs}`, with `kwargs` winning on collisions.
    pub fn default_params(&self) -> Params {
        let mut params = Params::new();
        params.insert("temperature".to_string(), json!(self.temperature));
        params.insert("max_tokens".to_string(), json!(self.max_tokens));
        for (key, value) in &self.kwargs {
            params.insert(key.clone(), value.clone());
        }
        params
    }

    /// Rejects sampling settings the model's provider would refuse.
    ///
    /// Checks the merged [`default_params`](LMConfig::default_params), so
    /// `kwargs` cannot smuggle in values the typed fields would fail.
    pub fn validate(&self) -> Result<(), LmError> {
        let params = self.default_params();
        let temperature = params.get("temperature").and_then(Value::as_f64);
        let max_tokens = params.get("max_tokens").and_then(Value::as_u64);

        for family in REASONING_FAMILIES.iter() {
            if !family.pattern.is_match(&self.model) {
                continue;
            }
            let temperature_ok = temperature == Some(family.temperature);
            let max_tokens_ok =
                max_tokens.is_some_and(|max_tokens| max_tokens >= u64::from(family.min_max_tokens));
            if !temperature_ok || !max_tokens_ok {
                return Err(LmError::configuration(format!(
                    "`{}` requires temperature={:.1} and max_tokens >= {} (got temperature={}, max_tokens={})",
                    self.model,
                    family.temperature,
                    family.min_max_tokens,
                    params.get("temperature").unwrap_or(&Value::Null),
                    params.get("max_tokens").unwrap_or(&Value::Null)
                )));
            }
        }
        Ok(())
    }
}
