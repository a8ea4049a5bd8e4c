pub mod backend;
pub mod chat;
pub mod config;
pub mod request;
pub mod response;
pub mod usage;

pub use backend::*;
pub use chat::*;
pub use config::*;
pub use request::*;
pub use response::*;
pub use usage::*;

use std::sync::Arc;

use bon::Builder;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::{
    CacheOutcome, FinetuneJob, FinetuneRegistry, HistoryEntry, HistoryStore, LmError, MemoryCache,
    MessageCompletionPair, scrub_credentials, settings, truncate,
};

/// Per-call adjustments layered over an [`LM`]'s configuration.
#[derive(Clone, Debug, Default)]
pub struct CallOverrides {
    /// Overrides [`LMConfig::cache`] for this call only.
    pub cache: Option<bool>,
    /// Merged over [`LMConfig::default_params`]; these win on collisions.
    pub params: Params,
}

impl CallOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache(mut self, enabled: bool) -> Self {
        self.cache = Some(enabled);
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// Provider-agnostic language model client.
///
/// `LM` merges call parameters over its configuration, deduplicates identical
/// requests through a [`MemoryCache`], delegates the network call to a
/// [`CompletionBackend`] and records every successful call in its
/// [`HistoryStore`]. Clones share the backend, caches and history via `Arc`.
#[derive(Builder, Clone)]
#[builder(finish_fn(vis = "", name = build_internal))]
pub struct LM {
    /// Model settings applied to each call.
    #[builder(default, getter)]
    config: LMConfig,
    backend: Arc<dyn CompletionBackend>,
    /// Memo table for cached calls; the process-wide one by default.
    #[builder(default = MemoryCache::shared())]
    memory_cache: Arc<MemoryCache>,
    #[builder(default)]
    history: Arc<HistoryStore>,
    #[builder(default = Arc::new(NoopLifecycle))]
    lifecycle: Arc<dyn ModelLifecycle>,
    #[builder(default = FinetuneRegistry::global())]
    finetune_registry: Arc<FinetuneRegistry>,
}

impl<S: l_m_builder::IsComplete> LMBuilder<S> {
    /// Finalizes construction of an [`LM`], rejecting configurations the
    /// model's provider would refuse.
    pub fn build(self) -> Result<LM, LmError> {
        let lm = self.build_internal();
        lm.config.validate()?;
        debug!(
            model = %lm.config.model,
            model_type = ?lm.config.model_type,
            cache = lm.config.cache,
            "LM initialized"
        );
        Ok(lm)
    }
}

impl std::fmt::Debug for LM {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LM")
            .field("config", &self.config)
            .field("history_len", &self.history.len())
            .finish_non_exhaustive()
    }
}

impl LM {
    /// Calls the model with the configured defaults and returns one output per choice.
    pub async fn invoke(&self, input: impl Into<LmInput>) -> Result<Vec<String>, LmError> {
        self.invoke_with(input, CallOverrides::default()).await
    }

    /// Calls the model with `overrides` merged over the configured defaults.
    ///
    /// With caching enabled, identical requests are answered once per
    /// process and later calls are recorded with no cost. A failed call
    /// leaves no history entry.
    #[tracing::instrument(
        name = "dspy_lm.lm.invoke",
        level = "debug",
        skip(self, input, overrides),
        fields(model = %self.config.model)
    )]
    pub async fn invoke_with(
        &self,
        input: impl Into<LmInput>,
        overrides: CallOverrides,
    ) -> Result<Vec<String>, LmError> {
        let input = input.into();
        let use_cache = overrides.cache.unwrap_or(self.config.cache);

        let mut params = self.config.default_params();
        params.extend(overrides.params);

        let request = CompletionRequest {
            model: self.config.model.clone(),
            model_type: self.config.model_type,
            messages: input.to_messages(),
            params,
        };
        if let Some(last) = request.messages.last() {
            trace!(prompt = truncate(&last.content, 120), "sending request");
        }

        let (response, outcome) = match self.complete(&request, use_cache).await {
            Err(LmError::CacheUnavailable { message }) if self.config.cache_fallback => {
                warn!(error = %message, "response cache unavailable; retrying uncached");
                let response = self.backend.complete(&request, CacheControl::Bypass).await?;
                (response, CacheOutcome::Miss)
            }
            result => result?,
        };

        let outputs = response.outputs();
        let cost = match outcome {
            CacheOutcome::Hit => None,
            CacheOutcome::Miss => response.cost(),
        };
        debug!(
            choices = outputs.len(),
            cache_hit = outcome == CacheOutcome::Hit,
            total_tokens = response.usage.total_tokens,
            "LM call complete"
        );

        self.history.push(HistoryEntry {
            prompt: input.prompt().map(str::to_string),
            params: scrub_credentials(&request.params),
            messages: request.messages,
            usage: response.usage.clone(),
            outputs: outputs.clone(),
            response,
            cost,
            model: request.model,
            model_type: request.model_type,
            timestamp: Utc::now(),
        });

        Ok(outputs)
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
        use_cache: bool,
    ) -> Result<(Response, CacheOutcome), LmError> {
        if !use_cache {
            debug!("cache bypassed");
            let response = self.backend.complete(request, CacheControl::Bypass).await?;
            return Ok((response, CacheOutcome::Miss));
        }

        let key = request.canonical_key()?;
        self.memory_cache
            .get_or_compute(&key, || self.backend.complete(request, CacheControl::UseAll))
            .await
    }

    pub fn config(&self) -> &LMConfig {
        &self.config
    }

    /// Shared call log of this client and its clones.
    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    /// Uncoloured transcript of the `n` most recent calls.
    pub fn render_history(&self, n: usize) -> String {
        self.history.render(n, false)
    }

    /// Prints the `n` most recent prompts and their completions.
    pub fn inspect_history(&self, n: usize) {
        print!("{}", self.history.render(n, true));
    }

    /// Starts the local server for self-hosted models; a no-op otherwise.
    pub async fn launch(&self) -> Result<(), LmError> {
        if is_self_hosted_model(&self.config.model) {
            return self.lifecycle.launch(&self.config.model).await;
        }
        debug!(
            model = %self.config.model,
            "`LM::launch` called for an externally managed model; no action taken"
        );
        Ok(())
    }

    /// Stops the local server for self-hosted models; a no-op otherwise.
    pub async fn kill(&self) -> Result<(), LmError> {
        if is_self_hosted_model(&self.config.model) {
            return self.lifecycle.kill(&self.config.model).await;
        }
        debug!(
            model = %self.config.model,
            "`LM::kill` called for an externally managed model; no action taken"
        );
        Ok(())
    }

    /// Starts fine-tuning this model in the background.
    ///
    /// Experimental: requires [`settings::configure_experimental`]. Returns as
    /// soon as the job is dispatched; the remote outcome is reported on the
    /// returned [`FinetuneJob`].
    pub fn finetune(
        &self,
        pairs: Vec<MessageCompletionPair>,
        config: serde_json::Map<String, Value>,
    ) -> Result<FinetuneJob, LmError> {
        if !settings::experimental() {
            return Err(LmError::unsupported(
                "fine-tuning is an experimental feature and requires `settings::configure_experimental(true)`",
            ));
        }
        self.finetune_registry
            .dispatch(&self.config.model, pairs, config)
    }
}
