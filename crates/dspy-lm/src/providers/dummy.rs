use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::{
    BackendError, CacheControl, Choice, CompletionBackend, CompletionRequest, LmError, LmUsage,
    ModelType, Response,
};

/// In-memory backend for deterministic tests and examples.
///
/// Answers every request with the same completions, shaped as chat or text
/// choices to match the request's [`ModelType`], and records every request it
/// receives. Text requests are flattened with
/// [`CompletionRequest::text_prompt`] the way a text-completion endpoint
/// would see them.
#[derive(Debug)]
pub struct DummyBackend {
    outputs: Vec<String>,
    usage: LmUsage,
    cost: Option<f64>,
    delay: Option<Duration>,
    fail_count: AtomicUsize,
    call_count: AtomicUsize,
    controls: Mutex<Vec<CacheControl>>,
    requests: Mutex<Vec<CompletionRequest>>,
    text_prompts: Mutex<Vec<String>>,
}

impl DummyBackend {
    pub fn new(output: impl Into<String>) -> Self {
        let output: String = output.into();
        Self::with_outputs([output])
    }

    pub fn with_outputs(outputs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            outputs: outputs.into_iter().map(Into::into).collect(),
            usage: LmUsage::new(10, 1),
            cost: Some(0.0001),
            delay: None,
            fail_count: AtomicUsize::new(0),
            call_count: AtomicUsize::new(0),
            controls: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            text_prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn cost(mut self, cost: Option<f64>) -> Self {
        self.cost = cost;
        self
    }

    /// Sleeps before answering, to widen race windows in tests.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fails the first `n` calls with a provider error.
    pub fn failing(self, n: usize) -> Self {
        self.fail_count.store(n, Ordering::SeqCst);
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Cache directives received so far, in call order.
    pub fn cache_controls(&self) -> Vec<CacheControl> {
        self.controls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// The most recent request, with every parameter as sent.
    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .last()
            .cloned()
    }

    /// Flattened prompts of the text-completion requests received so far.
    pub fn text_prompts(&self) -> Vec<String> {
        self.text_prompts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl CompletionBackend for DummyBackend {
    async fn complete(
        &self,
        request: &CompletionRequest,
        cache: CacheControl,
    ) -> Result<Response, LmError> {
        let call_num = self.call_count.fetch_add(1, Ordering::SeqCst);
        self.controls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(cache);
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request.clone());
        if request.model_type == ModelType::Text {
            self.text_prompts
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(request.text_prompt());
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if call_num < self.fail_count.load(Ordering::SeqCst) {
            return Err(BackendError::Provider {
                provider: "dummy".to_string(),
                message: format!("scripted failure #{}", call_num + 1),
                source: None,
            }
            .into());
        }

        let choices = self
            .outputs
            .iter()
            .map(|output| match request.model_type {
                ModelType::Chat => Choice::chat(output.clone()),
                ModelType::Text => Choice::text(output.clone()),
            })
            .collect();

        let mut response = Response::new(choices, self.usage.clone());
        let (_, model) = request.provider_and_model();
        response.model = Some(model.to_string());
        response.hidden_params.response_cost = self.cost;
        Ok(response)
    }
}
