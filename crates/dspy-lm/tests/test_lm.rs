use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dspy_lm::{
    CacheControl, CachedBackend, CallOverrides, DummyBackend, LM, LMConfig, LmError, Message,
    MemoryCache, ModelLifecycle, ModelType, Response, ResponseStore, params,
};
use futures::future::join_all;
use rstest::rstest;
use serde_json::json;

fn lm_with(backend: Arc<DummyBackend>, config: LMConfig) -> LM {
    LM::builder()
        .config(config)
        .backend(backend)
        .memory_cache(Arc::new(MemoryCache::new()))
        .build()
        .unwrap()
}

fn lm(backend: Arc<DummyBackend>) -> LM {
    lm_with(backend, LMConfig::default())
}

#[tokio::test]
async fn prompt_round_trip_and_transcript() {
    let backend = Arc::new(DummyBackend::new("4"));
    let lm = lm(backend.clone());

    let outputs = lm.invoke("2+2=").await.unwrap();
    assert_eq!(outputs, vec!["4"]);

    let recent = lm.history().last(1);
    let entry = &recent[0];
    assert_eq!(entry.prompt.as_deref(), Some("2+2="));
    assert_eq!(entry.messages, vec![Message::user("2+2=")]);
    assert_eq!(entry.outputs, vec!["4"]);

    let transcript = lm.render_history(1);
    assert!(transcript.contains("User message:\n2+2="));
    assert!(transcript.trim_end().ends_with('4'));
    lm.inspect_history(1);
}

#[tokio::test]
async fn identical_cached_calls_hit_the_backend_once() {
    let backend = Arc::new(DummyBackend::new("4"));
    let lm = lm(backend.clone());

    let first = lm.invoke("2+2=").await.unwrap();
    let second = lm.invoke("2+2=").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(backend.call_count(), 1);
    assert_eq!(backend.cache_controls(), vec![CacheControl::UseAll]);

    let entries = lm.history().entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].cost, Some(0.0001));
    assert_eq!(entries[1].cost, None);
    assert_eq!(lm.history().total_cost(), 0.0001);
}

#[tokio::test]
async fn parameter_order_does_not_defeat_the_cache() {
    let backend = Arc::new(DummyBackend::new("ok"));
    let lm = lm(backend.clone());

    lm.invoke_with("hi", CallOverrides::new().param("top_p", 0.9).param("n", 1))
        .await
        .unwrap();
    lm.invoke_with("hi", CallOverrides::new().param("n", 1).param("top_p", 0.9))
        .await
        .unwrap();

    assert_eq!(backend.call_count(), 1);
}

#[rstest]
#[case::per_call(LMConfig::default(), Some(false))]
#[case::configured(LMConfig::builder().cache(false).build(), None)]
#[tokio::test]
async fn disabled_cache_calls_the_backend_every_time(
    #[case] config: LMConfig,
    #[case] cache: Option<bool>,
) {
    let backend = Arc::new(DummyBackend::new("4"));
    let lm = lm_with(backend.clone(), config);
    let overrides = CallOverrides {
        cache,
        ..CallOverrides::default()
    };

    for _ in 0..3 {
        lm.invoke_with("2+2=", overrides.clone()).await.unwrap();
    }

    assert_eq!(backend.call_count(), 3);
    assert!(
        backend
            .cache_controls()
            .iter()
            .all(|control| control.no_cache() && control.no_store())
    );
    assert!(lm.history().entries().iter().all(|entry| entry.cost.is_some()));
}

#[tokio::test]
async fn history_records_successes_in_order_and_skips_failures() {
    let backend = Arc::new(DummyBackend::new("ok").failing(1));
    let lm = lm(backend.clone());

    let err = lm.invoke("first").await.unwrap_err();
    assert!(matches!(err, LmError::Backend(_)));
    assert!(lm.history().is_empty());

    for prompt in ["a", "b", "c"] {
        lm.invoke(prompt).await.unwrap();
    }

    let prompts: Vec<_> = lm
        .history()
        .entries()
        .iter()
        .map(|entry| entry.prompt.clone().unwrap())
        .collect();
    assert_eq!(prompts, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn failed_calls_are_not_memoized() {
    let backend = Arc::new(DummyBackend::new("ok").failing(1));
    let lm = lm(backend.clone());

    assert!(lm.invoke("retry me").await.is_err());
    assert_eq!(lm.invoke("retry me").await.unwrap(), vec!["ok"]);
    assert_eq!(backend.call_count(), 2);
}

#[tokio::test]
async fn credentials_are_used_but_not_recorded() {
    let backend = Arc::new(DummyBackend::new("ok"));
    let config = LMConfig::builder()
        .kwargs(params! { "api_key" => "sk-config" })
        .build();
    let lm = lm_with(backend.clone(), config);

    lm.invoke_with(
        "hello",
        CallOverrides::new()
            .param("api_base", "http://localhost:8000")
            .param("stop", json!(["\n"])),
    )
    .await
    .unwrap();

    let recent = lm.history().last(1);
    let entry = &recent[0];
    assert!(!entry.params.contains_key("api_key"));
    assert!(!entry.params.contains_key("api_base"));
    assert_eq!(entry.params["stop"], json!(["\n"]));
    assert_eq!(entry.params["temperature"], json!(0.0));

    let sent = backend.last_request().unwrap();
    assert_eq!(sent.params["api_key"], json!("sk-config"));
    assert_eq!(sent.params["api_base"], json!("http://localhost:8000"));
}

#[tokio::test]
async fn overrides_win_over_defaults() {
    let backend = Arc::new(DummyBackend::new("ok"));
    let config = LMConfig::builder()
        .temperature(0.2)
        .kwargs(params! { "n" => 1 })
        .build();
    let lm = lm_with(backend, config);

    lm.invoke_with(
        "hello",
        CallOverrides::new().param("temperature", 0.9).param("n", 3),
    )
    .await
    .unwrap();

    let recent = lm.history().last(1);
    let entry = &recent[0];
    assert_eq!(entry.params["temperature"], json!(0.9));
    assert_eq!(entry.params["n"], json!(3));
    assert_eq!(entry.params["max_tokens"], json!(1000));
}

#[tokio::test]
async fn messages_and_text_models() {
    let backend = Arc::new(DummyBackend::with_outputs(["one", "two"]));
    let config = LMConfig::builder().model_type(ModelType::Text).build();
    let lm = lm_with(backend.clone(), config);

    let messages = vec![Message::system("Count."), Message::user("Go")];
    let outputs = lm.invoke(messages.clone()).await.unwrap();
    assert_eq!(outputs, vec!["one", "two"]);

    let recent = lm.history().last(1);
    let entry = &recent[0];
    assert_eq!(entry.prompt, None);
    assert_eq!(entry.messages, messages);
    assert_eq!(entry.model_type, ModelType::Text);
    assert!(lm.render_history(1).contains("(and 1 other completions)"));
    assert_eq!(entry.response.model.as_deref(), Some("gpt-4o-mini"));
    assert_eq!(
        backend.text_prompts(),
        vec!["Count.\n\nGo\n\nBEGIN RESPONSE:"]
    );
}

#[tokio::test]
async fn concurrent_identical_calls_compute_once() {
    let backend = Arc::new(DummyBackend::new("4").delay(Duration::from_millis(50)));
    let lm = lm(backend.clone());

    let calls = (0..8).map(|_| {
        let lm = lm.clone();
        async move { lm.invoke("2+2=").await }
    });
    let results = join_all(calls).await;

    assert!(results.iter().all(|result| result.as_ref().unwrap() == &vec!["4"]));
    assert_eq!(backend.call_count(), 1);

    let entries = lm.history().entries();
    assert_eq!(entries.len(), 8);
    assert_eq!(entries.iter().filter(|entry| entry.cost.is_some()).count(), 1);
}

#[tokio::test]
async fn memory_cache_is_shared_between_clients() {
    let backend = Arc::new(DummyBackend::new("4"));
    let cache = Arc::new(MemoryCache::new());
    let build = || {
        LM::builder()
            .backend(backend.clone())
            .memory_cache(cache.clone())
            .build()
            .unwrap()
    };
    let (a, b) = (build(), build());

    a.invoke("2+2=").await.unwrap();
    b.invoke("2+2=").await.unwrap();
    assert_eq!(backend.call_count(), 1);
    assert_eq!(a.history().len(), 1);
    assert_eq!(b.history().len(), 1);

    cache.clear();
    b.invoke("2+2=").await.unwrap();
    assert_eq!(backend.call_count(), 2);
}

#[rstest]
#[case(0.0, 5000)]
#[case(1.0, 1000)]
fn reasoning_models_reject_fixed_sampling_violations(
    #[case] temperature: f64,
    #[case] max_tokens: u32,
) {
    let config = LMConfig::builder()
        .model("openai/o1-preview")
        .temperature(temperature)
        .max_tokens(max_tokens)
        .build();
    let result = LM::builder()
        .config(config)
        .backend(Arc::new(DummyBackend::new("")))
        .build();
    assert!(matches!(result, Err(LmError::Configuration { .. })));
}

#[test]
fn reasoning_models_accept_their_required_sampling() {
    let config = LMConfig::builder()
        .model("openai/o1-preview")
        .temperature(1.0)
        .max_tokens(5000)
        .build();
    let lm = LM::builder()
        .config(config)
        .backend(Arc::new(DummyBackend::new("")))
        .build()
        .unwrap();
    assert_eq!(lm.config().max_tokens, 5000);
}

struct UnavailableStore;

#[async_trait]
impl ResponseStore for UnavailableStore {
    async fn get(&self, _key: &str) -> Result<Option<Response>, LmError> {
        Err(LmError::cache_unavailable("store offline"))
    }

    async fn insert(&self, _key: &str, _response: &Response) -> Result<(), LmError> {
        Err(LmError::cache_unavailable("store offline"))
    }
}

#[tokio::test]
async fn cache_outage_is_an_error_unless_fallback_is_enabled() {
    let strict = LM::builder()
        .backend(Arc::new(CachedBackend::new(
            DummyBackend::new("4"),
            UnavailableStore,
        )))
        .memory_cache(Arc::new(MemoryCache::new()))
        .build()
        .unwrap();
    let err = strict.invoke("2+2=").await.unwrap_err();
    assert!(matches!(err, LmError::CacheUnavailable { .. }));
    assert!(strict.history().is_empty());

    let backend = Arc::new(CachedBackend::new(DummyBackend::new("4"), UnavailableStore));
    let lenient = LM::builder()
        .config(LMConfig::builder().cache_fallback(true).build())
        .backend(backend.clone())
        .memory_cache(Arc::new(MemoryCache::new()))
        .build()
        .unwrap();
    assert_eq!(lenient.invoke("2+2=").await.unwrap(), vec!["4"]);
    assert_eq!(backend.inner().call_count(), 1);
    assert_eq!(backend.inner().cache_controls(), vec![CacheControl::Bypass]);
}

#[derive(Default)]
struct RecordingLifecycle {
    events: Mutex<Vec<String>>,
}

#[async_trait]
impl ModelLifecycle for RecordingLifecycle {
    async fn launch(&self, model: &str) -> Result<(), LmError> {
        self.events.lock().unwrap().push(format!("launch {model}"));
        Ok(())
    }

    async fn kill(&self, model: &str) -> Result<(), LmError> {
        self.events.lock().unwrap().push(format!("kill {model}"));
        Ok(())
    }
}

#[tokio::test]
async fn lifecycle_only_runs_for_self_hosted_models() {
    let lifecycle = Arc::new(RecordingLifecycle::default());
    let build = |model: &str| {
        LM::builder()
            .config(LMConfig::builder().model(model).build())
            .backend(Arc::new(DummyBackend::new("")))
            .lifecycle(lifecycle.clone())
            .build()
            .unwrap()
    };

    let remote = build("openai/gpt-4o-mini");
    remote.launch().await.unwrap();
    remote.kill().await.unwrap();
    assert!(lifecycle.events.lock().unwrap().is_empty());

    let local = build("local/llama-3-8b");
    local.launch().await.unwrap();
    local.kill().await.unwrap();
    assert_eq!(
        *lifecycle.events.lock().unwrap(),
        vec!["launch local/llama-3-8b", "kill local/llama-3-8b"]
    );
}
