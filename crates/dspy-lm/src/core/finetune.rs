use std::panic::AssertUnwindSafe;
use std::sync::{Arc, LazyLock, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{LmError, Message};

/// One supervised example: the conversation so far and the completion to learn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageCompletionPair {
    pub messages: Vec<Message>,
    pub completion: Message,
}

/// Everything a provider needs to start a fine-tuning run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FinetuneRequest {
    pub job_id: Uuid,
    pub model: String,
    pub pairs: Vec<MessageCompletionPair>,
    pub config: serde_json::Map<String, Value>,
}

/// Provider-side fine-tuning transport.
///
/// Runs on the dispatcher's worker thread and returns the identifier of the
/// fine-tuned model once the remote job finishes.
#[async_trait]
pub trait FinetuneBackend: Send + Sync {
    async fn finetune(&self, request: FinetuneRequest) -> anyhow::Result<String>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Succeeded { model: String },
    Failed { error: String },
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending)
    }
}

/// Caller-owned handle to a dispatched fine-tuning run.
///
/// Returned before any remote work starts. The worker records the outcome on
/// it exactly once; poll [`status`](FinetuneJob::status) or await
/// [`wait`](FinetuneJob::wait).
#[derive(Clone, Debug)]
pub struct FinetuneJob {
    id: Uuid,
    provider: String,
    model: String,
    state: Arc<watch::Sender<JobStatus>>,
}

impl FinetuneJob {
    fn new(provider: &str, model: &str) -> Self {
        let (state, _) = watch::channel(JobStatus::Pending);
        Self {
            id: Uuid::new_v4(),
            provider: provider.to_string(),
            model: model.to_string(),
            state: Arc::new(state),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Base model being fine-tuned.
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn status(&self) -> JobStatus {
        self.state.borrow().clone()
    }

    pub fn is_done(&self) -> bool {
        self.state.borrow().is_terminal()
    }

    /// Resolves once the worker has recorded a terminal status.
    pub async fn wait(&self) -> JobStatus {
        let mut rx = self.state.subscribe();
        match rx.wait_for(JobStatus::is_terminal).await {
            Ok(status) => status.clone(),
            // The sender lives in `self`, so the channel cannot close while we wait.
            Err(_) => self.status(),
        }
    }

    fn complete(&self, outcome: Result<String, String>) {
        let status = match outcome {
            Ok(model) => JobStatus::Succeeded { model },
            Err(error) => JobStatus::Failed { error },
        };
        self.state.send_if_modified(|current| {
            if current.is_terminal() {
                return false;
            }
            *current = status;
            true
        });
    }
}

type ModelPredicate = Box<dyn Fn(&str) -> bool + Send + Sync>;
type BackendFactory = Box<dyn Fn() -> Arc<dyn FinetuneBackend> + Send + Sync>;

struct RegistryEntry {
    provider: String,
    matches: ModelPredicate,
    make: BackendFactory,
}

static GLOBAL_REGISTRY: LazyLock<Arc<FinetuneRegistry>> =
    LazyLock::new(|| Arc::new(FinetuneRegistry::new()));

/// Maps model families to fine-tuning backends.
///
/// Entries are tried in registration order; the first whose predicate accepts
/// the model identifier wins.
#[derive(Default)]
pub struct FinetuneRegistry {
    entries: RwLock<Vec<RegistryEntry>>,
}

impl std::fmt::Debug for FinetuneRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinetuneRegistry")
            .field("providers", &self.providers())
            .finish()
    }
}

impl FinetuneRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry used by every [`LM`](crate::LM) unless given its own.
    pub fn global() -> Arc<Self> {
        GLOBAL_REGISTRY.clone()
    }

    pub fn register<P, F>(&self, provider: impl Into<String>, matches: P, make: F)
    where
        P: Fn(&str) -> bool + Send + Sync + 'static,
        F: Fn() -> Arc<dyn FinetuneBackend> + Send + Sync + 'static,
    {
        let provider = provider.into();
        debug!(provider = %provider, "fine-tuning backend registered");
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(RegistryEntry {
                provider,
                matches: Box::new(matches),
                make: Box::new(make),
            });
    }

    pub fn providers(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|entry| entry.provider.clone())
            .collect()
    }

    /// Provider name and a fresh backend for `model`, if any family claims it.
    pub fn resolve(&self, model: &str) -> Option<(String, Arc<dyn FinetuneBackend>)> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .find(|entry| (entry.matches)(model))
            .map(|entry| (entry.provider.clone(), (entry.make)()))
    }

    /// Starts fine-tuning `model` in the background and returns its handle.
    ///
    /// The run happens on a dedicated, detached worker thread. Nothing waits
    /// for it; its outcome is only observable through the returned job.
    #[tracing::instrument(
        name = "dspy_lm.finetune.dispatch",
        level = "debug",
        skip(self, pairs, config),
        fields(pairs = pairs.len())
    )]
    pub fn dispatch(
        &self,
        model: &str,
        pairs: Vec<MessageCompletionPair>,
        config: serde_json::Map<String, Value>,
    ) -> Result<FinetuneJob, LmError> {
        let Some((provider, backend)) = self.resolve(model) else {
            return Err(LmError::unsupported(format!(
                "fine-tuning is not supported for the model {model}"
            )));
        };

        let job = FinetuneJob::new(&provider, model);
        let request = FinetuneRequest {
            job_id: job.id(),
            model: model.to_string(),
            pairs,
            config,
        };

        let worker_job = job.clone();
        std::thread::Builder::new()
            .name(format!("finetune-{}", job.id()))
            .spawn(move || run_job(worker_job, backend, request))
            .map_err(|source| LmError::Dispatch { source })?;

        info!(job_id = %job.id(), provider = %provider, model, "fine-tuning job dispatched");
        Ok(job)
    }
}

fn run_job(job: FinetuneJob, backend: Arc<dyn FinetuneBackend>, request: FinetuneRequest) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            job.complete(Err(format!("failed to start worker runtime: {err}")));
            return;
        }
    };

    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
        runtime.block_on(backend.finetune(request))
    }));

    let outcome = match outcome {
        Ok(Ok(model)) => Ok(model),
        Ok(Err(err)) => Err(format!("{err:#}")),
        Err(panic) => Err(panic_message(panic.as_ref())),
    };

    match &outcome {
        Ok(model) => info!(job_id = %job.id(), model, "fine-tuning job succeeded"),
        Err(err) => error!(job_id = %job.id(), error = %err, "fine-tuning job failed"),
    }
    job.complete(outcome);
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("fine-tuning worker panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("fine-tuning worker panicked: {message}")
    } else {
        "fine-tuning worker panicked".to_string()
    }
}

/// OpenAI model identifiers, with or without the `openai/` prefix.
pub fn is_openai_model(model: &str) -> bool {
    const FAMILIES: [&str; 4] = ["gpt-3.5", "gpt-4", "babbage-002", "davinci-002"];
    let name = model.strip_prefix("openai/").unwrap_or(model);
    model.starts_with("openai/") || FAMILIES.iter().any(|family| name.starts_with(family))
}

/// Models served by Anyscale endpoints.
pub fn is_anyscale_model(model: &str) -> bool {
    model.starts_with("anyscale/")
}
