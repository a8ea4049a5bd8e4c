use async_trait::async_trait;
use tracing::debug;

use super::{CompletionRequest, Response};
use crate::LmError;

/// Cache directive passed along with every backend call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CacheControl {
    /// Consult and update the persistent cache.
    UseAll,
    /// Neither read nor write the persistent cache.
    Bypass,
}

impl CacheControl {
    pub fn no_cache(&self) -> bool {
        matches!(self, CacheControl::Bypass)
    }

    pub fn no_store(&self) -> bool {
        matches!(self, CacheControl::Bypass)
    }
}

/// Transport that turns a [`CompletionRequest`] into a provider [`Response`].
///
/// Implementations decide how to reach the provider and how to honor the
/// [`CacheControl`] directive. Wrap one in [`CachedBackend`](crate::CachedBackend)
/// to get a disk cache for free.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(
        &self,
        request: &CompletionRequest,
        cache: CacheControl,
    ) -> Result<Response, LmError>;
}

/// Starts and stops locally served models.
#[async_trait]
pub trait ModelLifecycle: Send + Sync {
    async fn launch(&self, model: &str) -> Result<(), LmError>;
    async fn kill(&self, model: &str) -> Result<(), LmError>;
}

/// Lifecycle used when nothing manages the local server.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopLifecycle;

#[async_trait]
impl ModelLifecycle for NoopLifecycle {
    async fn launch(&self, model: &str) -> Result<(), LmError> {
        debug!(model, "no lifecycle manager configured; launch skipped");
        Ok(())
    }

    async fn kill(&self, model: &str) -> Result<(), LmError> {
        debug!(model, "no lifecycle manager configured; kill skipped");
        Ok(())
    }
}

/// Self-hosted models are addressed with the `local/` provider prefix.
pub fn is_self_hosted_model(model: &str) -> bool {
    model.starts_with("local/")
}
