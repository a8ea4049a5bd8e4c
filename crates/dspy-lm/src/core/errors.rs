use std::{error::Error as StdError, time::Duration};

/// Coarse error classification for retry and routing logic.
///
/// Use [`LmError::class`] to get this. `Temporary` errors are generally retryable;
/// `Configuration` means the caller has to change something before trying again.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorClass {
    /// The request itself was malformed.
    BadRequest,
    /// Access denied by the provider.
    Forbidden,
    /// Transient failure (network, rate limit, timeout, server 5xx, cache outage).
    Temporary,
    /// The client or the requested operation is misconfigured.
    Configuration,
    /// A bug in the calling code or an unexpected provider response.
    Internal,
}

/// Failure from an [`LM`](crate::LM) operation.
///
/// Every synchronous failure of [`LM::invoke`](crate::LM::invoke) lands here.
/// Failures of a dispatched fine-tuning job never do: they are recorded on the
/// [`FinetuneJob`](crate::FinetuneJob) handle instead.
#[derive(Debug, thiserror::Error)]
pub enum LmError {
    /// Invalid construction parameters, such as reasoning-model sampling limits.
    #[error("invalid LM configuration: {message}")]
    Configuration { message: String },

    /// The operation is not available for this model or in this mode.
    #[error("unsupported operation: {message}")]
    Unsupported { message: String },

    /// The persistent cache could not be read or written.
    ///
    /// Never reported as a miss. Set
    /// [`LMConfig::cache_fallback`](crate::LMConfig::cache_fallback) to retry
    /// such calls uncached.
    #[error("response cache unavailable: {message}")]
    CacheUnavailable { message: String },

    /// The request could not be serialized into its canonical form.
    #[error("request cannot be serialized")]
    InvalidRequest {
        #[source]
        source: serde_json::Error,
    },

    /// The completion backend failed. Propagated as returned, never retried here.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The fine-tuning worker could not be started.
    #[error("failed to start fine-tuning worker")]
    Dispatch {
        #[source]
        source: std::io::Error,
    },

    /// The self-hosted lifecycle collaborator failed to launch or kill a model.
    #[error("model lifecycle error: {message}")]
    Lifecycle { message: String },
}

impl LmError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    pub fn cache_unavailable(message: impl Into<String>) -> Self {
        Self::CacheUnavailable {
            message: message.into(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Configuration { .. } | Self::Unsupported { .. } => ErrorClass::Configuration,
            Self::CacheUnavailable { .. } => ErrorClass::Temporary,
            Self::InvalidRequest { .. } => ErrorClass::BadRequest,
            Self::Backend(source) => source.class(),
            Self::Dispatch { .. } | Self::Lifecycle { .. } => ErrorClass::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::CacheUnavailable { .. } => true,
            Self::Backend(source) => source.is_retryable(),
            _ => false,
        }
    }
}

/// The completion backend failed before returning a usable response.
///
/// All variants except [`Provider`](BackendError::Provider) and client-side
/// [`InvalidResponse`](BackendError::InvalidResponse) are retryable.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Could not reach the provider endpoint (DNS, connection refused, etc.).
    #[error("could not reach {endpoint}")]
    Network {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// The provider returned a rate limit response (HTTP 429).
    #[error("rate limited by provider")]
    RateLimit { retry_after: Option<Duration> },

    /// The provider returned an unexpected HTTP status.
    #[error("invalid response from provider: HTTP {status}")]
    InvalidResponse { status: u16, body: String },

    /// The request exceeded the backend's timeout.
    #[error("request timed out after {after:?}")]
    Timeout { after: Duration },

    /// A provider-specific error that doesn't fit the other categories.
    #[error("provider error from {provider}: {message}")]
    Provider {
        provider: String,
        message: String,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },
}

impl BackendError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Network { .. } => ErrorClass::Temporary,
            Self::RateLimit { .. } => ErrorClass::Temporary,
            Self::InvalidResponse { status, .. } if *status >= 500 => ErrorClass::Temporary,
            Self::InvalidResponse { status: 401 | 403, .. } => ErrorClass::Forbidden,
            Self::InvalidResponse { .. } => ErrorClass::BadRequest,
            Self::Timeout { .. } => ErrorClass::Temporary,
            Self::Provider { .. } => ErrorClass::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } => true,
            Self::RateLimit { .. } => true,
            Self::Timeout { .. } => true,
            Self::InvalidResponse { status, .. } => *status >= 500,
            Self::Provider { .. } => false,
        }
    }
}
