//! Provider-agnostic LM client.
//!
//! [`LM`] canonicalizes each request, deduplicates identical calls through a
//! process-local [`MemoryCache`], hands the rest to a [`CompletionBackend`]
//! (optionally wrapped in a disk-backed [`CachedBackend`]) and records every
//! successful call in a [`HistoryStore`]. Fine-tuning runs are dispatched to
//! provider backends registered in a [`FinetuneRegistry`].

pub mod core;
pub mod data;
pub mod providers;
pub mod utils;

pub use core::*;
pub use data::*;
pub use providers::*;
pub use utils::*;

#[doc(hidden)]
pub use serde_json as __serde_json;

/// Builds a [`Params`] map from `key => value` pairs; values go through `json!`.
#[macro_export]
macro_rules! params {
    () => {
        $crate::Params::new()
    };

    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut params = $crate::Params::new();
        $(
            params.insert(::std::string::ToString::to_string(&$key), $crate::__serde_json::json!($value));
        )*
        params
    }};
}
