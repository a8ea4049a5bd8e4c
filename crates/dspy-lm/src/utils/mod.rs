pub mod cache;
pub mod telemetry;

pub use cache::{CacheOutcome, CachedBackend, MemoryCache, PersistentCache, ResponseStore};
pub use telemetry::{TelemetryInitError, init_tracing, truncate};
