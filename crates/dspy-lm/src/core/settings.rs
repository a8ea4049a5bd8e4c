use std::path::PathBuf;
use std::sync::{LazyLock, RwLock};

/// Environment variable overriding the persistent cache directory.
pub const CACHE_DIR_ENV: &str = "DSPY_CACHEDIR";
const DEFAULT_CACHE_DIR_NAME: &str = ".dspy_cache";

/// Process-wide switches consulted by every [`LM`](crate::LM).
#[derive(Clone, Debug, Default)]
pub struct Settings {
    /// Gates experimental features such as [`LM::finetune`](crate::LM::finetune).
    pub experimental: bool,
}

pub static GLOBAL_SETTINGS: LazyLock<RwLock<Settings>> =
    LazyLock::new(|| RwLock::new(Settings::default()));

static CACHE_DIR: LazyLock<PathBuf> = LazyLock::new(|| {
    resolve_cache_dir(std::env::var_os(CACHE_DIR_ENV).map(PathBuf::from), dirs::home_dir())
});

pub fn configure(settings: Settings) {
    *GLOBAL_SETTINGS
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner()) = settings;
}

pub fn configure_experimental(enabled: bool) {
    GLOBAL_SETTINGS
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .experimental = enabled;
}

pub fn experimental() -> bool {
    GLOBAL_SETTINGS
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .experimental
}

/// Directory of the persistent response cache, resolved once per process.
pub fn cache_dir() -> &'static PathBuf {
    &CACHE_DIR
}

fn resolve_cache_dir(env_override: Option<PathBuf>, home: Option<PathBuf>) -> PathBuf {
    env_override
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| {
            home.unwrap_or_else(|| PathBuf::from("."))
                .join(DEFAULT_CACHE_DIR_NAME)
        })
}
