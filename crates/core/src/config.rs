use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

/// Reads `{PROFILE}_{KEY}` first, then `{KEY}`, from some key/value source.
///
/// The process environment is the usual source; tests pass a closure.
struct Lookup<'a> {
    profile: String,
    source: &'a dyn Fn(&str) -> Option<String>,
}

impl Lookup<'_> {
    fn opt(&self, key: &str) -> Option<String> {
        let get = |k: &str| (self.source)(k).filter(|s| !s.is_empty());
        if !self.profile.is_empty() {
            if let Some(v) = get(&format!("{}_{}", self.profile, key)) {
                return Some(v);
            }
        }
        get(key)
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.opt(key).unwrap_or_else(|| default.to_string())
    }

    fn u64(&self, key: &str, default: u64) -> u64 {
        self.opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    fn bool(&self, key: &str, default: bool) -> bool {
        match self.opt(key).map(|v| v.to_ascii_lowercase()) {
            Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
            Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
            _ => default,
        }
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateConfig {
    /// Active profile name (empty = default).
    pub profile: String,
    pub watch: WatchConfig,
    pub store: StoreConfig,
}

impl GateConfig {
    /// Build config from environment variables (call `load_dotenv()` first).
    ///
    /// Profile is read from `GATELOG_PROFILE`. When set (e.g. `PROD`), every key
    /// is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build config from an arbitrary key/value source.
    pub fn from_lookup(source: impl Fn(&str) -> Option<String>) -> Self {
        let profile = source("GATELOG_PROFILE")
            .unwrap_or_default()
            .to_uppercase();
        let lookup = Lookup {
            profile: profile.clone(),
            source: &source,
        };
        Self {
            profile,
            watch: WatchConfig::from_lookup(&lookup),
            store: StoreConfig::from_lookup(&lookup),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  watch:  provider={}, hash_check={}, debounce={}ms",
            self.watch.provider.as_deref().unwrap_or("(detect)"),
            !self.watch.disable_hash_check,
            self.watch.debounce_ms
        );
        tracing::info!("  store:  path={}", self.store.path.display());
    }
}

// ── Watch ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// `native`, `poll`, or `None` to detect the platform's mechanism.
    pub provider: Option<String>,
    /// Emit MODIFY even when a file's content fingerprint did not change.
    pub disable_hash_check: bool,
    /// Quiet window used to coalesce bursts of raw OS events per path.
    pub debounce_ms: u64,
    /// Scan interval for the polling provider.
    pub poll_interval_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            provider: None,
            disable_hash_check: false,
            debounce_ms: 100,
            poll_interval_ms: 500,
        }
    }
}

impl WatchConfig {
    fn from_lookup(l: &Lookup<'_>) -> Self {
        let d = Self::default();
        Self {
            provider: l.opt("GATELOG_WATCH_PROVIDER").map(|p| p.to_ascii_lowercase()),
            disable_hash_check: l.bool("GATELOG_DISABLE_HASH_CHECK", d.disable_hash_check),
            debounce_ms: l.u64("GATELOG_WATCH_DEBOUNCE_MS", d.debounce_ms),
            poll_interval_ms: l.u64("GATELOG_POLL_INTERVAL_MS", d.poll_interval_ms),
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

// ── Store ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub path: PathBuf,
    /// Optional named-statement SQL bundle overriding the built-in one.
    pub sql_bundle: Option<PathBuf>,
    /// Script inserted for names the store has never seen.
    pub default_script: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/conditions.db"),
            sql_bundle: None,
            default_script: "true".to_string(),
        }
    }
}

impl StoreConfig {
    fn from_lookup(l: &Lookup<'_>) -> Self {
        let d = Self::default();
        Self {
            path: l
                .opt("GATELOG_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or(d.path),
            sql_bundle: l.opt("GATELOG_SQL_BUNDLE").map(PathBuf::from),
            default_script: l.or("GATELOG_DEFAULT_SCRIPT", &d.default_script),
        }
    }
}
