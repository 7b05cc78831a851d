//! One-time selection of the watch mechanism for the whole process.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use gatelog_core::{GateError, Result, WatchConfig};
use notify::{RecommendedWatcher, Watcher, WatcherKind};
use tracing::info;

use crate::service::{FileWatchService, NotifyWatchService, WatchOptions};

static DETECTED: OnceLock<WatchProvider> = OnceLock::new();

/// Which backend a [`NotifyWatchService`] drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchProvider {
    /// inotify, FSEvents, kqueue or ReadDirectoryChangesW, per platform.
    Native,
    /// Periodic directory scans. Works everywhere, needs no OS support.
    Poll,
}

impl WatchProvider {
    /// The platform's native mechanism, falling back to polling where there is
    /// none. Detected on first call and fixed for the rest of the process.
    pub fn detect() -> WatchProvider {
        *DETECTED.get_or_init(|| {
            let provider = if <RecommendedWatcher as Watcher>::kind() == WatcherKind::PollWatcher {
                WatchProvider::Poll
            } else {
                WatchProvider::Native
            };
            info!(provider = %provider, "selected file watch provider");
            provider
        })
    }

    /// Explicit configuration wins; otherwise detect.
    pub fn from_config(config: &WatchConfig) -> Result<WatchProvider> {
        match config.provider.as_deref() {
            Some(name) => name.parse(),
            None => Ok(WatchProvider::detect()),
        }
    }

    pub fn service(self, options: WatchOptions) -> Arc<dyn FileWatchService> {
        Arc::new(NotifyWatchService::new(self, options))
    }
}

impl fmt::Display for WatchProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WatchProvider::Native => "native",
            WatchProvider::Poll => "poll",
        })
    }
}

impl FromStr for WatchProvider {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" | "os" | "recommended" => Ok(WatchProvider::Native),
            "poll" | "polling" => Ok(WatchProvider::Poll),
            other => Err(GateError::Config(format!("unknown watch provider '{}'", other))),
        }
    }
}

/// Build the process's watch service from configuration.
pub fn service_from_config(config: &WatchConfig) -> Result<Arc<dyn FileWatchService>> {
    let provider = WatchProvider::from_config(config)?;
    Ok(provider.service(WatchOptions::from(config)))
}
