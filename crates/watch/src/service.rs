//! The watch service plug point and the handle it returns.

use std::path::PathBuf;
use std::sync::{mpsc, Mutex};
use std::thread;
use std::time::Duration;

use gatelog_core::{GateError, Result, WatchConfig};
use notify::{Event, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{info, warn};

use crate::event::FileWatchEvent;
use crate::fingerprint::Fingerprints;
use crate::pipeline::{Message, Pipeline};
use crate::provider::WatchProvider;

/// Receives settled events on the watcher's background thread.
pub type EventConsumer = Box<dyn FnMut(FileWatchEvent) + Send + 'static>;

/// Watches files and directories recursively and reports changes.
///
/// Implementations deliver events on a dedicated background thread named
/// `thread_name`, never on the caller's thread.
pub trait FileWatchService: Send + Sync {
    fn watch(
        &self,
        thread_name: &str,
        paths: &[PathBuf],
        consumer: EventConsumer,
    ) -> Result<FileWatcher>;
}

type StopHook = Box<dyn FnOnce() + Send + 'static>;

/// Handle to an active watch. Dropping it stops the watch.
pub struct FileWatcher {
    name: String,
    roots: Vec<PathBuf>,
    stop: Mutex<Option<StopHook>>,
}

impl FileWatcher {
    /// Wrap a running watch; `stop` releases its OS handles and worker.
    pub fn new(name: impl Into<String>, roots: Vec<PathBuf>, stop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            name: name.into(),
            roots,
            stop: Mutex::new(Some(Box::new(stop))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Canonicalized roots being watched.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn is_running(&self) -> bool {
        match self.stop.lock() {
            Ok(guard) => guard.is_some(),
            Err(poisoned) => poisoned.into_inner().is_some(),
        }
    }

    /// Stop watching. Safe to call any number of times.
    pub fn stop(&self) {
        let hook = match self.stop.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(hook) = hook {
            hook();
            info!(watcher = %self.name, "stopped file watcher");
        }
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatcher")
            .field("name", &self.name)
            .field("roots", &self.roots)
            .field("running", &self.is_running())
            .finish()
    }
}

// ── notify-backed implementation ────────────────────────────────────

/// Tuning for [`NotifyWatchService`].
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Skip content fingerprinting: lower latency, possible spurious MODIFY.
    pub disable_hash_check: bool,
    pub debounce: Duration,
    pub poll_interval: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        WatchOptions::from(&WatchConfig::default())
    }
}

impl From<&WatchConfig> for WatchOptions {
    fn from(config: &WatchConfig) -> Self {
        Self {
            disable_hash_check: config.disable_hash_check,
            debounce: config.debounce(),
            poll_interval: config.poll_interval(),
        }
    }
}

/// [`FileWatchService`] backed by the `notify` crate.
///
/// The provider fixes which backend every watch uses: the OS-native
/// mechanism, or the portable polling scanner.
#[derive(Debug, Clone)]
pub struct NotifyWatchService {
    provider: WatchProvider,
    options: WatchOptions,
}

impl NotifyWatchService {
    pub fn new(provider: WatchProvider, options: WatchOptions) -> Self {
        Self { provider, options }
    }

    pub fn provider(&self) -> WatchProvider {
        self.provider
    }

    pub fn options(&self) -> &WatchOptions {
        &self.options
    }

    fn backend(
        &self,
        tx: mpsc::Sender<Message>,
    ) -> notify::Result<Box<dyn Watcher + Send>> {
        let handler = move |res: notify::Result<Event>| {
            let _ = tx.send(Message::Raw(res));
        };
        Ok(match self.provider {
            WatchProvider::Native => Box::new(RecommendedWatcher::new(handler, notify::Config::default())?),
            WatchProvider::Poll => Box::new(PollWatcher::new(
                handler,
                notify::Config::default().with_poll_interval(self.options.poll_interval),
            )?),
        })
    }
}

impl FileWatchService for NotifyWatchService {
    fn watch(
        &self,
        thread_name: &str,
        paths: &[PathBuf],
        consumer: EventConsumer,
    ) -> Result<FileWatcher> {
        if paths.is_empty() {
            return Err(GateError::Watch("no paths to watch".to_string()));
        }
        let roots = paths
            .iter()
            .map(|p| p.canonicalize())
            .collect::<std::io::Result<Vec<_>>>()?;

        let (tx, rx) = mpsc::channel();
        let mut backend = self.backend(tx.clone()).map_err(watch_error)?;
        for root in &roots {
            backend
                .watch(root, RecursiveMode::Recursive)
                .map_err(watch_error)?;
        }

        let mut fingerprints = Fingerprints::new(!self.options.disable_hash_check);
        fingerprints.rescan(&roots);

        let pipeline = Pipeline::new(
            thread_name.to_string(),
            roots.clone(),
            fingerprints,
            self.options.debounce,
            consumer,
        );
        let worker = thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || pipeline.run(rx))?;

        info!(
            watcher = %thread_name,
            provider = %self.provider,
            roots = ?roots,
            hash_check = !self.options.disable_hash_check,
            "watching paths for changes (recursive)"
        );

        let name = thread_name.to_string();
        Ok(FileWatcher::new(thread_name, roots, move || {
            // Release the OS handles before waking the worker.
            drop(backend);
            let _ = tx.send(Message::Stop);
            if worker.thread().id() != thread::current().id() && worker.join().is_err() {
                warn!(watcher = %name, "watch worker panicked");
            }
        }))
    }
}

fn watch_error(e: notify::Error) -> GateError {
    GateError::Watch(e.to_string())
}
