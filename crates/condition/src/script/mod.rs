//! Script sources: named, possibly changing script text with an invalidity flag.
//!
//! - [`InlineScript`]: fixed text, never invalid
//! - [`FileScripts`] / [`FileScriptHandle`]: files under a watched root,
//!   invalidated by change notifications

mod file;
mod inline;

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use gatelog_core::{GateError, Result};

pub use file::{FileScriptHandle, FileScripts};
pub use inline::InlineScript;

/// A versioned source of script text.
pub trait ScriptHandle: Send + Sync {
    /// Logical name of the script (a path, a store key, ...).
    fn identity(&self) -> &str;

    /// The script text, refreshed from the backing source first when the
    /// handle is invalid or has never loaded. May block; expected to be rare.
    fn current_text(&self) -> Result<Arc<str>>;

    /// The cached invalidity flag. Never blocks; may schedule a background
    /// staleness check whose outcome is visible on a later call.
    fn is_invalid(&self) -> bool;

    /// Counter bumped each time the loaded text actually changes. Conditions
    /// sharing a handle compare it to notice a refresh another one triggered.
    fn version(&self) -> u64 {
        0
    }

    /// Forward a compile or evaluation failure to the error sink.
    fn on_error(&self, error: &GateError);

    /// Release handle-owned resources. Idempotent.
    fn close(&self);
}

/// Cached text, last-load marker and invalidity flag shared by handle
/// implementations.
///
/// The flag may be set from any thread (watcher, store worker, caller).
/// Refreshes are serialized; readers never wait on them unless the text has
/// to be reloaded.
#[derive(Debug, Default)]
pub struct ScriptState {
    text: RwLock<Option<Arc<str>>>,
    invalid: AtomicBool,
    marker: AtomicI64,
    version: AtomicU64,
    refresh: Mutex<()>,
}

impl ScriptState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_invalid(&self) -> bool {
        self.invalid.load(Ordering::Acquire)
    }

    pub fn invalidate(&self) {
        self.invalid.store(true, Ordering::Release);
    }

    /// Marker recorded by the last successful refresh (source-specific, e.g.
    /// a modification time or a row's `touched_at`).
    pub fn marker(&self) -> i64 {
        self.marker.load(Ordering::Acquire)
    }

    /// Number of times the cached text has been replaced by different text.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn is_loaded(&self) -> bool {
        self.cached().is_some()
    }

    pub fn cached(&self) -> Option<Arc<str>> {
        match self.text.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Return the cached text, first calling `refresh` if the flag is set or
    /// nothing has been loaded. `refresh` yields the new text and its marker.
    ///
    /// The flag is consumed before `refresh` runs: an invalidation that lands
    /// during the refresh re-arms it, and a failed refresh is not retried
    /// until the next invalidation (unless nothing was ever loaded).
    pub fn current_or_refresh<F>(&self, refresh: F) -> Result<Arc<str>>
    where
        F: FnOnce() -> Result<(String, i64)>,
    {
        if let Some(text) = self.fresh() {
            return Ok(text);
        }

        let _guard = match self.refresh.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(text) = self.fresh() {
            return Ok(text);
        }

        self.invalid.store(false, Ordering::Release);
        let (text, marker) = refresh()?;
        self.marker.store(marker, Ordering::Release);

        // Unchanged text keeps its allocation so callers can tell nothing moved.
        let mut slot = match self.text.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match slot.as_ref() {
            Some(cached) if **cached == *text => Ok(Arc::clone(cached)),
            _ => {
                let text: Arc<str> = Arc::from(text);
                *slot = Some(Arc::clone(&text));
                self.version.fetch_add(1, Ordering::AcqRel);
                Ok(text)
            }
        }
    }

    fn fresh(&self) -> Option<Arc<str>> {
        if self.is_invalid() {
            None
        } else {
            self.cached()
        }
    }
}
