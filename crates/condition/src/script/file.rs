//! File-backed script sources, invalidated by the file watcher.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, RwLock, Weak};
use std::time::UNIX_EPOCH;

use gatelog_core::{GateError, Result, SharedSink};
use gatelog_watch::{FileWatchEvent, FileWatchService, FileWatcher, WatchEventKind};
use tracing::{debug, info, warn};

use super::{ScriptHandle, ScriptState};
use crate::compiled::ScriptCondition;
use crate::condition::Condition;
use crate::engine::ScriptEngine;

type Routes = Arc<RwLock<HashMap<PathBuf, Weak<FileScriptHandle>>>>;

/// Script files under one watched root.
///
/// Hands out one [`FileScriptHandle`] per file. Change events for a file
/// invalidate its handle; an overflow invalidates every live handle under the
/// root, since the OS no longer says which files changed.
pub struct FileScripts {
    root: PathBuf,
    routes: Routes,
    watcher: FileWatcher,
    sink: SharedSink,
}

impl FileScripts {
    /// Start watching `root` (recursively) through `service`.
    pub fn open(service: &dyn FileWatchService, root: impl AsRef<Path>, sink: SharedSink) -> Result<Self> {
        let root = root.as_ref().canonicalize()?;
        let routes: Routes = Arc::new(RwLock::new(HashMap::new()));

        let consumer_routes = Arc::clone(&routes);
        let thread_name = format!("gatelog-watch:{}", root.display());
        let watcher = service.watch(
            &thread_name,
            std::slice::from_ref(&root),
            Box::new(move |event| route_event(&consumer_routes, &event)),
        )?;

        info!(root = %root.display(), "watching script directory");
        Ok(Self {
            root,
            routes,
            watcher,
            sink,
        })
    }

    /// Watch the parent directory of `path` and return a handle for the file
    /// that keeps the watch alive for as long as the handle lives.
    pub fn open_file(
        service: &dyn FileWatchService,
        path: impl AsRef<Path>,
        sink: SharedSink,
    ) -> Result<Arc<FileScriptHandle>> {
        let path = path.as_ref();
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let name = path
            .file_name()
            .ok_or_else(|| GateError::Config(format!("not a file path: {}", path.display())))?;

        let scripts = Arc::new(Self::open(service, parent, sink)?);
        let handle = scripts.handle(name)?;
        let _ = handle.owner.set(scripts);
        Ok(handle)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The handle for `path` (absolute, or relative to the root), created on
    /// first lookup. The file does not need to exist yet.
    pub fn handle(&self, path: impl AsRef<Path>) -> Result<Arc<FileScriptHandle>> {
        let path = self.resolve(path.as_ref())?;
        let mut routes = match self.routes.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(existing) = routes.get(&path).and_then(Weak::upgrade) {
            return Ok(existing);
        }
        routes.retain(|_, weak| weak.strong_count() > 0);

        let handle = Arc::new(FileScriptHandle {
            identity: path.display().to_string(),
            path: path.clone(),
            state: ScriptState::new(),
            sink: self.sink.clone(),
            routes: Arc::downgrade(&self.routes),
            owner: OnceLock::new(),
            closed: AtomicBool::new(false),
        });
        routes.insert(path, Arc::downgrade(&handle));
        Ok(handle)
    }

    /// A live-reloading condition compiled from the file at `path`.
    pub fn condition(&self, path: impl AsRef<Path>, engine: Arc<dyn ScriptEngine>) -> Result<Condition> {
        let handle: Arc<dyn ScriptHandle> = self.handle(path)?;
        Ok(ScriptCondition::new(handle, engine).into_condition())
    }

    /// Stop the watcher. Handles keep their cached text but are never
    /// invalidated again.
    pub fn close(&self) {
        self.watcher.stop();
    }

    fn resolve(&self, path: &Path) -> Result<PathBuf> {
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        let resolved = match joined.canonicalize() {
            Ok(p) => p,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let parent = joined.parent().map(Path::canonicalize).transpose()?;
                match (parent, joined.file_name()) {
                    (Some(parent), Some(name)) => parent.join(name),
                    _ => return Err(e.into()),
                }
            }
            Err(e) => return Err(e.into()),
        };
        if !resolved.starts_with(&self.root) {
            return Err(GateError::Config(format!(
                "{} is outside watch root {}",
                resolved.display(),
                self.root.display()
            )));
        }
        Ok(resolved)
    }
}

fn route_event(routes: &Routes, event: &FileWatchEvent) {
    let routes = match routes.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    match (event.kind, event.path()) {
        (WatchEventKind::Overflow, _) => {
            let mut count = 0;
            for handle in routes.values().filter_map(Weak::upgrade) {
                handle.state.invalidate();
                count += 1;
            }
            warn!(handles = count, "watch overflow, invalidated every script under the root");
        }
        (kind, Some(path)) => {
            if let Some(handle) = routes.get(path).and_then(Weak::upgrade) {
                debug!(script = %handle.identity, kind = %kind, "script file changed");
                handle.state.invalidate();
            }
        }
        (_, None) => {}
    }
}

/// A script read from one file, invalidated by watch events for that file.
pub struct FileScriptHandle {
    identity: String,
    path: PathBuf,
    state: ScriptState,
    sink: SharedSink,
    routes: Weak<RwLock<HashMap<PathBuf, Weak<FileScriptHandle>>>>,
    /// Set when the handle owns its directory watch (see [`FileScripts::open_file`]).
    owner: OnceLock<Arc<FileScripts>>,
    closed: AtomicBool,
}

impl FileScriptHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mark the cached text stale, as a change event would.
    pub fn invalidate(&self) {
        self.state.invalidate();
    }

    fn read(&self) -> Result<(String, i64)> {
        let text = fs::read_to_string(&self.path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => GateError::NoSource {
                path: self.path.clone(),
            },
            _ => GateError::Io(e),
        })?;
        let modified = fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();
        Ok((text, modified))
    }
}

impl ScriptHandle for FileScriptHandle {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn current_text(&self) -> Result<Arc<str>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(GateError::Closed(self.identity.clone()));
        }
        self.state.current_or_refresh(|| self.read())
    }

    fn is_invalid(&self) -> bool {
        self.state.is_invalid()
    }

    fn version(&self) -> u64 {
        self.state.version()
    }

    fn on_error(&self, error: &GateError) {
        self.sink.report(&self.identity, error);
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(routes) = self.routes.upgrade() {
            let mut routes = match routes.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let mine = routes
                .get(&self.path)
                .is_some_and(|weak| std::ptr::eq(weak.as_ptr(), self));
            if mine {
                routes.remove(&self.path);
            }
        }
        if let Some(owner) = self.owner.get() {
            owner.close();
        }
        debug!(script = %self.identity, "closed script handle");
    }
}
