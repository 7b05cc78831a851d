use std::collections::HashMap;
use std::fs;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use gatelog_condition::{Condition, ScriptCondition, ScriptEngine, ScriptHandle};
use gatelog_core::{GateError, Result, SharedSink, StoreConfig};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::entry::ConditionEntry;
use crate::handle::StoreScriptHandle;
use crate::sql::{SqlBundle, BOOTSTRAP};
use crate::worker::{storage, Job, Reply, Worker};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ── Shared state ──────────────────────────────────────────────

/// What the store and its handles share: the job queue, the live handles by
/// name, and the defaults handed to the worker.
pub(crate) struct Shared {
    label: String,
    /// `None` once the store is closed.
    jobs: Mutex<Option<Sender<Job>>>,
    handles: Mutex<HashMap<String, Weak<StoreScriptHandle>>>,
    default_script: String,
    sink: SharedSink,
}

impl Shared {
    pub(crate) fn submit(&self, job: Job) -> Result<()> {
        let jobs = lock(&self.jobs);
        match jobs.as_ref() {
            Some(tx) => tx.send(job).map_err(|_| self.closed()),
            None => Err(self.closed()),
        }
    }

    /// Submit a job and wait for its reply.
    pub(crate) fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Job) -> Result<T> {
        let (reply, answer) = mpsc::sync_channel(1);
        self.submit(make(reply))?;
        answer.recv().map_err(|_| self.closed())?
    }

    pub(crate) fn default_script(&self) -> &str {
        &self.default_script
    }

    pub(crate) fn sink(&self) -> &SharedSink {
        &self.sink
    }

    /// Drop `name` from the live handles if it still maps to `handle`.
    pub(crate) fn forget(&self, name: &str, handle: &Weak<StoreScriptHandle>) {
        let mut handles = lock(&self.handles);
        if handles.get(name).is_some_and(|h| h.ptr_eq(handle)) {
            handles.remove(name);
        }
    }

    /// Stop accepting work and tell the worker to wind down. Returns `false`
    /// if this already happened.
    fn shutdown(&self) -> bool {
        let Some(tx) = lock(&self.jobs).take() else {
            return false;
        };
        let _ = tx.send(Job::Shutdown);
        true
    }

    fn closed(&self) -> GateError {
        GateError::Closed(format!("condition store {}", self.label))
    }
}

// ── Store ─────────────────────────────────────────────────────

/// Named condition scripts persisted in SQLite.
///
/// One connection, owned by one worker thread, serves every handle and every
/// administrative call. [`create`](Self::create) hands out conditions that
/// start from a default script when the name is new and reload when the row
/// changes.
pub struct ConditionStore {
    shared: Arc<Shared>,
    engine: Arc<dyn ScriptEngine>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ConditionStore {
    /// Open (or create) the database at `config.path`, run the schema
    /// bootstrap, and start the worker.
    pub fn open(config: &StoreConfig, engine: Arc<dyn ScriptEngine>, sink: SharedSink) -> Result<Self> {
        if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&config.path).map_err(storage)?;
        let sql = match &config.sql_bundle {
            Some(path) => SqlBundle::from_file(path)?,
            None => SqlBundle::builtin()?,
        };
        Self::with_connection(
            &config.path.display().to_string(),
            conn,
            sql,
            &config.default_script,
            engine,
            sink,
        )
    }

    /// A private in-memory database with the built-in statements.
    pub fn open_in_memory(engine: Arc<dyn ScriptEngine>, sink: SharedSink) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage)?;
        let defaults = StoreConfig::default();
        Self::with_connection(":memory:", conn, SqlBundle::builtin()?, &defaults.default_script, engine, sink)
    }

    pub fn with_connection(
        label: &str,
        conn: Connection,
        sql: SqlBundle,
        default_script: &str,
        engine: Arc<dyn ScriptEngine>,
        sink: SharedSink,
    ) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT).map_err(storage)?;
        for key in BOOTSTRAP {
            conn.execute_batch(sql.get(key)).map_err(storage)?;
        }

        let (tx, rx) = mpsc::channel();
        let worker = Worker::new(label.to_string(), conn, sql, Arc::clone(&sink));
        let thread = thread::Builder::new()
            .name(format!("gatelog-store:{}", label))
            .spawn(move || worker.run(rx))?;

        info!(store = %label, "condition store opened");
        Ok(Self {
            shared: Arc::new(Shared {
                label: label.to_string(),
                jobs: Mutex::new(Some(tx)),
                handles: Mutex::new(HashMap::new()),
                default_script: default_script.to_string(),
                sink,
            }),
            engine,
            worker: Mutex::new(Some(thread)),
        })
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }

    /// A condition backed by the row `name`, inserting the default script
    /// first if the row does not exist.
    pub fn create(&self, name: &str) -> Result<Condition> {
        let handle: Arc<dyn ScriptHandle> = self.handle(name)?;
        let script = self.shared.default_script.clone();
        let key = name.to_string();
        self.shared.request(|reply| Job::Ensure { name: key, script, reply })?;
        Ok(ScriptCondition::new(handle, Arc::clone(&self.engine)).into_condition())
    }

    /// The live handle for `name`; one per name for as long as it is in use.
    pub fn handle(&self, name: &str) -> Result<Arc<StoreScriptHandle>> {
        if self.is_closed() {
            return Err(self.shared.closed());
        }
        let mut handles = lock(&self.shared.handles);
        if let Some(existing) = handles.get(name).and_then(Weak::upgrade) {
            if !existing.is_closed() {
                return Ok(existing);
            }
        }
        handles.retain(|_, h| h.strong_count() > 0);

        let handle = StoreScriptHandle::new(name, Arc::clone(&self.shared));
        handles.insert(name.to_string(), Arc::downgrade(&handle));
        Ok(handle)
    }

    /// Insert or replace the row `name`. Handles pick the change up through
    /// their staleness check.
    pub fn put(&self, name: &str, description: &str, script: &str) -> Result<()> {
        let (name, description, script) = (name.to_string(), description.to_string(), script.to_string());
        self.shared.request(|reply| Job::Put { name, description, script, reply })
    }

    /// The row `name`. Administrative reads (this and [`list`](Self::list))
    /// leave `touched_at` alone; only handle loads refresh it.
    pub fn get(&self, name: &str) -> Result<Option<ConditionEntry>> {
        let name = name.to_string();
        self.shared.request(|reply| Job::Get { name, reply })
    }

    /// Every row, ordered by name.
    pub fn list(&self) -> Result<Vec<ConditionEntry>> {
        self.shared.request(|reply| Job::List { reply })
    }

    /// Delete the row `name`; `false` if there was none. A live handle for it
    /// recreates the row from the default script on its next reload.
    pub fn remove(&self, name: &str) -> Result<bool> {
        let name = name.to_string();
        self.shared.request(|reply| Job::Remove { name, reply })
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.shared.jobs).is_none()
    }

    /// Stop accepting work, let the worker refuse what is queued, and wait for
    /// it to release the connection. Safe to call more than once.
    pub fn close(&self) {
        if !self.shared.shutdown() {
            return;
        }
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                warn!(store = %self.shared.label, "store worker panicked");
            }
        }
    }
}

impl Drop for ConditionStore {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ConditionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionStore")
            .field("label", &self.shared.label)
            .field("closed", &self.is_closed())
            .finish()
    }
}
