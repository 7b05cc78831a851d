//! The single background worker that owns a store's connection.
//!
//! Every database access goes through [`Job`]s on one channel, so the
//! connection and its cached statements are only ever touched from this
//! thread and need no locking of their own.

use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::Weak;

use gatelog_core::{GateError, Result, SharedSink};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::entry::ConditionEntry;
use crate::handle::StoreScriptHandle;
use crate::now_micros;
use crate::sql::SqlBundle;

pub(crate) type Reply<T> = SyncSender<Result<T>>;

pub(crate) enum Job {
    /// Insert the row with `script` unless `name` already exists.
    Ensure { name: String, script: String, reply: Reply<()> },
    /// Read (and touch) the row, creating it from `default_script` if absent.
    Load { name: String, default_script: String, reply: Reply<(String, i64)> },
    /// Compare the row's `edited_at` with what the handle last loaded.
    Check { handle: Weak<StoreScriptHandle> },
    Put { name: String, description: String, script: String, reply: Reply<()> },
    Get { name: String, reply: Reply<Option<ConditionEntry>> },
    List { reply: Reply<Vec<ConditionEntry>> },
    Remove { name: String, reply: Reply<bool> },
    Shutdown,
}

impl Job {
    /// Answer a job that will never run.
    fn refuse(self, label: &str) {
        let closed = || GateError::Closed(label.to_string());
        match self {
            Job::Ensure { reply, .. } | Job::Put { reply, .. } => {
                let _ = reply.send(Err(closed()));
            }
            Job::Load { reply, .. } => {
                let _ = reply.send(Err(closed()));
            }
            Job::Get { reply, .. } => {
                let _ = reply.send(Err(closed()));
            }
            Job::List { reply } => {
                let _ = reply.send(Err(closed()));
            }
            Job::Remove { reply, .. } => {
                let _ = reply.send(Err(closed()));
            }
            Job::Check { handle } => {
                if let Some(handle) = handle.upgrade() {
                    handle.check_finished();
                }
            }
            Job::Shutdown => {}
        }
    }
}

pub(crate) fn storage(e: rusqlite::Error) -> GateError {
    GateError::Storage(e.to_string())
}

pub(crate) struct Worker {
    label: String,
    conn: Connection,
    sql: SqlBundle,
    sink: SharedSink,
}

impl Worker {
    pub(crate) fn new(label: String, conn: Connection, sql: SqlBundle, sink: SharedSink) -> Self {
        Self { label, conn, sql, sink }
    }

    /// Serve jobs until `Shutdown` or until every sender is gone, then refuse
    /// whatever is still queued and release the connection.
    pub(crate) fn run(self, jobs: Receiver<Job>) {
        debug!(store = %self.label, "store worker started");
        while let Ok(job) = jobs.recv() {
            match job {
                Job::Shutdown => break,
                job => self.serve(job),
            }
        }

        let refused = jobs.try_iter().map(|job| job.refuse(&self.label)).count();
        if refused > 0 {
            debug!(store = %self.label, refused, "refused queued store jobs");
        }
        self.release();
    }

    fn serve(&self, job: Job) {
        match job {
            Job::Ensure { name, script, reply } => {
                let _ = reply.send(self.insert(&name, "", &script).map(|_| ()).map_err(storage));
            }
            Job::Load { name, default_script, reply } => {
                let _ = reply.send(self.load(&name, &default_script).map_err(storage));
            }
            Job::Check { handle } => self.check(handle),
            Job::Put { name, description, script, reply } => {
                let _ = reply.send(self.put(&name, &description, &script).map_err(storage));
            }
            Job::Get { name, reply } => {
                let _ = reply.send(self.get(&name).map_err(storage));
            }
            Job::List { reply } => {
                let _ = reply.send(self.list().map_err(storage));
            }
            Job::Remove { name, reply } => {
                let _ = reply.send(self.remove(&name).map_err(storage));
            }
            Job::Shutdown => {}
        }
    }

    // ── Statements ────────────────────────────────────────────

    fn insert(&self, name: &str, description: &str, script: &str) -> rusqlite::Result<usize> {
        let mut stmt = self.conn.prepare_cached(self.sql.get("insert"))?;
        stmt.execute(params![name, description, script, now_micros()])
    }

    fn select(&self, name: &str) -> rusqlite::Result<Option<(String, i64)>> {
        let mut stmt = self.conn.prepare_cached(self.sql.get("select"))?;
        stmt.query_row(params![name, now_micros()], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()
    }

    fn load(&self, name: &str, default_script: &str) -> rusqlite::Result<(String, i64)> {
        if let Some(found) = self.select(name)? {
            return Ok(found);
        }
        if self.insert(name, "", default_script)? > 0 {
            info!(store = %self.label, condition = %name, "inserted default condition");
        }
        self.select(name)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
    }

    fn edited(&self, name: &str) -> rusqlite::Result<Option<i64>> {
        let mut stmt = self.conn.prepare_cached(self.sql.get("touched_check"))?;
        stmt.query_row(params![name], |row| row.get(0)).optional()
    }

    /// Reads only advance `touched_at`, so handles on other connections
    /// reading the same row never make this one reload.
    fn check(&self, handle: Weak<StoreScriptHandle>) {
        let Some(handle) = handle.upgrade() else {
            return;
        };
        match self.edited(handle.identity_str()) {
            Ok(Some(edited)) if edited == handle.marker() => {}
            Ok(edited) => {
                debug!(
                    store = %self.label,
                    condition = %handle.identity_str(),
                    edited = ?edited,
                    loaded = handle.marker(),
                    "stored condition changed"
                );
                handle.invalidate();
            }
            Err(e) => self.sink.report(handle.identity_str(), &storage(e)),
        }
        handle.check_finished();
    }

    fn put(&self, name: &str, description: &str, script: &str) -> rusqlite::Result<()> {
        let mut stmt = self.conn.prepare_cached(self.sql.get("upsert"))?;
        stmt.execute(params![name, description, script, now_micros()])?;
        Ok(())
    }

    /// Inspection only: unlike a handle load, this does not touch the row.
    fn get(&self, name: &str) -> rusqlite::Result<Option<ConditionEntry>> {
        let mut stmt = self.conn.prepare_cached(self.sql.get("get"))?;
        stmt.query_row(params![name], ConditionEntry::from_row).optional()
    }

    fn list(&self) -> rusqlite::Result<Vec<ConditionEntry>> {
        let mut stmt = self.conn.prepare_cached(self.sql.get("list"))?;
        let rows = stmt.query_map([], ConditionEntry::from_row)?;
        rows.collect()
    }

    fn remove(&self, name: &str) -> rusqlite::Result<bool> {
        let mut stmt = self.conn.prepare_cached(self.sql.get("delete"))?;
        Ok(stmt.execute(params![name])? > 0)
    }

    // ── Shutdown ──────────────────────────────────────────────

    /// Drop the cached statements, then the connection. A failure on either
    /// is reported and does not stop the other from being released.
    fn release(self) {
        let Worker { label, conn, sink, .. } = self;
        conn.flush_prepared_statement_cache();
        match conn.close() {
            Ok(()) => info!(store = %label, "condition store closed"),
            Err((_conn, e)) => sink.report(&label, &storage(e)),
        }
    }
}
