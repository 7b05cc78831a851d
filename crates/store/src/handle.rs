use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use gatelog_core::{GateError, Result};
use gatelog_condition::{ScriptHandle, ScriptState};
use tracing::debug;

use crate::store::Shared;
use crate::worker::Job;

/// A script handle bound to one row of a [`ConditionStore`](crate::ConditionStore).
///
/// [`is_invalid`](ScriptHandle::is_invalid) answers from the cached flag and
/// queues at most one background staleness check at a time; the check sets
/// the flag when the row's `edited_at` differs from what this handle loaded.
pub struct StoreScriptHandle {
    name: String,
    state: ScriptState,
    /// A staleness check is queued or running.
    pending: AtomicBool,
    closed: AtomicBool,
    shared: Arc<Shared>,
    me: Weak<StoreScriptHandle>,
}

impl StoreScriptHandle {
    pub(crate) fn new(name: &str, shared: Arc<Shared>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            name: name.to_string(),
            state: ScriptState::new(),
            pending: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            shared,
            me: me.clone(),
        })
    }

    /// `edited_at` of the row as of the last successful load.
    pub fn marker(&self) -> i64 {
        self.state.marker()
    }

    pub fn invalidate(&self) {
        self.state.invalidate();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn identity_str(&self) -> &str {
        &self.name
    }

    pub(crate) fn check_finished(&self) {
        self.pending.store(false, Ordering::Release);
    }

    fn schedule_check(&self) {
        if self.is_closed() || !self.state.is_loaded() {
            return;
        }
        if self.pending.swap(true, Ordering::AcqRel) {
            return;
        }
        let job = Job::Check { handle: self.me.clone() };
        if self.shared.submit(job).is_err() {
            self.check_finished();
        }
    }

    fn load(&self) -> Result<(String, i64)> {
        let name = self.name.clone();
        let default_script = self.shared.default_script().to_string();
        self.shared.request(|reply| Job::Load { name, default_script, reply })
    }
}

impl ScriptHandle for StoreScriptHandle {
    fn identity(&self) -> &str {
        &self.name
    }

    fn current_text(&self) -> Result<Arc<str>> {
        if self.is_closed() {
            return Err(GateError::Closed(format!("condition '{}'", self.name)));
        }
        self.state.current_or_refresh(|| self.load())
    }

    fn is_invalid(&self) -> bool {
        let invalid = self.state.is_invalid();
        if !invalid {
            self.schedule_check();
        }
        invalid
    }

    fn version(&self) -> u64 {
        self.state.version()
    }

    fn on_error(&self, error: &GateError) {
        self.shared.sink().report(&self.name, error);
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.forget(&self.name, &self.me);
        debug!(condition = %self.name, "store handle closed");
    }
}
