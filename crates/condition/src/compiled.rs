//! Script-backed conditions and their compiled-predicate cache.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, TryLockError};

use gatelog_core::{Level, LoggingContext};
use tracing::debug;

use crate::condition::Condition;
use crate::engine::{CompiledScript, ScriptEngine};
use crate::script::ScriptHandle;

/// A condition whose predicate is compiled from a [`ScriptHandle`]'s text.
///
/// The compiled predicate is cached and rebuilt only when the handle reports
/// itself invalid. Failures never escape [`test`](Self::test):
///
/// - source unreadable: reported; the previous predicate keeps serving, or the
///   call is `false` if there is none
/// - compile error: reported; this call is `false`, the previous predicate
///   stays cached for later calls
/// - evaluation error or non-boolean result: reported; this call is `false`
pub struct ScriptCondition {
    handle: Arc<dyn ScriptHandle>,
    engine: Arc<dyn ScriptEngine>,
    compiled: RwLock<Option<Arc<dyn CompiledScript>>>,
    /// Handle version whose text has been through the compiler.
    seen: AtomicU64,
    /// Guarded by its lock, which also serializes recompiles.
    memo: Mutex<CompileMemo>,
}

/// Which texts have already been through the compiler.
#[derive(Default)]
struct CompileMemo {
    /// Source of the cached predicate; an invalidation that yields the same
    /// text does not recompile.
    compiled_from: Option<Arc<str>>,
    /// Last text that failed to compile; it is reported once, not per call.
    rejected: Option<Arc<str>>,
}

impl ScriptCondition {
    pub fn new(handle: Arc<dyn ScriptHandle>, engine: Arc<dyn ScriptEngine>) -> Self {
        Self {
            handle,
            engine,
            compiled: RwLock::new(None),
            seen: AtomicU64::new(0),
            memo: Mutex::new(CompileMemo::default()),
        }
    }

    pub fn handle(&self) -> &Arc<dyn ScriptHandle> {
        &self.handle
    }

    /// Whether a successfully compiled predicate is cached.
    pub fn has_predicate(&self) -> bool {
        self.cached().is_some()
    }

    pub fn test(&self, level: Level, context: &LoggingContext) -> bool {
        let Some(predicate) = self.predicate() else {
            return false;
        };
        match predicate.evaluate(level, context) {
            Ok(result) => result,
            Err(e) => {
                self.handle.on_error(&e);
                false
            }
        }
    }

    pub fn into_condition(self) -> Condition {
        let this = Arc::new(self);
        Condition::from_fn(move |level, ctx| this.test(level, ctx))
    }

    fn cached(&self) -> Option<Arc<dyn CompiledScript>> {
        match self.compiled.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// The predicate to evaluate for this call, recompiling if needed.
    fn predicate(&self) -> Option<Arc<dyn CompiledScript>> {
        let current = self.cached();
        let invalid = self.handle.is_invalid();
        if current.is_some() && !invalid && self.handle.version() == self.seen.load(Ordering::Acquire) {
            return current;
        }

        // One thread recompiles; the others keep using what is cached.
        let mut memo = match self.memo.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return current,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };

        // Read before the text so a concurrent refresh is caught next call.
        let version = self.handle.version();
        let text = match self.handle.current_text() {
            Ok(text) => text,
            Err(e) => {
                self.handle.on_error(&e);
                return current;
            }
        };

        if memo.rejected.as_deref() == Some(&*text) {
            self.mark_seen(version, &text);
            return current;
        }
        // Any other text clears the rejection, so a broken edit that comes
        // back later is compiled and reported again.
        memo.rejected = None;
        if current.is_some() && memo.compiled_from.as_deref() == Some(&*text) {
            self.mark_seen(version, &text);
            return current;
        }

        match self.engine.compile(self.handle.identity(), &text) {
            Ok(compiled) => {
                debug!(condition = %self.handle.identity(), "compiled condition script");
                match self.compiled.write() {
                    Ok(mut guard) => *guard = Some(Arc::clone(&compiled)),
                    Err(poisoned) => *poisoned.into_inner() = Some(Arc::clone(&compiled)),
                }
                self.mark_seen(version, &text);
                memo.compiled_from = Some(text);
                Some(compiled)
            }
            Err(e) => {
                self.handle.on_error(&e);
                self.mark_seen(version, &text);
                memo.rejected = Some(text);
                None
            }
        }
    }

    /// Record which handle version `text` belongs to. `before` was read ahead
    /// of loading it; the first load (or a racing refresh) moves the version,
    /// and the newer one is taken only while the handle still serves `text`.
    fn mark_seen(&self, before: u64, text: &Arc<str>) {
        let after = self.handle.version();
        let seen = if after != before
            && !self.handle.is_invalid()
            && self.handle.current_text().is_ok_and(|latest| Arc::ptr_eq(&latest, text))
        {
            after
        } else {
            before
        };
        self.seen.store(seen, Ordering::Release);
    }
}

impl From<ScriptCondition> for Condition {
    fn from(condition: ScriptCondition) -> Self {
        condition.into_condition()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use gatelog_core::{GateError, Result};

    use super::*;
    use crate::engine::ExpressionEngine;
    use crate::script::ScriptState;

    /// Handle whose text and failure mode are driven by the test.
    #[derive(Default)]
    struct ScriptedHandle {
        state: ScriptState,
        text: Mutex<String>,
        unreadable: AtomicBool,
        errors: Mutex<Vec<String>>,
        reads: AtomicUsize,
        lookups: AtomicUsize,
    }

    impl ScriptedHandle {
        fn with_text(text: &str) -> Arc<Self> {
            let handle = Self::default();
            *handle.text.lock().unwrap() = text.to_string();
            Arc::new(handle)
        }

        fn set_text(&self, text: &str) {
            *self.text.lock().unwrap() = text.to_string();
            self.state.invalidate();
        }

        fn error_count(&self) -> usize {
            self.errors.lock().unwrap().len()
        }
    }

    impl ScriptHandle for ScriptedHandle {
        fn identity(&self) -> &str {
            "scripted"
        }

        fn current_text(&self) -> Result<Arc<str>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.state.current_or_refresh(|| {
                self.reads.fetch_add(1, Ordering::SeqCst);
                if self.unreadable.load(Ordering::SeqCst) {
                    return Err(GateError::Storage("unreachable".into()));
                }
                Ok((self.text.lock().unwrap().clone(), 0))
            })
        }

        fn is_invalid(&self) -> bool {
            self.state.is_invalid()
        }

        fn version(&self) -> u64 {
            self.state.version()
        }

        fn on_error(&self, error: &GateError) {
            self.errors.lock().unwrap().push(error.to_string());
        }

        fn close(&self) {}
    }

    fn condition(handle: &Arc<ScriptedHandle>) -> ScriptCondition {
        ScriptCondition::new(Arc::clone(handle) as Arc<dyn ScriptHandle>, ExpressionEngine::shared())
    }

    fn foo(value: &str) -> LoggingContext {
        LoggingContext::builder().argument("foo", value).build()
    }

    #[test]
    fn compiles_once_and_reuses_predicate() {
        let handle = ScriptedHandle::with_text(r#"foo == "bar""#);
        let cond = condition(&handle);
        assert!(cond.test(Level::Info, &foo("bar")));
        assert!(!cond.test(Level::Info, &foo("notbar")));
        assert!(cond.test(Level::Info, &foo("bar")));
        assert_eq!(handle.reads.load(Ordering::SeqCst), 1);
        assert!(cond.has_predicate());
    }

    #[test]
    fn invalidation_triggers_recompile() {
        let handle = ScriptedHandle::with_text("true");
        let cond = condition(&handle);
        assert!(cond.test(Level::Info, &foo("x")));

        handle.set_text("false");
        assert!(!cond.test(Level::Info, &foo("x")));
        assert_eq!(handle.reads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn conditions_sharing_a_handle_all_see_a_reload() {
        let handle = ScriptedHandle::with_text("true");
        let first = condition(&handle);
        let second = condition(&handle);
        assert!(first.test(Level::Info, &foo("x")));
        assert!(second.test(Level::Info, &foo("x")));

        handle.set_text("false");
        assert!(!first.test(Level::Info, &foo("x")));
        assert!(!second.test(Level::Info, &foo("x")), "second condition must not keep the old predicate");
        assert_eq!(handle.reads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn runtime_error_is_reported_once_and_yields_false() {
        let handle = ScriptedHandle::with_text(r#"missing == "x""#);
        let cond = condition(&handle);
        assert!(!cond.test(Level::Info, &foo("bar")));
        assert_eq!(handle.error_count(), 1);
    }

    #[test]
    fn failed_recompile_keeps_previous_predicate() {
        let handle = ScriptedHandle::with_text(r#"foo == "bar""#);
        let cond = condition(&handle);
        assert!(cond.test(Level::Info, &foo("bar")));

        handle.set_text("foo ==");
        assert!(!cond.test(Level::Info, &foo("bar")), "failing compile call is false");
        assert_eq!(handle.error_count(), 1);

        assert!(cond.test(Level::Info, &foo("bar")), "previous predicate serves again");
        assert_eq!(handle.error_count(), 1);
    }

    #[test]
    fn broken_edit_is_reported_again_after_a_good_one() {
        let handle = ScriptedHandle::with_text("true");
        let cond = condition(&handle);
        let ctx = foo("bar");
        assert!(cond.test(Level::Info, &ctx));

        handle.set_text("foo ==");
        assert!(!cond.test(Level::Info, &ctx));
        assert_eq!(handle.error_count(), 1);

        handle.set_text("true");
        assert!(cond.test(Level::Info, &ctx));

        handle.set_text("foo ==");
        assert!(!cond.test(Level::Info, &ctx), "the returning broken text fails this call");
        assert_eq!(handle.error_count(), 2);

        assert!(cond.test(Level::Info, &ctx), "last good predicate serves afterwards");
        assert_eq!(handle.error_count(), 2);
    }

    #[test]
    fn settled_predicate_does_not_consult_the_handle() {
        let handle = ScriptedHandle::with_text("true");
        let cond = condition(&handle);
        assert!(cond.test(Level::Info, &foo("x")));
        let lookups = handle.lookups.load(Ordering::SeqCst);

        for _ in 0..3 {
            assert!(cond.test(Level::Info, &foo("x")));
        }
        assert_eq!(handle.lookups.load(Ordering::SeqCst), lookups);

        handle.set_text("false");
        assert!(!cond.test(Level::Info, &foo("x")));
        let lookups = handle.lookups.load(Ordering::SeqCst);
        assert!(!cond.test(Level::Info, &foo("x")));
        assert_eq!(handle.lookups.load(Ordering::SeqCst), lookups);
    }

    #[test]
    fn broken_script_without_predicate_fails_closed_quietly() {
        let handle = ScriptedHandle::with_text("foo ==");
        let cond = condition(&handle);
        for _ in 0..3 {
            assert!(!cond.test(Level::Info, &foo("bar")));
        }
        assert_eq!(handle.error_count(), 1);
        assert!(!cond.has_predicate());

        handle.set_text("true");
        assert!(cond.test(Level::Info, &foo("bar")));
    }

    #[test]
    fn unreadable_source_reuses_stale_predicate() {
        let handle = ScriptedHandle::with_text("true");
        let cond = condition(&handle);
        assert!(cond.test(Level::Info, &foo("x")));

        handle.unreadable.store(true, Ordering::SeqCst);
        handle.state.invalidate();
        assert!(cond.test(Level::Info, &foo("x")));
        assert_eq!(handle.error_count(), 1);
    }

    #[test]
    fn unreadable_source_without_predicate_fails_closed() {
        let handle = ScriptedHandle::with_text("true");
        handle.unreadable.store(true, Ordering::SeqCst);
        let cond = condition(&handle);
        assert!(!cond.test(Level::Info, &foo("x")));
        assert_eq!(handle.error_count(), 1);
    }

    #[test]
    fn non_boolean_result_is_an_error() {
        let handle = ScriptedHandle::with_text("foo");
        let cond = condition(&handle);
        assert!(!cond.test(Level::Info, &foo("bar")));
        assert_eq!(handle.error_count(), 1);
    }
}
