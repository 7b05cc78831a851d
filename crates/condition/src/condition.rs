//! The [`Condition`] value and its combinators.

use std::fmt;
use std::ops::{BitAnd, BitOr, Not};
use std::sync::Arc;

use gatelog_core::{Level, LoggingContext};
use serde_json::Value;

type Predicate = dyn Fn(Level, &LoggingContext) -> bool + Send + Sync;

/// A boolean gate evaluated once per log statement.
///
/// Conditions are cheap to clone and compose. Combinators only wire
/// predicates together; failure handling belongs to the leaves (see
/// [`ScriptCondition`](crate::ScriptCondition)).
#[derive(Clone)]
pub struct Condition {
    predicate: Arc<Predicate>,
}

impl Condition {
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(Level, &LoggingContext) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(f),
        }
    }

    pub fn always() -> Self {
        Self::from_fn(|_, _| true)
    }

    pub fn never() -> Self {
        Self::from_fn(|_, _| false)
    }

    pub fn test(&self, level: Level, context: &LoggingContext) -> bool {
        (self.predicate)(level, context)
    }

    /// Short-circuit AND: `other` runs only when `self` is true.
    pub fn and(self, other: Condition) -> Condition {
        Self::from_fn(move |level, ctx| self.test(level, ctx) && other.test(level, ctx))
    }

    /// Short-circuit OR: `other` runs only when `self` is false.
    pub fn or(self, other: Condition) -> Condition {
        Self::from_fn(move |level, ctx| self.test(level, ctx) || other.test(level, ctx))
    }

    pub fn negate(self) -> Condition {
        Self::from_fn(move |level, ctx| !self.test(level, ctx))
    }

    // ── Path-based leaves ───────────────────────────────────────────

    /// True when the value at `path` equals `expected`.
    pub fn field_equals(path: impl Into<String>, expected: impl Into<Value>) -> Condition {
        let path = path.into();
        let expected = expected.into();
        Self::from_fn(move |_, ctx| ctx.find_value(&path) == Some(&expected))
    }

    /// True when `path` resolves to any value, `null` included.
    pub fn field_exists(path: impl Into<String>) -> Condition {
        let path = path.into();
        Self::from_fn(move |_, ctx| ctx.find_value(&path).is_some())
    }

    pub fn level_at_least(min: Level) -> Condition {
        Self::from_fn(move |level, _| level >= min)
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Condition(..)")
    }
}

impl BitAnd for Condition {
    type Output = Condition;

    fn bitand(self, rhs: Condition) -> Condition {
        self.and(rhs)
    }
}

impl BitOr for Condition {
    type Output = Condition;

    fn bitor(self, rhs: Condition) -> Condition {
        self.or(rhs)
    }
}

impl Not for Condition {
    type Output = Condition;

    fn not(self) -> Condition {
        self.negate()
    }
}
