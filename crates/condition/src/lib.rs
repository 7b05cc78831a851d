//! Conditions that gate log statements, and the script machinery behind them.
//!
//! - [`Condition`]: `(Level, LoggingContext) -> bool` with lazy `and`/`or`/`negate`
//! - [`ScriptHandle`]: a named source of script text with an invalidity flag
//! - [`ScriptCondition`]: compiles a handle's text through a [`ScriptEngine`],
//!   recompiling only when the handle is invalid, and never lets a failure
//!   escape to the logging call site

mod compiled;
mod condition;
pub mod engine;
pub mod script;

pub use compiled::ScriptCondition;
pub use condition::Condition;
pub use engine::{CompiledScript, ExpressionEngine, ScriptEngine};
pub use script::{FileScriptHandle, FileScripts, InlineScript, ScriptHandle, ScriptState};

use std::sync::Arc;

/// A condition compiled from fixed script text.
pub fn inline(name: &str, script: &str, engine: Arc<dyn ScriptEngine>, sink: gatelog_core::SharedSink) -> Condition {
    let handle: Arc<dyn ScriptHandle> = Arc::new(InlineScript::with_sink(name, script, sink));
    ScriptCondition::new(handle, engine).into_condition()
}
