//! Pluggable script compilation.
//!
//! The default [`ExpressionEngine`] compiles minijinja expressions such as
//! `level == "error" or user.roles[0] == "admin"`. Undefined names are
//! errors, so a script referencing an absent field fails evaluation instead
//! of silently comparing against nothing.

use std::sync::{Arc, OnceLock};

use gatelog_core::{GateError, Level, LoggingContext, Result};
use minijinja::value::ValueKind;
use minijinja::{Environment, Expression, UndefinedBehavior};
use serde::Serialize;
use serde_json::Value;

/// A script compiled into an executable predicate.
pub trait CompiledScript: Send + Sync {
    fn evaluate(&self, level: Level, context: &LoggingContext) -> Result<bool>;
}

/// Turns script text into a [`CompiledScript`].
pub trait ScriptEngine: Send + Sync {
    fn compile(&self, name: &str, source: &str) -> Result<Arc<dyn CompiledScript>>;
}

static ENVIRONMENT: OnceLock<Environment<'static>> = OnceLock::new();

fn environment() -> &'static Environment<'static> {
    ENVIRONMENT.get_or_init(|| {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env
    })
}

/// Names a script can see:
///
/// - every field at top level (argument fields win on clashes)
/// - `level`: lowercase level name
/// - `fields`: the merged field object
/// - `logger` / `arguments`: each half on its own
///
/// The reserved names shadow fields of the same name at top level; such
/// fields stay reachable through `fields`.
#[derive(Serialize)]
struct Scope<'a> {
    #[serde(flatten)]
    top: &'a Value,
    level: &'static str,
    fields: &'a Value,
    logger: &'a Value,
    arguments: &'a Value,
}

impl<'a> Scope<'a> {
    fn new(level: Level, context: &'a LoggingContext) -> Self {
        Self {
            top: context.as_value(),
            level: level.as_str(),
            fields: context.as_value(),
            logger: context.logger_value(),
            arguments: context.argument_value(),
        }
    }
}

/// minijinja-backed [`ScriptEngine`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ExpressionEngine;

impl ExpressionEngine {
    pub fn shared() -> Arc<dyn ScriptEngine> {
        Arc::new(ExpressionEngine)
    }
}

impl ScriptEngine for ExpressionEngine {
    fn compile(&self, name: &str, source: &str) -> Result<Arc<dyn CompiledScript>> {
        let expression = environment()
            .compile_expression_owned(source.trim().to_string())
            .map_err(|e| GateError::Compile {
                name: name.to_string(),
                message: e.to_string(),
            })?;
        Ok(Arc::new(CompiledExpression {
            name: name.to_string(),
            expression,
        }))
    }
}

struct CompiledExpression {
    name: String,
    expression: Expression<'static, 'static>,
}

impl CompiledScript for CompiledExpression {
    fn evaluate(&self, level: Level, context: &LoggingContext) -> Result<bool> {
        let value = self
            .expression
            .eval(Scope::new(level, context))
            .map_err(|e| GateError::Evaluate {
                name: self.name.clone(),
                message: e.to_string(),
            })?;
        match value.kind() {
            ValueKind::Bool => Ok(value.is_true()),
            other => Err(GateError::NonBoolean {
                name: self.name.clone(),
                kind: format!("{:?}", other).to_lowercase(),
            }),
        }
    }
}
