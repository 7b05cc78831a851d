//! Read-only structured view of the fields a condition evaluates against.

use std::sync::{Arc, OnceLock};

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::field::Field;
use crate::path::descend;

/// Per-call view of structured fields.
///
/// Holds the logger's fields (bound once when the logger was built and shared
/// across calls) and the argument fields of this particular statement. Derived
/// views are computed lazily and at most once per context, so several
/// combinator branches inspecting the same context pay for them only once.
///
/// When both halves define the same name, the argument field wins for
/// [`find`](Self::find), [`find_value`](Self::find_value) and
/// [`as_value`](Self::as_value). [`fields`](Self::fields) keeps both, logger
/// fields first.
#[derive(Debug)]
pub struct LoggingContext {
    logger_fields: Arc<[Field]>,
    argument_fields: Vec<Field>,
    fields: OnceLock<Vec<Field>>,
    merged: OnceLock<Value>,
    logger_value: OnceLock<Value>,
    argument_value: OnceLock<Value>,
}

impl LoggingContext {
    pub fn new(logger_fields: impl Into<Arc<[Field]>>, argument_fields: Vec<Field>) -> Self {
        Self {
            logger_fields: logger_fields.into(),
            argument_fields,
            fields: OnceLock::new(),
            merged: OnceLock::new(),
            logger_value: OnceLock::new(),
            argument_value: OnceLock::new(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    pub fn builder() -> LoggingContextBuilder {
        LoggingContextBuilder::default()
    }

    /// A fresh context for another call on the same logger.
    pub fn with_arguments(&self, argument_fields: Vec<Field>) -> Self {
        Self::new(Arc::clone(&self.logger_fields), argument_fields)
    }

    pub fn logger_fields(&self) -> &[Field] {
        &self.logger_fields
    }

    pub fn argument_fields(&self) -> &[Field] {
        &self.argument_fields
    }

    /// Logger fields followed by argument fields.
    pub fn fields(&self) -> &[Field] {
        self.fields.get_or_init(|| {
            self.logger_fields
                .iter()
                .chain(self.argument_fields.iter())
                .cloned()
                .collect()
        })
    }

    /// All fields as one JSON object; argument fields override logger fields.
    pub fn as_value(&self) -> &Value {
        self.merged
            .get_or_init(|| to_object(self.logger_fields.iter().chain(self.argument_fields.iter())))
    }

    pub fn logger_value(&self) -> &Value {
        self.logger_value
            .get_or_init(|| to_object(self.logger_fields.iter()))
    }

    pub fn argument_value(&self) -> &Value {
        self.argument_value
            .get_or_init(|| to_object(self.argument_fields.iter()))
    }

    /// Raw value at `path`, or `None` if the path does not resolve.
    pub fn find_value(&self, path: &str) -> Option<&Value> {
        descend(self.as_value(), path)
    }

    /// Value at `path` deserialized as `T`.
    ///
    /// Returns `None` when the path does not resolve or the value is not a `T`.
    pub fn find<T: DeserializeOwned>(&self, path: &str) -> Option<T> {
        let value = self.find_value(path)?;
        serde_json::from_value(value.clone()).ok()
    }
}

fn to_object<'a>(fields: impl Iterator<Item = &'a Field>) -> Value {
    let mut map = Map::new();
    for field in fields {
        map.insert(field.name.clone(), field.value.clone());
    }
    Value::Object(map)
}

/// Incremental construction of a [`LoggingContext`].
#[derive(Debug, Default)]
pub struct LoggingContextBuilder {
    logger_fields: Vec<Field>,
    argument_fields: Vec<Field>,
}

impl LoggingContextBuilder {
    pub fn logger_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.logger_fields.push(Field::new(name, value));
        self
    }

    pub fn argument(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.argument_fields.push(Field::new(name, value));
        self
    }

    pub fn build(self) -> LoggingContext {
        LoggingContext::new(self.logger_fields, self.argument_fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> LoggingContext {
        LoggingContext::builder()
            .logger_field("service", "billing")
            .logger_field("foo", "from-logger")
            .argument("foo", "bar")
            .argument("user", json!({"id": 42, "roles": ["admin", "ops"]}))
            .build()
    }

    #[test]
    fn fields_keep_logger_then_argument_order() {
        let ctx = ctx();
        let names: Vec<&str> = ctx.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["service", "foo", "foo", "user"]);
        assert_eq!(ctx.logger_fields().len(), 2);
        assert_eq!(ctx.argument_fields().len(), 2);
    }

    #[test]
    fn argument_fields_win_on_name_clash() {
        let ctx = ctx();
        assert_eq!(ctx.find::<String>("foo").as_deref(), Some("bar"));
        assert_eq!(ctx.logger_value()["foo"], json!("from-logger"));
        assert_eq!(ctx.argument_value()["foo"], json!("bar"));
    }

    #[test]
    fn find_descends_and_checks_type() {
        let ctx = ctx();
        assert_eq!(ctx.find::<u64>("user.id"), Some(42));
        assert_eq!(ctx.find::<String>("user.roles[1]").as_deref(), Some("ops"));
        assert_eq!(ctx.find::<Vec<String>>("user.roles").map(|r| r.len()), Some(2));
        assert!(ctx.find::<String>("user.id").is_none());
        assert!(ctx.find::<String>("user.missing").is_none());
        assert!(ctx.find::<bool>("service").is_none());
    }

    #[test]
    fn derived_views_are_memoized() {
        let ctx = ctx();
        let first = ctx.as_value() as *const Value;
        let second = ctx.as_value() as *const Value;
        assert_eq!(first, second);
        let fields_a = ctx.fields().as_ptr();
        let fields_b = ctx.fields().as_ptr();
        assert_eq!(fields_a, fields_b);
    }

    #[test]
    fn with_arguments_shares_logger_fields() {
        let base = ctx();
        let next = base.with_arguments(vec![Field::new("foo", "notbar")]);
        assert_eq!(next.find::<String>("service").as_deref(), Some("billing"));
        assert_eq!(next.find::<String>("foo").as_deref(), Some("notbar"));
        assert!(next.find_value("user").is_none());
    }
}
