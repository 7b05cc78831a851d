use std::sync::Arc;

use gatelog_core::{tracing_sink, GateError, Result, SharedSink};

use super::ScriptHandle;

/// Script text supplied directly; it never changes, so it is never invalid.
pub struct InlineScript {
    name: String,
    text: Arc<str>,
    sink: SharedSink,
}

impl InlineScript {
    pub fn new(name: impl Into<String>, text: impl Into<Arc<str>>) -> Self {
        Self::with_sink(name, text, tracing_sink())
    }

    pub fn with_sink(name: impl Into<String>, text: impl Into<Arc<str>>, sink: SharedSink) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
            sink,
        }
    }
}

impl ScriptHandle for InlineScript {
    fn identity(&self) -> &str {
        &self.name
    }

    fn current_text(&self) -> Result<Arc<str>> {
        Ok(Arc::clone(&self.text))
    }

    fn is_invalid(&self) -> bool {
        false
    }

    fn on_error(&self, error: &GateError) {
        self.sink.report(&self.name, error);
    }

    fn close(&self) {}
}
