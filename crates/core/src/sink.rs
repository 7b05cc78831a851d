//! Error reporting channel for condition failures.

use std::sync::Arc;

use tracing::warn;

use crate::error::GateError;

/// Receives every failure the engine swallows on behalf of the logging call site.
///
/// `name` is the identity of the condition or script source that failed.
pub trait ErrorSink: Send + Sync {
    fn report(&self, name: &str, error: &GateError);
}

impl<F> ErrorSink for F
where
    F: Fn(&str, &GateError) + Send + Sync,
{
    fn report(&self, name: &str, error: &GateError) {
        self(name, error)
    }
}

/// Shared handle to an error sink.
pub type SharedSink = Arc<dyn ErrorSink>;

/// Default sink: logs each failure as a `warn` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn report(&self, name: &str, error: &GateError) {
        warn!(condition = %name, error = %error, "condition failure");
    }
}

/// Convenience constructor for the default sink.
pub fn tracing_sink() -> SharedSink {
    Arc::new(TracingSink)
}
