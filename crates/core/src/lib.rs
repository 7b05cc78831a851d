//! Shared types for the gatelog condition engine: levels, structured fields,
//! the per-call [`LoggingContext`], errors, the error sink, and configuration.

pub mod config;
pub mod context;
pub mod error;
pub mod field;
pub mod level;
mod path;
pub mod sink;

pub use config::{GateConfig, StoreConfig, WatchConfig};
pub use context::{LoggingContext, LoggingContextBuilder};
pub use error::{GateError, Result};
pub use field::Field;
pub use level::Level;
pub use sink::{tracing_sink, ErrorSink, SharedSink, TracingSink};
