//! Cross-platform recursive file change notification.
//!
//! - [`FileWatchService`]: the plug point; [`NotifyWatchService`] is the
//!   `notify`-backed implementation
//! - [`WatchProvider`]: one-time choice between the native OS mechanism and
//!   polling
//! - Raw OS events are debounced per path and checked against a SHA-256
//!   content fingerprint, so touches that do not change a file stay silent

mod event;
mod fingerprint;
mod pipeline;
mod provider;
mod service;

pub use event::{FileWatchEvent, WatchEventKind};
pub use provider::{service_from_config, WatchProvider};
pub use service::{EventConsumer, FileWatchService, FileWatcher, NotifyWatchService, WatchOptions};
