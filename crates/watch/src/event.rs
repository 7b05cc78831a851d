use std::fmt;
use std::path::{Path, PathBuf};

/// What happened to a watched path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchEventKind {
    Create,
    Modify,
    Delete,
    /// The OS dropped events; any file under the watch roots may have changed.
    Overflow,
}

impl fmt::Display for WatchEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WatchEventKind::Create => "CREATE",
            WatchEventKind::Modify => "MODIFY",
            WatchEventKind::Delete => "DELETE",
            WatchEventKind::Overflow => "OVERFLOW",
        })
    }
}

/// A settled change notification delivered to a watch consumer.
///
/// `path` is absolute (rooted at the canonicalized watch root) for every kind
/// except [`WatchEventKind::Overflow`], which carries no path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileWatchEvent {
    pub path: Option<PathBuf>,
    pub kind: WatchEventKind,
}

impl FileWatchEvent {
    pub fn new(path: PathBuf, kind: WatchEventKind) -> Self {
        Self {
            path: Some(path),
            kind,
        }
    }

    pub fn overflow() -> Self {
        Self {
            path: None,
            kind: WatchEventKind::Overflow,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_overflow(&self) -> bool {
        self.kind == WatchEventKind::Overflow
    }
}
