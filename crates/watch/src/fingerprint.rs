//! Content fingerprints used to decide what a burst of raw events amounts to.

use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::event::WatchEventKind;

type Fingerprint = [u8; 32];

/// Known paths under the watch roots and, when hashing is on, their content hash.
///
/// A path is "known" once it has been seen to exist; directories and
/// unhashed files are known with no fingerprint.
#[derive(Debug)]
pub(crate) struct Fingerprints {
    hash_contents: bool,
    known: HashMap<PathBuf, Option<Fingerprint>>,
}

impl Fingerprints {
    pub(crate) fn new(hash_contents: bool) -> Self {
        Self {
            hash_contents,
            known: HashMap::new(),
        }
    }

    /// Forget everything and record the current state of every root.
    pub(crate) fn rescan(&mut self, roots: &[PathBuf]) {
        self.known.clear();
        for root in roots {
            for entry in WalkDir::new(root) {
                match entry {
                    Ok(entry) => {
                        let path = entry.path().to_path_buf();
                        let print = self.fingerprint(&path);
                        self.known.insert(path, print);
                    }
                    Err(e) => warn!(root = %root.display(), error = %e, "failed to scan watch root"),
                }
            }
        }
        debug!(paths = self.known.len(), "fingerprinted watch roots");
    }

    /// Classify the change to `path` by comparing what is on disk now with what
    /// was last recorded. Returns `None` when nothing observable changed.
    pub(crate) fn settle(&mut self, path: &Path) -> Option<WatchEventKind> {
        let exists = path.symlink_metadata().is_ok();
        match (self.known.contains_key(path), exists) {
            (false, false) => None,
            (true, false) => {
                self.known.remove(path);
                Some(WatchEventKind::Delete)
            }
            (false, true) => {
                let print = self.fingerprint(path);
                self.known.insert(path.to_path_buf(), print);
                Some(WatchEventKind::Create)
            }
            (true, true) => {
                if path.is_dir() {
                    return None;
                }
                if !self.hash_contents {
                    return Some(WatchEventKind::Modify);
                }
                let next = self.fingerprint(path);
                let previous = self.known.insert(path.to_path_buf(), next).flatten();
                if next.is_some() && previous == next {
                    debug!(path = %path.display(), "content unchanged, suppressing modify");
                    None
                } else {
                    Some(WatchEventKind::Modify)
                }
            }
        }
    }

    fn fingerprint(&self, path: &Path) -> Option<Fingerprint> {
        if !self.hash_contents || !path.is_file() {
            return None;
        }
        match hash_file(path) {
            Ok(print) => Some(print),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "failed to hash file");
                None
            }
        }
    }
}

fn hash_file(path: &Path) -> io::Result<Fingerprint> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().into())
}
