//! Named SQL statements loaded from a resource bundle.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use gatelog_core::{GateError, Result};

const BUILTIN: &str = include_str!("../sql/sqlite.sql");
const MARKER: &str = "-- name:";

/// Schema bootstrap, run once in this order when a store opens.
pub const BOOTSTRAP: [&str; 3] = ["create", "index", "trigger"];

/// Every key a bundle must define.
pub const REQUIRED: [&str; 10] = [
    "create",
    "index",
    "trigger",
    "touched_check",
    "select",
    "insert",
    "upsert",
    "get",
    "list",
    "delete",
];

/// SQL statements keyed by name.
///
/// A bundle is plain SQL where each statement is introduced by a
/// `-- name: <key>` line. Other comment lines and blank lines are kept as
/// part of the statement text they fall in; text before the first marker is
/// ignored.
#[derive(Debug, Clone)]
pub struct SqlBundle {
    statements: HashMap<String, String>,
}

impl SqlBundle {
    /// The SQLite bundle shipped with this crate.
    pub fn builtin() -> Result<Self> {
        Self::parse(BUILTIN)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut statements = HashMap::new();
        let mut current: Option<(String, String)> = None;

        for line in text.lines() {
            if let Some(key) = line.trim().strip_prefix(MARKER) {
                if let Some((key, body)) = current.take() {
                    statements.insert(key, body.trim().to_string());
                }
                current = Some((key.trim().to_string(), String::new()));
            } else if let Some((_, body)) = current.as_mut() {
                body.push_str(line);
                body.push('\n');
            }
        }
        if let Some((key, body)) = current {
            statements.insert(key, body.trim().to_string());
        }

        let missing: Vec<&str> = REQUIRED
            .iter()
            .copied()
            .filter(|key| statements.get(*key).map_or(true, |s: &String| s.is_empty()))
            .collect();
        if !missing.is_empty() {
            return Err(GateError::Config(format!(
                "SQL bundle is missing statements: {}",
                missing.join(", ")
            )));
        }

        Ok(Self { statements })
    }

    /// Statement text for `key`. Required keys are always present.
    pub fn get(&self, key: &str) -> &str {
        self.statements.get(key).map(String::as_str).unwrap_or_default()
    }
}
