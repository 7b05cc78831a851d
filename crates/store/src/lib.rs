//! Relational (SQLite) script store for conditions.
//!
//! Each named condition is one row `{name, description, script, created_at,
//! touched_at, edited_at}`. Reading a row through a handle bumps `touched_at`;
//! edits bump both timestamps through a trigger. A store-backed handle compares
//! the row's `edited_at` with the value it last loaded on a single background
//! worker, so the logging thread never waits on the database to learn about an
//! edit, and reads from other connections never cause a reload.

mod entry;
mod handle;
pub mod sql;
mod store;
mod worker;

pub use entry::ConditionEntry;
pub use handle::StoreScriptHandle;
pub use sql::SqlBundle;
pub use store::ConditionStore;

/// Current time as microseconds since the Unix epoch, the unit of every
/// timestamp column.
pub(crate) fn now_micros() -> i64 {
    chrono::Utc::now().timestamp_micros()
}
