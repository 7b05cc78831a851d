use chrono::{DateTime, Utc};
use serde::Serialize;

/// One stored condition row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConditionEntry {
    pub name: String,
    pub description: String,
    pub script: String,
    pub created_at: DateTime<Utc>,
    /// Advanced by every handle load and every edit.
    pub touched_at: DateTime<Utc>,
    /// Advanced by edits only.
    pub edited_at: DateTime<Utc>,
}

impl ConditionEntry {
    /// Columns `name, description, script, created_at, touched_at, edited_at`, in order.
    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            name: row.get(0)?,
            description: row.get(1)?,
            script: row.get(2)?,
            created_at: from_micros(row.get(3)?),
            touched_at: from_micros(row.get(4)?),
            edited_at: from_micros(row.get(5)?),
        })
    }
}

fn from_micros(us: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_micros(us).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn micros_round_trip_through_datetime() {
        let at = from_micros(1_700_000_000_123_456);
        assert_eq!(at.timestamp_micros(), 1_700_000_000_123_456);
    }

    #[test]
    fn out_of_range_timestamps_fall_back_to_epoch() {
        assert_eq!(from_micros(i64::MAX), DateTime::<Utc>::default());
    }
}
