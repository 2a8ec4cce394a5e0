use chrono::{DateTime, Duration, Utc};

use crate::shard::{DateSuffixError, parse_date_suffix};

/// Selects the date-sharded tables to export.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardedTableTarget {
    /// Table-id prefix shared by every shard.
    pub prefix: String,
    /// Shards are selected once their date is this many days in the past.
    pub expiration_days: u32,
}

impl ShardedTableTarget {
    pub fn new(prefix: impl Into<String>, expiration_days: u32) -> Self {
        Self {
            prefix: prefix.into(),
            expiration_days,
        }
    }

    /// Whether `table_id` is selected at `now`.
    ///
    /// An empty prefix with zero days selects everything. Otherwise the id
    /// must start with the prefix and end in a parsable date suffix.
    pub fn matches(&self, table_id: &str, now: DateTime<Utc>) -> Result<bool, DateSuffixError> {
        if self.prefix.is_empty() && self.expiration_days == 0 {
            return Ok(true);
        }
        if !table_id.starts_with(&self.prefix) {
            return Ok(false);
        }
        is_shard_expired(table_id, self.expiration_days, now)
    }
}

/// True iff the shard date plus `expiration_days` lies strictly before `now`.
pub fn is_shard_expired(
    table_id: &str,
    expiration_days: u32,
    now: DateTime<Utc>,
) -> Result<bool, DateSuffixError> {
    let shard_date = parse_date_suffix(table_id)?;
    Ok(shard_date + Duration::days(i64::from(expiration_days)) < now)
}
