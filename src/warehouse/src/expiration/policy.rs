use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::config::{BaseDate, ExpirationPolicy, ExpirationValue};
use crate::catalog::{TableKind, TableMetadata, TableUpdate, TimePartitioning};
use crate::shard::{DateSuffixError, parse_date_suffix};

/// Why a table was left untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Views, external tables and the like carry no expiration of their own.
    NotApplicableKind(TableKind),
    /// The table already expires and overwriting was not requested.
    AlreadySet(DateTime<Utc>),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NotApplicableKind(kind) => write!(f, "table kind {kind} not applicable"),
            SkipReason::AlreadySet(at) => write!(f, "expiration already set to {at}"),
        }
    }
}

/// Whole-table expiration to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableExpiration {
    At(DateTime<Utc>),
    Never,
}

impl fmt::Display for TableExpiration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableExpiration::At(at) => write!(f, "{at}"),
            TableExpiration::Never => f.write_str("never"),
        }
    }
}

/// Outcome of evaluating the policy against one table snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Skip(SkipReason),
    ApplyPartitionExpiration(ExpirationValue),
    ApplyTableExpiration(TableExpiration),
}

impl Decision {
    /// The metadata patch that carries out this decision, or why there is none.
    pub fn to_update(&self, metadata: &TableMetadata) -> Result<TableUpdate, SkipReason> {
        match self {
            Decision::Skip(reason) => Err(reason.clone()),
            Decision::ApplyTableExpiration(TableExpiration::At(at)) => {
                Ok(TableUpdate::ExpirationTime(Some(*at)))
            }
            Decision::ApplyTableExpiration(TableExpiration::Never) => {
                Ok(TableUpdate::ExpirationTime(None))
            }
            Decision::ApplyPartitionExpiration(value) => {
                let mut partitioning = metadata
                    .time_partitioning
                    .clone()
                    .unwrap_or_else(TimePartitioning::daily);
                partitioning.expiration = match value {
                    ExpirationValue::After(duration) => Some(*duration),
                    ExpirationValue::Never => None,
                };
                Ok(TableUpdate::TimePartitioning(partitioning))
            }
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Skip(reason) => write!(f, "skip ({reason})"),
            Decision::ApplyPartitionExpiration(value) => {
                write!(f, "set partition expiration to {value}")
            }
            Decision::ApplyTableExpiration(expiration) => {
                write!(f, "set table expiration to {expiration}")
            }
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExpirationError {
    #[error(transparent)]
    InvalidDateSuffix(#[from] DateSuffixError),

    #[error("expiration {expiration} after {base} overflows for table '{table_id}'")]
    Overflow {
        table_id: String,
        base: DateTime<Utc>,
        expiration: ExpirationValue,
    },
}

/// Decide what to do with one table.
///
/// Pure: the decision depends only on the snapshot and the policy. No
/// clock is taken, since every base date comes from the metadata or the
/// table id. Checks run in this order:
///
/// 1. non-regular tables are skipped
/// 2. partitioned tables get the partition expiration, regardless of any
///    existing value
/// 3. an existing expiration is kept unless overwriting is requested
/// 4. `never` clears the expiration
/// 5. otherwise the expiration is the base date plus the duration
pub fn decide(
    metadata: &TableMetadata,
    policy: &ExpirationPolicy,
) -> Result<Decision, ExpirationError> {
    if metadata.kind != TableKind::Regular {
        return Ok(Decision::Skip(SkipReason::NotApplicableKind(
            metadata.kind.clone(),
        )));
    }

    if metadata.time_partitioning.is_some() {
        return Ok(Decision::ApplyPartitionExpiration(policy.expiration));
    }

    if let Some(existing) = metadata.expiration_time {
        if !policy.overwrite_existing && policy.expiration != ExpirationValue::Never {
            return Ok(Decision::Skip(SkipReason::AlreadySet(existing)));
        }
    }

    let duration = match policy.expiration {
        ExpirationValue::Never => {
            return Ok(Decision::ApplyTableExpiration(TableExpiration::Never));
        }
        ExpirationValue::After(duration) => duration,
    };

    let base = match policy.base_date {
        BaseDate::CreationTime => metadata.creation_time,
        BaseDate::LastModifiedTime => metadata.last_modified_time,
        BaseDate::TableSuffix => parse_date_suffix(&metadata.table_id)?,
    };

    let overflow = || ExpirationError::Overflow {
        table_id: metadata.table_id.clone(),
        base,
        expiration: policy.expiration,
    };
    let delta = chrono::Duration::from_std(duration).map_err(|_| overflow())?;
    let at = base.checked_add_signed(delta).ok_or_else(overflow)?;

    Ok(Decision::ApplyTableExpiration(TableExpiration::At(at)))
}
