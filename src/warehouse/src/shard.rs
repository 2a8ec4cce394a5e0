//! Date-sharded table naming: `<prefix>YYYYMMDD`.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use thiserror::Error;

/// Length of the `YYYYMMDD` suffix.
pub const DATE_SUFFIX_LEN: usize = 8;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DateSuffixError {
    #[error("table '{table_id}' is too short to carry a YYYYMMDD date suffix")]
    TooShort { table_id: String },

    #[error("table '{table_id}' has suffix '{suffix}', which is not a YYYYMMDD date")]
    NotADate { table_id: String, suffix: String },
}

/// Midnight UTC of the date encoded in the last 8 characters of `table_id`.
pub fn parse_date_suffix(table_id: &str) -> Result<DateTime<Utc>, DateSuffixError> {
    let start = table_id
        .char_indices()
        .rev()
        .nth(DATE_SUFFIX_LEN - 1)
        .map(|(idx, _)| idx)
        .ok_or_else(|| DateSuffixError::TooShort {
            table_id: table_id.to_string(),
        })?;
    let suffix = &table_id[start..];

    let not_a_date = || DateSuffixError::NotADate {
        table_id: table_id.to_string(),
        suffix: suffix.to_string(),
    };

    // chrono accepts shorter digit runs for %Y, so require exactly 8 digits
    if !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return Err(not_a_date());
    }

    let date = NaiveDate::parse_from_str(suffix, "%Y%m%d").map_err(|_| not_a_date())?;
    Ok(date.and_time(NaiveTime::MIN).and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_valid_suffix() {
        assert_eq!(
            parse_date_suffix("events_20230101").unwrap(),
            Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            parse_date_suffix("20240229").unwrap(),
            Utc.with_ymd_and_hms(2024, 2, 29, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_parse_invalid_suffix() {
        assert!(matches!(
            parse_date_suffix("events"),
            Err(DateSuffixError::TooShort { .. })
        ));
        assert!(matches!(
            parse_date_suffix("events_latest"),
            Err(DateSuffixError::NotADate { .. })
        ));
        assert!(matches!(
            parse_date_suffix("events_20230230"),
            Err(DateSuffixError::NotADate { .. })
        ));
        assert!(matches!(
            parse_date_suffix("events_2023-1-1"),
            Err(DateSuffixError::NotADate { .. })
        ));
    }
}
