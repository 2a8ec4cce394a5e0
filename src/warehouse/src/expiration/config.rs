use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Reference instant an expiration is computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BaseDate {
    #[default]
    CreationTime,
    LastModifiedTime,
    /// The date encoded in the table id's `YYYYMMDD` suffix.
    TableSuffix,
}

impl FromStr for BaseDate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "creationtime" | "creation-time" | "creation_time" => Ok(BaseDate::CreationTime),
            "lastmodifiedtime" | "last-modified-time" | "last_modified_time" => {
                Ok(BaseDate::LastModifiedTime)
            }
            "tablesuffix" | "table-suffix" | "table_suffix" => Ok(BaseDate::TableSuffix),
            other => Err(format!(
                "unknown base date '{other}', expected creation-time, last-modified-time or table-suffix"
            )),
        }
    }
}

impl fmt::Display for BaseDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BaseDate::CreationTime => f.write_str("creation-time"),
            BaseDate::LastModifiedTime => f.write_str("last-modified-time"),
            BaseDate::TableSuffix => f.write_str("table-suffix"),
        }
    }
}

/// Expiration to apply: a duration after the base date, or never.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpirationValue {
    After(Duration),
    Never,
}

impl FromStr for ExpirationValue {
    type Err = String;

    /// Accepts `never` or a humantime duration such as `720h` or `30days`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("never") {
            return Ok(ExpirationValue::Never);
        }
        humantime::parse_duration(s)
            .map(ExpirationValue::After)
            .map_err(|e| format!("invalid expiration '{s}': {e} (use e.g. 720h or 'never')"))
    }
}

impl fmt::Display for ExpirationValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpirationValue::After(duration) => {
                write!(f, "{}", humantime::format_duration(*duration))
            }
            ExpirationValue::Never => f.write_str("never"),
        }
    }
}

/// How the expiration of a single table is decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpirationPolicy {
    /// Replace an expiration the table already has.
    pub overwrite_existing: bool,
    pub dry_run: bool,
    pub base_date: BaseDate,
    pub expiration: ExpirationValue,
}

/// Options of a dataset-wide propagation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropagationOptions {
    pub overwrite_existing: bool,
    pub dry_run: bool,
    pub base_date: BaseDate,
    /// `None` uses the dataset's default table expiration.
    pub expiration: Option<ExpirationValue>,
    /// Only tables whose id starts with this prefix are considered.
    pub table_prefix: Option<String>,
}

impl PropagationOptions {
    pub fn policy(&self, expiration: ExpirationValue) -> ExpirationPolicy {
        ExpirationPolicy {
            overwrite_existing: self.overwrite_existing,
            dry_run: self.dry_run,
            base_date: self.base_date,
            expiration,
        }
    }

    pub(crate) fn matches_prefix(&self, table_id: &str) -> bool {
        match self.table_prefix.as_deref() {
            None | Some("") => true,
            Some(prefix) => table_id.starts_with(prefix),
        }
    }
}
