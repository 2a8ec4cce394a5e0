use common::config::{
    DEFAULT_EXPORT_MAX_TABLE_BYTES, DEFAULT_EXPORT_MAX_TABLE_COUNT, ExportConfig,
};

use super::ExportError;
use crate::catalog::{Compression, DestinationFormat, ExtractRequest};

/// Placeholder replaced with the table id in a destination URI template.
pub const TABLE_ID_PLACEHOLDER: &str = "{{TABLE_ID}}";

/// Caps on a single export run. A zero limit means "use the default".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportLimits {
    pub max_table_bytes: u64,
    pub max_table_count: u64,
}

impl ExportLimits {
    pub fn new(max_table_bytes: u64, max_table_count: u64) -> Self {
        Self {
            max_table_bytes: if max_table_bytes == 0 {
                DEFAULT_EXPORT_MAX_TABLE_BYTES
            } else {
                max_table_bytes
            },
            max_table_count: if max_table_count == 0 {
                DEFAULT_EXPORT_MAX_TABLE_COUNT
            } else {
                max_table_count
            },
        }
    }
}

impl Default for ExportLimits {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

impl From<&ExportConfig> for ExportLimits {
    fn from(config: &ExportConfig) -> Self {
        Self::new(config.max_table_bytes, config.max_table_count)
    }
}

/// Where and how each table is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportDestination {
    /// URI template; every `{{TABLE_ID}}` is replaced with the table id.
    pub uri_template: String,
    pub format: DestinationFormat,
    pub compression: Compression,
}

impl ExportDestination {
    pub fn new(uri_template: impl Into<String>) -> Self {
        Self {
            uri_template: uri_template.into(),
            format: DestinationFormat::default(),
            compression: Compression::default(),
        }
    }

    /// Destination with format and compression taken from the configuration.
    pub fn from_config(
        uri_template: impl Into<String>,
        config: &ExportConfig,
    ) -> Result<Self, ExportError> {
        let destination = Self {
            uri_template: uri_template.into(),
            format: config
                .destination_format
                .parse()
                .map_err(ExportError::InvalidDestination)?,
            compression: config
                .compression
                .parse()
                .map_err(ExportError::InvalidDestination)?,
        };
        destination.validate()?;
        Ok(destination)
    }

    pub fn validate(&self) -> Result<(), ExportError> {
        if self.uri_template.trim().is_empty() {
            return Err(ExportError::InvalidDestination(
                "destination URI must not be empty".to_string(),
            ));
        }
        if !self.uri_template.contains(TABLE_ID_PLACEHOLDER) {
            tracing::warn!(
                uri = %self.uri_template,
                "Destination URI has no {TABLE_ID_PLACEHOLDER} placeholder, every table is written to the same location"
            );
        }
        Ok(())
    }

    pub fn uri_for(&self, table_id: &str) -> String {
        self.uri_template.replace(TABLE_ID_PLACEHOLDER, table_id)
    }

    pub fn request_for(&self, table_id: &str) -> ExtractRequest {
        ExtractRequest {
            destination_uri: self.uri_for(table_id),
            format: self.format,
            compression: self.compression,
        }
    }
}

/// Run-level switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExportOptions {
    /// Log matches without calling the metadata or export APIs.
    pub dry_run: bool,
    /// Block on each job until it reaches a terminal state.
    pub wait: bool,
}
