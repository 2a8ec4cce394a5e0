//! Test configuration builder for creating test setups quickly.

use std::time::Duration;

use crate::config::Configuration;

/// Builder for creating test configurations.
///
/// Starts from [`Configuration::default`] with a local API URL and no
/// polling delay, so nothing in a test talks to a real service or sleeps.
#[derive(Debug, Clone)]
pub struct TestConfigBuilder {
    config: Configuration,
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        let mut config = Configuration::default();
        config.warehouse.api_base_url = "http://127.0.0.1:9050/bigquery/v2".to_string();
        config.warehouse.access_token = Some("test-token".to_string());
        config.warehouse.job_poll_interval = Duration::from_millis(1);
        Self { config }
    }

    /// Set the number of concurrent delete workers.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.config.purge.workers = workers;
        self
    }

    /// Set the number of manifest header rows to skip.
    pub fn with_skip_header_rows(mut self, rows: usize) -> Self {
        self.config.purge.skip_header_rows = rows;
        self
    }

    /// Set the export byte and table-count limits.
    pub fn with_export_limits(mut self, max_table_bytes: u64, max_table_count: u64) -> Self {
        self.config.export.max_table_bytes = max_table_bytes;
        self.config.export.max_table_count = max_table_count;
        self
    }

    /// Set the listing page size.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.config.warehouse.page_size = page_size;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Configuration {
        self.config
    }
}
