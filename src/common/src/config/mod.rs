use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

/// Default configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "toolbox.toml";

/// Environment variable prefix; nested keys are separated by `__`.
pub const ENV_PREFIX: &str = "TOOLBOX__";

/// Default cap on the cumulative byte size of one export run (50 TiB).
pub const DEFAULT_EXPORT_MAX_TABLE_BYTES: u64 = 50 * 1024 * 1024 * 1024 * 1024;

/// Default cap on the number of tables exported in one run.
pub const DEFAULT_EXPORT_MAX_TABLE_COUNT: u64 = 100_000;

/// Connection settings for the warehouse metadata/job API.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WarehouseConfig {
    /// Base URL of the REST API, without a trailing slash.
    ///
    /// Env: TOOLBOX__WAREHOUSE__API_BASE_URL
    pub api_base_url: String,

    /// Bearer token sent with every request. Acquiring it is left to the caller
    /// (e.g. `gcloud auth print-access-token`).
    ///
    /// Env: TOOLBOX__WAREHOUSE__ACCESS_TOKEN
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    /// Processing location used when polling export jobs.
    ///
    /// Env: TOOLBOX__WAREHOUSE__LOCATION
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    /// Number of tables requested per listing page.
    ///
    /// Env: TOOLBOX__WAREHOUSE__PAGE_SIZE
    pub page_size: u32,

    /// Per-request timeout.
    ///
    /// Env: TOOLBOX__WAREHOUSE__REQUEST_TIMEOUT
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Delay between two status polls of a running export job.
    ///
    /// Env: TOOLBOX__WAREHOUSE__JOB_POLL_INTERVAL
    #[serde(with = "humantime_serde")]
    pub job_poll_interval: Duration,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            api_base_url: String::from("https://bigquery.googleapis.com/bigquery/v2"),
            access_token: None,
            location: None,
            page_size: 1000,
            request_timeout: Duration::from_secs(60),
            job_poll_interval: Duration::from_secs(5),
        }
    }
}

/// Defaults for sharded-table exports.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Maximum cumulative byte size exported by one run.
    ///
    /// Env: TOOLBOX__EXPORT__MAX_TABLE_BYTES
    pub max_table_bytes: u64,

    /// Maximum number of tables exported by one run.
    ///
    /// Env: TOOLBOX__EXPORT__MAX_TABLE_COUNT
    pub max_table_count: u64,

    /// Destination file format (CSV, NEWLINE_DELIMITED_JSON, AVRO, PARQUET).
    ///
    /// Env: TOOLBOX__EXPORT__DESTINATION_FORMAT
    pub destination_format: String,

    /// Compression applied to exported files (NONE, GZIP, DEFLATE, SNAPPY, ZSTD).
    ///
    /// Env: TOOLBOX__EXPORT__COMPRESSION
    pub compression: String,

    /// Block on every export job until it reaches a terminal state.
    ///
    /// Env: TOOLBOX__EXPORT__WAIT
    #[serde(default)]
    pub wait: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            max_table_bytes: DEFAULT_EXPORT_MAX_TABLE_BYTES,
            max_table_count: DEFAULT_EXPORT_MAX_TABLE_COUNT,
            destination_format: String::from("CSV"),
            compression: String::from("NONE"),
            wait: false,
        }
    }
}

/// Defaults for manifest-driven object deletion.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PurgeConfig {
    /// Number of concurrent delete workers. 1 means strictly sequential.
    ///
    /// Env: TOOLBOX__PURGE__WORKERS
    pub workers: usize,

    /// Number of leading manifest lines to ignore (CSV headers and the like).
    ///
    /// Env: TOOLBOX__PURGE__SKIP_HEADER_ROWS
    #[serde(default)]
    pub skip_header_rows: usize,

    /// Capacity of the work queue between the manifest reader and the workers.
    ///
    /// Env: TOOLBOX__PURGE__QUEUE_CAPACITY
    pub queue_capacity: usize,
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            skip_header_rows: 0,
            queue_capacity: 1,
        }
    }
}

/// Options forwarded to the object store builders.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to a service account key for `gs://` buckets. Falls back to the
    /// builder's environment lookup when unset.
    ///
    /// Env: TOOLBOX__STORAGE__GCS_SERVICE_ACCOUNT_PATH
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcs_service_account_path: Option<String>,

    /// Region for `s3://` buckets.
    ///
    /// Env: TOOLBOX__STORAGE__S3_REGION
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_region: Option<String>,

    /// Custom endpoint for S3-compatible stores (MinIO and friends).
    ///
    /// Env: TOOLBOX__STORAGE__S3_ENDPOINT
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_endpoint: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Configuration {
    /// Warehouse API connection
    pub warehouse: WarehouseConfig,
    /// Export run defaults
    pub export: ExportConfig,
    /// Object deletion defaults
    pub purge: PurgeConfig,
    /// Object storage builder options
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Configuration {
    /// Load defaults, then `toolbox.toml`, then `TOOLBOX__*` environment variables.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::figment(Toml::file(DEFAULT_CONFIG_FILE))
            .extract()
            .map_err(Box::new)
    }

    /// Like [`Configuration::load`] but reads the given TOML file instead.
    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        Self::figment(Toml::file(path)).extract().map_err(Box::new)
    }

    fn figment(file: figment::providers::Data<Toml>) -> Figment {
        Figment::from(Serialized::defaults(Configuration::default()))
            .merge(file)
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate the configuration.
    ///
    /// Checks:
    /// - API base URL is set
    /// - Page size, worker count and queue capacity are positive
    /// - Export limits are positive
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.warehouse.api_base_url.is_empty() {
            anyhow::bail!("warehouse.api_base_url cannot be empty");
        }

        if self.warehouse.page_size == 0 {
            anyhow::bail!(
                "warehouse.page_size must be positive, got {}",
                self.warehouse.page_size
            );
        }

        if self.export.max_table_bytes == 0 {
            anyhow::bail!("export.max_table_bytes must be positive");
        }

        if self.export.max_table_count == 0 {
            anyhow::bail!("export.max_table_count must be positive");
        }

        if self.purge.workers == 0 {
            anyhow::bail!("purge.workers must be positive, got {}", self.purge.workers);
        }

        if self.purge.queue_capacity == 0 {
            anyhow::bail!(
                "purge.queue_capacity must be positive, got {}",
                self.purge.queue_capacity
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configuration_is_valid() {
        let config = Configuration::default();
        assert!(config.validate().is_ok());

        assert_eq!(config.purge.workers, 1, "Deletion is sequential by default");
        assert_eq!(config.export.max_table_count, 100_000);
        assert_eq!(config.export.max_table_bytes, 50 * 1024u64.pow(4));
        assert_eq!(config.warehouse.page_size, 1000);
    }

    #[test]
    fn test_configless_operation() {
        let config = Figment::from(Serialized::defaults(Configuration::default()))
            .extract::<Configuration>()
            .unwrap();

        assert_eq!(
            config.warehouse.api_base_url,
            "https://bigquery.googleapis.com/bigquery/v2"
        );
        assert!(config.warehouse.access_token.is_none());
        assert_eq!(config.warehouse.request_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_zero_workers_is_invalid() {
        let mut config = Configuration::default();
        config.purge.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_page_size_is_invalid() {
        let mut config = Configuration::default();
        config.warehouse.page_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_and_env_layering() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                DEFAULT_CONFIG_FILE,
                r#"
                [warehouse]
                page_size = 50
                job_poll_interval = "2s"

                [purge]
                workers = 4
                "#,
            )?;
            jail.set_env("TOOLBOX__PURGE__WORKERS", "16");
            jail.set_env("TOOLBOX__EXPORT__WAIT", "true");

            let config = Configuration::load().map_err(|e| *e)?;

            assert_eq!(config.warehouse.page_size, 50);
            assert_eq!(config.warehouse.job_poll_interval, Duration::from_secs(2));
            assert_eq!(config.purge.workers, 16, "env overrides the file");
            assert!(config.export.wait);
            assert_eq!(config.export.destination_format, "CSV");
            Ok(())
        });
    }

    #[test]
    fn test_load_from_explicit_path() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "custom.toml",
                r#"
                [export]
                max_table_count = 2
                destination_format = "PARQUET"
                "#,
            )?;

            let config = Configuration::load_from_path(Path::new("custom.toml")).map_err(|e| *e)?;

            assert_eq!(config.export.max_table_count, 2);
            assert_eq!(config.export.destination_format, "PARQUET");
            assert_eq!(config.export.compression, "NONE");
            Ok(())
        });
    }
}
