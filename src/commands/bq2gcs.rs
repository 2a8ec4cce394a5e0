use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;

use common::config::Configuration;
use warehouse::DatasetRef;
use warehouse::catalog::{Compression, DestinationFormat};
use warehouse::export::{
    ExportDestination, ExportLimits, ExportOptions, ExportRequest, ShardedTableExporter,
    ShardedTableTarget,
};

use super::rest_catalog;

#[derive(Args, Debug)]
pub struct Bq2GcsArgs {
    /// Dataset holding the sharded tables
    #[arg(long)]
    dataset: String,

    /// Destination starting with gs://; {{TABLE_ID}} is replaced with the table id
    #[arg(long, alias = "gcs_uri")]
    gcs_uri: String,

    /// Export only tables whose id starts with this prefix
    #[arg(long, alias = "table_prefix", default_value = "")]
    table_prefix: String,

    /// Export only shards at least this many days old; 0 with no prefix exports every table
    #[arg(long, alias = "expiration_day", default_value_t = 0)]
    expiration_day: u32,

    /// CSV, NEWLINE_DELIMITED_JSON, AVRO or PARQUET
    #[arg(long, alias = "destination_format")]
    destination_format: Option<DestinationFormat>,

    /// NONE, GZIP, DEFLATE, SNAPPY or ZSTD
    #[arg(long)]
    compression: Option<Compression>,

    /// Cap on the cumulative byte size of exported tables
    #[arg(long, alias = "limit_table_size")]
    limit_table_size: Option<u64>,

    /// Cap on the number of exported tables
    #[arg(long, alias = "limit_table_count")]
    limit_table_count: Option<u64>,

    /// Processing location of the export jobs
    #[arg(long)]
    location: Option<String>,

    /// Wait for each export job to finish before starting the next
    #[arg(long)]
    wait: bool,

    #[arg(long, alias = "dryrun")]
    dry_run: bool,
}

impl Bq2GcsArgs {
    pub async fn run(self, project: &str, config: &Configuration) -> Result<()> {
        let mut config = config.clone();
        if let Some(location) = self.location {
            config.warehouse.location = Some(location);
        }
        let catalog = rest_catalog(&config)?;

        let mut destination = ExportDestination::from_config(self.gcs_uri, &config.export)
            .context("Invalid export destination")?;
        if let Some(format) = self.destination_format {
            destination.format = format;
        }
        if let Some(compression) = self.compression {
            destination.compression = compression;
        }

        let limits = ExportLimits::new(
            self.limit_table_size
                .unwrap_or(config.export.max_table_bytes),
            self.limit_table_count
                .unwrap_or(config.export.max_table_count),
        );

        let request = ExportRequest {
            dataset: DatasetRef::new(project, self.dataset),
            target: ShardedTableTarget::new(self.table_prefix, self.expiration_day),
            destination,
            limits,
            options: ExportOptions {
                dry_run: self.dry_run,
                wait: self.wait || config.export.wait,
            },
        };

        let exporter = ShardedTableExporter::new(catalog.clone(), catalog).with_job_callback(
            Arc::new(|job_id: &str| println!("Submitted export job {job_id}")),
        );

        match exporter.export(&request).await {
            Ok(exported) => {
                println!("Exported {} table(s)", exported.len());
                Ok(())
            }
            Err(failure) => {
                println!("Exported {} table(s) before stopping", failure.exported.len());
                for table_id in &failure.exported {
                    println!("  {table_id}");
                }
                Err(failure.source).context("Export stopped")
            }
        }
    }
}
