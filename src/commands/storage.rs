use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Subcommand;

use common::config::Configuration;
use common::storage::BucketStores;
use purge::{DeletionPipeline, ObjectStoreBackend, PurgeOptions};

use super::shutdown_token;

#[derive(Subcommand, Debug)]
pub enum StorageAction {
    /// Delete every object listed in a manifest object
    Delete {
        /// Manifest location, gs://bucket/path or s3://bucket/path, one object per line
        manifest: String,

        /// Leading manifest lines to ignore
        #[arg(long)]
        skip_header_rows: Option<usize>,

        /// Number of concurrent delete workers
        #[arg(long)]
        multi: Option<usize>,
    },
}

impl StorageAction {
    pub async fn run(self, config: &Configuration) -> Result<()> {
        match self {
            StorageAction::Delete {
                manifest,
                skip_header_rows,
                multi,
            } => {
                let mut options = PurgeOptions::from(&config.purge);
                if let Some(rows) = skip_header_rows {
                    options.skip_header_rows = rows;
                }
                if let Some(workers) = multi {
                    options.workers = workers;
                }

                let stores = Arc::new(BucketStores::new(config.storage.clone()));
                let backend = Arc::new(ObjectStoreBackend::new(stores));

                let summary = DeletionPipeline::new(backend, options)
                    .with_cancellation(shutdown_token())
                    .run_from_location(&manifest)
                    .await
                    .with_context(|| format!("Failed to delete objects listed in {manifest}"))?;

                println!("{summary}");
                println!("DONE");
                Ok(())
            }
        }
    }
}
