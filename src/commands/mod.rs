pub mod bq;
pub mod bq2gcs;
pub mod storage;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use common::cli::{CommonArgs, utils};
use common::config::Configuration;
use warehouse::RestCatalog;

/// Maintenance toolbox for warehouse tables and object storage
#[derive(Parser)]
#[command(name = "toolbox", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Project that owns the datasets
    #[arg(long, global = true, env = "TOOLBOX_PROJECT")]
    project: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage table expiration and table cleanup
    Bq {
        #[command(subcommand)]
        action: bq::BqAction,
    },
    /// Export expired date-sharded tables to object storage
    Bq2gcs(bq2gcs::Bq2GcsArgs),
    /// Bulk operations on object storage
    Storage {
        #[command(subcommand)]
        action: storage::StorageAction,
    },
    /// Print the effective configuration
    Config,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let config = utils::load_config(self.common.config.as_ref())?;

        match self.command {
            Commands::Bq { action } => {
                let project = require_project(self.project)?;
                action.run(&project, &config).await
            }
            Commands::Bq2gcs(args) => {
                let project = require_project(self.project)?;
                args.run(&project, &config).await
            }
            Commands::Storage { action } => action.run(&config).await,
            Commands::Config => {
                println!("{}", utils::display_config(&config)?);
                Ok(())
            }
        }
    }
}

fn require_project(project: Option<String>) -> Result<String> {
    project
        .filter(|p| !p.is_empty())
        .context("project required: pass --project or set TOOLBOX_PROJECT")
}

fn rest_catalog(config: &Configuration) -> Result<Arc<RestCatalog>> {
    Ok(Arc::new(RestCatalog::new(&config.warehouse)?))
}

/// Token cancelled on Ctrl-C.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight work");
            trigger.cancel();
        }
    });
    token
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_update_expiration_tables() {
        let cli = Cli::try_parse_from([
            "toolbox",
            "--project",
            "hoge",
            "bq",
            "update-expiration-tables",
            "public_dataset",
            "never",
            "--prefix",
            "events_",
        ])
        .unwrap();

        assert_eq!(cli.project.as_deref(), Some("hoge"));
        assert!(matches!(
            cli.command,
            Commands::Bq {
                action: bq::BqAction::UpdateExpirationTables { .. }
            }
        ));
    }

    #[test]
    fn test_parse_storage_delete() {
        let cli = Cli::try_parse_from([
            "toolbox",
            "storage",
            "delete",
            "gs://lists/today.csv",
            "--skip-header-rows",
            "1",
            "--multi",
            "8",
        ])
        .unwrap();

        match cli.command {
            Commands::Storage {
                action:
                    storage::StorageAction::Delete {
                        manifest,
                        skip_header_rows,
                        multi,
                    },
            } => {
                assert_eq!(manifest, "gs://lists/today.csv");
                assert_eq!(skip_header_rows, Some(1));
                assert_eq!(multi, Some(8));
            }
            _ => panic!("expected storage delete"),
        }
    }

    #[test]
    fn test_require_project() {
        assert!(require_project(None).is_err());
        assert!(require_project(Some(String::new())).is_err());
        assert_eq!(require_project(Some("p".to_string())).unwrap(), "p");
    }
}
