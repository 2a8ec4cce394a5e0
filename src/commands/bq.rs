use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use common::config::Configuration;
use warehouse::expiration::{
    BaseDate, ExpirationPropagator, ExpirationValue, PropagationError, PropagationFailure,
    PropagationOptions, PropagationReport, TableAction, TableOutcome,
};
use warehouse::{DatasetRef, TableJanitor};

use super::rest_catalog;

#[derive(Args, Debug, Clone)]
pub struct PolicyArgs {
    /// Replace expirations that tables already have
    #[arg(long, alias = "overwrite-table-expiration")]
    overwrite: bool,

    /// Log what would change without updating any table
    #[arg(long, alias = "dryrun")]
    dry_run: bool,

    /// Base the expiration on creation-time, last-modified-time or table-suffix
    #[arg(long, default_value_t = BaseDate::CreationTime)]
    base_date: BaseDate,
}

#[derive(Subcommand, Debug)]
pub enum BqAction {
    /// Copy the dataset's default table expiration onto each of its tables
    CopyDefaultExpirationTables {
        #[arg(long)]
        dataset: String,

        #[command(flatten)]
        policy: PolicyArgs,
    },
    /// Set the expiration of each table in a dataset
    #[command(after_help = "Example: toolbox --project hoge bq update-expiration-tables public_dataset 365d")]
    UpdateExpirationTables {
        /// Dataset id
        dataset: String,
        /// Duration such as 720h or 365d, or 'never' to clear expirations
        expiration: ExpirationValue,
        /// Only update tables whose id starts with this prefix
        #[arg(long)]
        prefix: Option<String>,

        #[command(flatten)]
        policy: PolicyArgs,
    },
    /// Delete each table whose id starts with a prefix
    DeleteTables {
        #[arg(long)]
        dataset: String,
        /// Table id prefix; required
        #[arg(long)]
        prefix: String,
        #[arg(long, alias = "dryrun")]
        dry_run: bool,
    },
}

impl BqAction {
    pub async fn run(self, project: &str, config: &Configuration) -> Result<()> {
        let catalog = rest_catalog(config)?;

        match self {
            BqAction::CopyDefaultExpirationTables { dataset, policy } => {
                let dataset = DatasetRef::new(project, dataset);
                let options = policy.options(None, None);
                let report = ExpirationPropagator::new(catalog)
                    .propagate(&dataset, &options)
                    .await
                    .map_err(print_partial)
                    .with_context(|| format!("Failed to copy default expiration in {dataset}"))?;
                print_report(&report);
            }
            BqAction::UpdateExpirationTables {
                dataset,
                expiration,
                prefix,
                policy,
            } => {
                let dataset = DatasetRef::new(project, dataset);
                let options = policy.options(Some(expiration), prefix);
                let report = ExpirationPropagator::new(catalog)
                    .propagate(&dataset, &options)
                    .await
                    .map_err(print_partial)
                    .with_context(|| format!("Failed to update expiration in {dataset}"))?;
                print_report(&report);
            }
            BqAction::DeleteTables {
                dataset,
                prefix,
                dry_run,
            } => {
                let dataset = DatasetRef::new(project, dataset);
                let deleted = TableJanitor::new(catalog)
                    .delete_tables_by_prefix(&dataset, &prefix, dry_run)
                    .await
                    .with_context(|| format!("Failed to delete tables in {dataset}"))?;
                let verb = if dry_run { "Would delete" } else { "Deleted" };
                for table_id in &deleted {
                    println!("{verb} {table_id}");
                }
                println!("{verb} {} table(s)", deleted.len());
            }
        }

        Ok(())
    }
}

impl PolicyArgs {
    fn options(
        &self,
        expiration: Option<ExpirationValue>,
        table_prefix: Option<String>,
    ) -> PropagationOptions {
        PropagationOptions {
            overwrite_existing: self.overwrite,
            dry_run: self.dry_run,
            base_date: self.base_date,
            expiration,
            table_prefix,
        }
    }
}

fn print_report(report: &PropagationReport) {
    println!("ProjectID={}", report.dataset.project_id);
    println!("DatasetID={}", report.dataset.dataset_id);
    println!("Expiration={}", report.expiration);
    println!();

    print_outcomes(&report.outcomes);

    println!();
    println!(
        "Done: {} updated, {} unchanged",
        report.applied_table_ids().len(),
        report.outcomes.len() - report.applied_table_ids().len()
    );
}

fn print_outcomes(outcomes: &[TableOutcome]) {
    for outcome in outcomes {
        let line = match &outcome.action {
            TableAction::Updated(decision) => decision.to_string(),
            TableAction::WouldUpdate(decision) => format!("[DRY-RUN] would {decision}"),
            TableAction::Skipped(reason) => format!("skipped: {reason}"),
            TableAction::NotFound => "not found".to_string(),
            TableAction::Filtered => "does not have the prefix".to_string(),
        };
        println!("{}: {line}", outcome.table_id);
    }
}

/// Print what was done before a run stopped and hand back its cause.
fn print_partial(failure: PropagationFailure) -> PropagationError {
    print_outcomes(&failure.outcomes);
    failure.source
}
