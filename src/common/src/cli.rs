use clap::Parser;
use std::path::PathBuf;

/// Common CLI arguments shared across all toolbox commands
#[derive(Parser, Debug, Clone, Default)]
pub struct CommonArgs {
    #[arg(long, global = true, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Enable quiet mode (minimal output)")]
    pub quiet: bool,
}

/// Utility functions for CLI operations
pub mod utils {
    use super::*;
    use crate::config::Configuration;
    use anyhow::{Context, Result};
    use tracing_subscriber::EnvFilter;

    /// Log level selected by the verbosity flags; `None` defers to `RUST_LOG`.
    pub fn log_level(args: &CommonArgs) -> Option<&'static str> {
        if args.quiet {
            Some("warn")
        } else if args.verbose {
            Some("debug")
        } else {
            None
        }
    }

    /// Initialize logging based on CLI arguments
    pub fn init_logging(args: &CommonArgs) {
        let filter = match log_level(args) {
            Some(level) => EnvFilter::new(level),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        };

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }

    /// Load configuration with optional override from CLI
    pub fn load_config(config_path: Option<&PathBuf>) -> Result<Configuration> {
        let config = match config_path {
            Some(path) => {
                tracing::info!("Loading configuration from: {}", path.display());
                Configuration::load_from_path(path).context("Failed to load configuration")?
            }
            None => Configuration::load().context("Failed to load configuration")?,
        };

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// Render the effective configuration, hiding the access token.
    pub fn display_config(config: &Configuration) -> Result<String> {
        let mut redacted = config.clone();
        if redacted.warehouse.access_token.is_some() {
            redacted.warehouse.access_token = Some("<redacted>".to_string());
        }
        serde_json::to_string_pretty(&redacted)
            .context("Failed to serialize configuration to JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;

    #[test]
    fn test_log_level_flags() {
        let quiet = CommonArgs {
            quiet: true,
            verbose: true,
            ..Default::default()
        };
        assert_eq!(utils::log_level(&quiet), Some("warn"), "quiet wins");

        let verbose = CommonArgs {
            verbose: true,
            ..Default::default()
        };
        assert_eq!(utils::log_level(&verbose), Some("debug"));

        assert_eq!(utils::log_level(&CommonArgs::default()), None);
    }

    #[test]
    fn test_display_config_redacts_token() {
        let mut config = Configuration::default();
        config.warehouse.access_token = Some("ya29.secret".to_string());

        let rendered = utils::display_config(&config).unwrap();
        assert!(!rendered.contains("ya29.secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
