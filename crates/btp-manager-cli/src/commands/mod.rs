//! Subcommand implementations

pub mod config;
pub mod run;

use std::path::PathBuf;
use std::time::Duration;

use btp_manager_core::ReconcilerConfig;
use clap::Args;

use crate::error::{CliError, Result};

/// Configuration file plus command-line overrides
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// YAML configuration file
    #[arg(short, long, env = "BTP_MANAGER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the module chart
    #[arg(long, env = "BTP_MANAGER_CHART_PATH")]
    pub chart_path: Option<PathBuf>,

    /// Namespace the module is installed into
    #[arg(long)]
    pub chart_namespace: Option<String>,

    /// Deadline for the hard delete (e.g. "5m", "90s")
    #[arg(long, value_parser = humantime::parse_duration)]
    pub hard_delete_timeout: Option<Duration>,

    /// Requeue cadence for CRs in Error or still installing
    #[arg(long, value_parser = humantime::parse_duration)]
    pub requeue_interval: Option<Duration>,
}

impl ConfigArgs {
    /// Load the file (or defaults), apply overrides and validate the result
    pub fn load(&self) -> Result<ReconcilerConfig> {
        let mut config = match &self.config {
            Some(path) => ReconcilerConfig::from_file(path).map_err(|e| {
                CliError::config_with_help(
                    format!("{}: {}", path.display(), e),
                    "fields are camelCase and all optional, see `btp-manager config`",
                )
            })?,
            None => ReconcilerConfig::default(),
        };

        if let Some(path) = &self.chart_path {
            config.chart_path = path.clone();
        }
        if let Some(namespace) = &self.chart_namespace {
            config.chart_namespace = namespace.clone();
        }
        if let Some(timeout) = self.hard_delete_timeout {
            config.hard_delete_timeout = timeout;
        }
        if let Some(interval) = self.requeue_interval {
            config.requeue_interval = interval;
        }

        config.validate()?;
        Ok(config)
    }
}
