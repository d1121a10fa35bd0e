//! Run command - start the controller

use btp_manager_kube::run_controller;
use kube::Client;

use crate::commands::ConfigArgs;
use crate::error::{CliError, Result};

pub async fn run(args: &ConfigArgs) -> Result<()> {
    let config = args.load()?;
    if !config.chart_path.is_dir() {
        return Err(CliError::config_with_help(
            format!("chart directory {} does not exist", config.chart_path.display()),
            "set --chart-path or chartPath in the configuration file",
        ));
    }

    let client = Client::try_default().await.map_err(|e| {
        CliError::cluster_with_help(
            e.to_string(),
            "check KUBECONFIG or the in-cluster service account",
        )
    })?;

    tracing::info!(
        namespace = %config.chart_namespace,
        secret = %config.secret_name,
        chart = %config.chart_path.display(),
        "configuration loaded"
    );

    run_controller(client, config).await?;
    Ok(())
}
