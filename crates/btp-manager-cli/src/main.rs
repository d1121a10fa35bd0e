//! btp-manager - lifecycle controller for the SAP BTP service operator

use clap::{Parser, Subcommand};
use miette::Result;

mod commands;
mod error;
mod exit_codes;

use commands::ConfigArgs;

#[derive(Parser)]
#[command(name = "btp-manager")]
#[command(version)]
#[command(about = "Installs and tears down the SAP BTP service operator", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the controller against the current cluster
    Run {
        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Print the effective configuration as YAML
    Config {
        #[command(flatten)]
        config: ConfigArgs,
    },
}

fn init_logging(debug: bool) {
    use tracing_subscriber::EnvFilter;

    let default = if debug {
        "btp_manager=debug,btp_manager_kube=debug,info"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_logging(cli.debug);

    let result = match cli.command {
        Commands::Run { config } => commands::run::run(&config).await,
        Commands::Config { config } => commands::config::run(&config),
    };

    if let Err(e) = result {
        let code = e.exit_code();
        eprintln!("{:?}", miette::Report::new(e));
        std::process::exit(code);
    }
    Ok(())
}
