//! Config command - print the effective configuration

use crate::commands::ConfigArgs;
use crate::error::{CliError, Result};

pub fn run(args: &ConfigArgs) -> Result<()> {
    let config = args.load()?;
    let yaml = serde_yaml::to_string(&config)
        .map_err(|e| CliError::internal(format!("failed to serialize configuration: {}", e)))?;
    print!("{}", yaml);
    Ok(())
}
