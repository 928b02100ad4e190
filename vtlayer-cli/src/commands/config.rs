//! Configuration CLI commands.

use clap::Subcommand;
use vtlayer::config::{config_file_path, ConfigFile};

use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Show the configuration file path
    Path,

    /// Show the effective configuration
    Show,
}

/// Run a config subcommand.
pub fn run(command: ConfigCommands) -> Result<(), CliError> {
    match command {
        ConfigCommands::Path => {
            println!("{}", config_file_path().display());
            Ok(())
        }
        ConfigCommands::Show => run_show(),
    }
}

fn run_show() -> Result<(), CliError> {
    let path = config_file_path();
    let config = ConfigFile::load()?;

    if path.exists() {
        println!("# {}", path.display());
    } else {
        println!("# {} (not found, showing defaults)", path.display());
    }
    println!("tiles.url           = {}", config.url_template);
    println!("cache.capacity      = {}", config.cache_capacity);
    println!("store.debug         = {}", config.debug);
    println!("store.max_in_flight = {}", config.max_in_flight);
    println!("store.timeout       = {}", config.request_timeout_secs);
    println!("styles              = {} properties", config.styles.len());

    Ok(())
}
