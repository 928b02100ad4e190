//! vtlayer CLI - Command-line interface
//!
//! Inspects vector tile payloads and loads tiles for a bounding box through
//! the same store an interactive map would use.

mod commands;
mod error;
mod runner;

use clap::{Parser, Subcommand};

use commands::config::ConfigCommands;
use commands::inspect::InspectArgs;
use commands::load::LoadArgs;

#[derive(Parser)]
#[command(name = "vtlayer")]
#[command(version = vtlayer::VERSION)]
#[command(about = "Vector tile store for interactive maps", long_about = None)]
struct Cli {
    /// Enable debug-level logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a tile file and print what it contains
    Inspect(InspectArgs),

    /// Load every tile covering a bounding box and query it
    Load(LoadArgs),

    /// Show configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Inspect(args) => commands::inspect::run(args),
        Commands::Load(args) => commands::load::run(args, cli.verbose),
        Commands::Config(command) => commands::config::run(command),
    };

    if let Err(e) = result {
        e.exit();
    }
}
