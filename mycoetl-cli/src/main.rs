//! Mycoetl CLI: run the mushroom ETL pipeline and inspect its results.

mod commands;

use clap::Parser;
use std::path::PathBuf;

/// Mycoetl: extract, clean, encode and load the UCI mushroom dataset
#[derive(Parser, Debug)]
#[command(name = "mycoetl", version, about, long_about = None)]
struct Cli {
    /// Workspace directory; relative data paths resolve against it
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the complete ETL pipeline
    Run {
        /// Extract from a local CSV/JSON file instead of the UCI repository
        #[arg(long)]
        file: Option<PathBuf>,
        /// Extract from an HTTP endpoint returning JSON or CSV
        #[arg(long)]
        api: Option<String>,
        /// Destination table name
        #[arg(long)]
        table: Option<String>,
        /// Output file format for the file loader (csv, json)
        #[arg(long, default_value = "csv")]
        format: String,
        /// Skip the SQLite loader
        #[arg(long)]
        no_database: bool,
        /// Skip the file loader
        #[arg(long)]
        no_file: bool,
    },
    /// Check database connectivity, data directories and the latest run
    Health {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show statistics of the most recent pipeline run
    Stats,
    /// Row count and class distribution of the loaded table
    Query {
        /// Table to query (defaults to the configured table)
        #[arg(long)]
        table: Option<String>,
        /// Column to group by
        #[arg(long, default_value = "class")]
        column: String,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Write a default mycoetl.toml into the workspace
    Init,
    /// Print the effective settings as TOML
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let settings = mycoetl_core::config::load_settings(Some(&workspace), cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?
        .rooted_at(&workspace);

    let _guard = mycoetl_core::logging::init(&settings.logging, cli.verbose, cli.quiet)?;
    let settings = mycoetl_core::config::init_global(settings)?;

    commands::handle_command(cli.command, settings, &workspace).await
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
    fn test_parse_run_with_file() {
        let cli = Cli::try_parse_from([
            "mycoetl",
            "-v",
            "run",
            "--file",
            "data.csv",
            "--no-database",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 1);
        match cli.command {
            Commands::Run {
                file, no_database, format, ..
            } => {
                assert_eq!(file, Some(PathBuf::from("data.csv")));
                assert!(no_database);
                assert_eq!(format, "csv");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
