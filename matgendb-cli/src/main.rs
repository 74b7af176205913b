use anyhow::Result;
use clap::{Parser, Subcommand};
use matgendb::{init_logging, LoggingConfig};
use std::path::PathBuf;
use tracing::{debug, error};

mod commands;

use commands::*;

#[derive(Parser)]
#[command(name = "mgdb")]
#[command(about = "Create, populate and query materials task databases")]
#[command(version = matgendb::VERSION)]
struct Cli {
    /// Database configuration file (.toml or JSON)
    #[arg(short, long, global = true, default_value = "db.json", env = "MGDB_CONFIG")]
    config: PathBuf,

    /// Verbose output (repeat for more)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a database configuration file
    Init(InitArgs),
    /// Insert task documents from files or directories
    Insert(InsertArgs),
    /// Query the task collection
    Query(QueryArgs),
    /// Create an index on the task collection
    Index(IndexArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let logging = LoggingConfig {
        json_format: cli.log_json,
        ..LoggingConfig::from_verbosity(cli.verbose)
    };
    init_logging(&logging)?;
    debug!("mgdb {} starting", matgendb::VERSION);

    let result = match cli.command {
        Commands::Init(args) => execute_init(&cli.config, args),
        Commands::Insert(args) => execute_insert(&cli.config, args).await,
        Commands::Query(args) => execute_query(&cli.config, args),
        Commands::Index(args) => execute_index(&cli.config, args),
    };

    if let Err(e) = &result {
        error!("Command failed: {:#}", e);
    }
    result
}
