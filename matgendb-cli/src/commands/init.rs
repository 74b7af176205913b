use anyhow::{bail, Context, Result};
use clap::Args;
use matgendb::DbConfig;
use std::path::{Path, PathBuf};

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Directory holding the databases
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    /// Database name
    #[arg(long)]
    pub database: Option<String>,
    /// Task collection name
    #[arg(long)]
    pub collection: Option<String>,
    /// Alias file (JSON with "aliases" and "defaults")
    #[arg(long)]
    pub aliases_config: Option<PathBuf>,
    /// Overwrite an existing configuration file
    #[arg(short, long)]
    pub force: bool,
}

pub fn execute_init(config_path: &Path, args: InitArgs) -> Result<()> {
    if config_path.exists() && !args.force {
        bail!(
            "Configuration file {} already exists (use --force to overwrite)",
            config_path.display()
        );
    }

    let defaults = DbConfig::default();
    let config = DbConfig {
        data_dir: args.data_dir.unwrap_or(defaults.data_dir),
        database: args.database.unwrap_or(defaults.database),
        collection: args.collection.unwrap_or(defaults.collection),
        aliases_config: args.aliases_config,
    };
    config
        .save(config_path)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    println!("✓ Wrote configuration to {}", config_path.display());
    println!("  data_dir:   {}", config.data_dir.display());
    println!("  database:   {}", config.database);
    println!("  collection: {}", config.collection);
    Ok(())
}
