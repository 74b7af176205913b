use anyhow::{Context, Result};
use clap::Args;
use matgendb::QueryEngine;
use std::path::Path;

#[derive(Args, Debug)]
pub struct IndexArgs {
    /// Dotted field path to index
    pub key: String,
    /// Reject documents repeating an indexed value
    #[arg(long)]
    pub unique: bool,
}

pub fn execute_index(config_path: &Path, args: IndexArgs) -> Result<()> {
    let engine = QueryEngine::from_config(config_path, true)
        .with_context(|| format!("Failed to open database from {}", config_path.display()))?;

    if engine.ensure_index(&args.key, args.unique)? {
        engine.close()?;
        println!("✓ Created index on {} (unique: {})", args.key, args.unique);
    } else {
        println!("Index on {} already exists", args.key);
    }
    Ok(())
}
