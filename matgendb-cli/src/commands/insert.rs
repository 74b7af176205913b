use anyhow::{bail, Context, Result};
use clap::Args;
use matgendb::{AccessMode, Database, DbConfig, IngestOptions, Ingestor};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Args, Debug)]
pub struct InsertArgs {
    /// Task files or directories to scan for .json/.jsonl files
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
    /// Number of files processed in parallel (defaults to the CPU count)
    #[arg(short = 'n', long)]
    pub ncpus: Option<usize>,
    /// Replace tasks that already exist instead of skipping them
    #[arg(long)]
    pub update_duplicates: bool,
}

pub async fn execute_insert(config_path: &Path, args: InsertArgs) -> Result<()> {
    for path in &args.paths {
        if !path.exists() {
            bail!("Path does not exist: {}", path.display());
        }
    }

    let config = DbConfig::load(config_path)
        .with_context(|| format!("Failed to load configuration {}", config_path.display()))?;
    let database = Database::open(&config.data_dir, &config.database, AccessMode::ReadWrite)
        .context("Failed to open database")?;

    let mut options = IngestOptions {
        update_duplicates: args.update_duplicates,
        ..IngestOptions::default()
    };
    if let Some(ncpus) = args.ncpus {
        options.ncpus = ncpus;
    }

    let ingestor = Ingestor::new(Arc::new(database), &config.collection, options)?;
    let report = ingestor.ingest_paths(&args.paths).await?;

    println!("Inserted: {}", report.inserted);
    println!("Updated:  {}", report.updated);
    println!("Skipped:  {}", report.skipped);
    println!("Failed:   {}", report.failed);
    for (path, message) in &report.errors {
        eprintln!("  {}: {}", path.display(), message);
    }
    Ok(())
}
