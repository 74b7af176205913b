use anyhow::{anyhow, Context, Result};
use clap::Args;
use matgendb::query::SortOrder;
use matgendb::{Criteria, Properties, QueryEngine, QueryOptions, Record};
use serde_json::Value as JsonValue;
use std::path::Path;

#[derive(Args, Debug)]
pub struct QueryArgs {
    /// Criteria as a JSON object, e.g. '{"nelements": 2}'
    #[arg(long)]
    pub crit: Option<String>,
    /// Properties to show (defaults to every alias)
    #[arg(long, num_args = 1..)]
    pub props: Vec<String>,
    /// Print one JSON record per line instead of a table
    #[arg(long)]
    pub dump: bool,
    /// Sort by a property; prefix with '-' for descending
    #[arg(long, allow_hyphen_values = true)]
    pub sort: Vec<String>,
    /// Maximum number of records
    #[arg(long, default_value_t = 0)]
    pub limit: u64,
}

pub fn execute_query(config_path: &Path, args: QueryArgs) -> Result<()> {
    let engine = QueryEngine::from_config(config_path, false)
        .with_context(|| format!("Failed to open database from {}", config_path.display()))?;

    let criteria = args.crit.as_deref().map(parse_criteria).transpose()?;
    let properties = if args.props.is_empty() {
        engine.default_properties().to_vec()
    } else {
        args.props.clone()
    };

    let mut options = QueryOptions::default().limit(args.limit);
    for key in &args.sort {
        options = match key.strip_prefix('-') {
            Some(name) => options.sort_by(name, SortOrder::Descending),
            None => options.sort_by(key.as_str(), SortOrder::Ascending),
        };
    }

    let results = engine.query(
        Properties::Names(properties.clone()),
        criteria.as_ref(),
        &options,
    )?;

    if args.dump {
        for record in &results {
            println!("{}", serde_json::to_string(record)?);
        }
    } else {
        print!("{}", format_table(&properties, results.iter()));
        println!("{} record(s)", results.len());
    }
    Ok(())
}

fn parse_criteria(text: &str) -> Result<Criteria> {
    match serde_json::from_str::<JsonValue>(text).context("--crit is not valid JSON")? {
        JsonValue::Object(map) => Ok(map),
        other => Err(anyhow!("--crit must be a JSON object, got {}", other)),
    }
}

fn format_cell(value: Option<&JsonValue>) -> String {
    match value {
        None | Some(JsonValue::Null) => "-".to_string(),
        Some(JsonValue::String(s)) => s.clone(),
        Some(JsonValue::Number(n)) => match n.as_f64() {
            Some(f) if n.is_f64() => format!("{:.4}", f),
            _ => n.to_string(),
        },
        Some(other) => other.to_string(),
    }
}

/// Left-aligned columns sized to their widest cell
fn format_table<'a>(headers: &[String], records: impl Iterator<Item = &'a Record>) -> String {
    let rows: Vec<Vec<String>> = records
        .map(|record| headers.iter().map(|h| format_cell(record.get(h))).collect())
        .collect();

    let widths: Vec<usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| {
            rows.iter()
                .map(|row| row[i].chars().count())
                .chain(std::iter::once(h.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let render = |cells: &[String]| {
        let line: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
            .collect();
        format!("{}\n", line.join("  ").trim_end())
    };

    let mut out = render(headers);
    let total: usize = widths.iter().sum::<usize>() + 2 * widths.len().saturating_sub(1);
    out.push_str(&"-".repeat(total));
    out.push('\n');
    for row in &rows {
        out.push_str(&render(row));
    }
    out
}
