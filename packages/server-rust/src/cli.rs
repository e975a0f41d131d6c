//! Command-line front end over the core engine.
//!
//! Every subcommand reads catalogs from JSON files and writes its report to
//! the returned string; `main` only prints it.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use schemasync_core::{
    configuration_diff, contains_breaking_change, format_diff, generate, merge,
    validate_against_destination, Catalog, DestinationCatalog, DiscoveredCatalog, MapperRegistry,
};
use serde::de::DeserializeOwned;
use serde_json::json;

#[derive(Parser, Debug)]
#[command(name = "schemasync", version, about = "Catalog diffing, merging and destination validation")]
pub struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "SCHEMASYNC_JSON_LOGS")]
    pub json_logs: bool,
    /// Print results as JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Diff two catalogs and report whether the change is breaking
    Diff { before: PathBuf, after: PathBuf },
    /// Merge a discovery into a configured catalog
    Merge { configured: PathBuf, discovered: PathBuf },
    /// List selected streams whose sync configuration changed
    ConfigDiff { before: PathBuf, after: PathBuf },
    /// Generate destination operations, optionally validating them
    Generate {
        catalog: PathBuf,
        #[arg(long)]
        destination: Option<PathBuf>,
    },
}

/// Outcome of a command: what to print and whether it succeeded.
#[derive(Debug)]
pub struct Report {
    pub output: String,
    pub success: bool,
}

impl Report {
    fn ok(output: String) -> Self {
        Self { output, success: true }
    }
}

/// Runs one parsed command.
///
/// # Errors
///
/// Fails when an input file cannot be read or parsed.
pub fn run(cli: &Cli) -> anyhow::Result<Report> {
    match &cli.command {
        Command::Diff { before, after } => {
            let (before, after) = (load_catalog(before)?, load_catalog(after)?);
            let diff = schemasync_core::diff(&before, &after);
            let breaking = contains_breaking_change(&diff);
            tracing::debug!(transforms = diff.len(), breaking, "catalogs diffed");
            let output = if cli.json {
                serde_json::to_string_pretty(&json!({ "diff": diff, "breaking": breaking }))?
            } else if diff.is_empty() {
                "No changes".to_string()
            } else {
                format!("{}\nbreaking: {breaking}", format_diff(&diff))
            };
            Ok(Report::ok(output))
        }
        Command::Merge {
            configured,
            discovered,
        } => {
            let merged = merge(&load_catalog(configured)?, &load_catalog(discovered)?);
            Ok(Report::ok(serde_json::to_string_pretty(&merged)?))
        }
        Command::ConfigDiff { before, after } => {
            let changed = configuration_diff(&load_catalog(before)?, &load_catalog(after)?);
            let names: Vec<String> = changed.iter().map(ToString::to_string).collect();
            let output = if cli.json {
                serde_json::to_string_pretty(&changed)?
            } else {
                names.join("\n")
            };
            Ok(Report::ok(output))
        }
        Command::Generate {
            catalog,
            destination,
        } => generate_report(&load_catalog(catalog)?, destination.as_deref(), cli.json),
    }
}

fn generate_report(catalog: &Catalog, destination: Option<&Path>, as_json: bool) -> anyhow::Result<Report> {
    let registry = MapperRegistry::with_defaults();
    let declared = destination.map(load_json::<DestinationCatalog>).transpose()?;
    let generated = generate(catalog, &registry, declared.as_ref());

    let violations = match &declared {
        Some(declared) => match validate_against_destination(catalog, declared, &registry) {
            Ok(()) => Vec::new(),
            Err(err) => err.violations,
        },
        None => Vec::new(),
    };
    let mapper_errors: Vec<String> = generated
        .mapper_errors
        .iter()
        .flat_map(|(stream, failures)| {
            failures.iter().map(move |failure| {
                format!(
                    "{stream}: mapper '{}' at position {}: {}",
                    failure.mapper.name, failure.index, failure.error.message
                )
            })
        })
        .collect();

    let success = violations.is_empty() && (declared.is_some() || mapper_errors.is_empty());
    let output = if as_json {
        serde_json::to_string_pretty(&json!({
            "streams": generated.streams,
            "mapperErrors": mapper_errors,
            "violations": violations,
        }))?
    } else {
        let mut lines: Vec<String> = generated
            .streams
            .iter()
            .map(|stream| {
                format!(
                    "{} -> {} ({:?}, {} fields)",
                    stream.descriptor,
                    stream.object_name.as_deref().unwrap_or("<unnamed>"),
                    stream.destination_sync_mode,
                    stream.fields.len()
                )
            })
            .collect();
        if declared.is_none() {
            lines.extend(mapper_errors);
        }
        lines.extend(violations.iter().map(|v| format!("violation: {v}")));
        lines.join("\n")
    };
    Ok(Report { output, success })
}

/// Reads a catalog in either the configured or the discovered format.
fn load_catalog(path: &Path) -> anyhow::Result<Catalog> {
    let value: serde_json::Value = load_json(path)?;
    if let Ok(catalog) = serde_json::from_value::<Catalog>(value.clone()) {
        return Ok(catalog);
    }
    let discovered: DiscoveredCatalog = serde_json::from_value(value)
        .with_context(|| format!("{} is neither a configured nor a discovered catalog", path.display()))?;
    Ok(Catalog::from_discovered(&discovered, None)?)
}

fn load_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}
