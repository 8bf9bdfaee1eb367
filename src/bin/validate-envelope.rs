use anyhow::{anyhow, Context, Result};
use clap::Parser;
use ingest_pipeline::envelope::EventType;
use ingest_pipeline::schema::SchemaRegistry;
use serde_json::Value;
use std::{fs, path::PathBuf};

/// Validate an ingest event JSON file against the envelope and its origin schema.
#[derive(Parser, Debug)]
#[command(name = "validate-envelope", version, about = "Validate an ingest event against its JSON schemas")]
struct Cli {
    /// Path to the event JSON file to validate
    path: PathBuf,

    /// Directory holding the envelope and origin schemas
    #[arg(long, env = "SCHEMA_DIR", default_value = "schemas")]
    schema_dir: PathBuf,

    /// Event type to validate as (defaults to the file's `event_type`)
    #[arg(long)]
    event_type: Option<String>,
}

fn load_json(path: &PathBuf) -> Result<Value> {
    let data = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let json: Value =
        serde_json::from_str(&data).with_context(|| format!("Failed to parse JSON in {}", path.display()))?;
    Ok(json)
}

fn main() -> Result<()> {
    let args = Cli::parse();
    let registry = SchemaRegistry::load_dir(&args.schema_dir)
        .with_context(|| format!("Failed to load schemas from {}", args.schema_dir.display()))?;
    let instance = load_json(&args.path)?;

    let name = args
        .event_type
        .clone()
        .or_else(|| instance.get("event_type").and_then(Value::as_str).map(String::from))
        .ok_or_else(|| anyhow!("no event_type in {} and none given with --event-type", args.path.display()))?;
    let event_type = EventType::parse(&name).ok_or_else(|| anyhow!("unknown event type '{}'", name))?;

    let violations = registry.validate_value(event_type, &instance)?;
    if violations.is_empty() {
        println!("valid");
        return Ok(());
    }
    eprintln!("invalid ({} violations):", violations.len());
    for violation in &violations {
        eprintln!("- {}", violation);
    }
    std::process::exit(1)
}
