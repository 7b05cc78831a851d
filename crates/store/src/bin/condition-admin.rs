//! condition-admin: inspect and edit the condition store.
//!
//! Running applications holding conditions from the same database pick up
//! `put`/`remove` on their next staleness check.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;

use gatelog_condition::{ExpressionEngine, ScriptEngine};
use gatelog_core::config::load_dotenv;
use gatelog_core::{tracing_sink, GateConfig, Level, LoggingContext};
use gatelog_store::{ConditionEntry, ConditionStore};

// ── CLI ─────────────────────────────────────────────────────────────

/// Manage named log conditions stored in SQLite.
#[derive(Parser, Debug)]
#[command(name = "condition-admin", version, about)]
struct Cli {
    /// Database file (defaults to GATELOG_STORE_PATH or data/conditions.db).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create or replace a condition script.
    Put {
        name: String,
        /// Script text; use --file to read it from disk instead.
        #[arg(required_unless_present = "file", conflicts_with = "file")]
        script: Option<String>,
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(short, long, default_value = "")]
        description: String,
        /// Store the script even if it does not compile.
        #[arg(long)]
        force: bool,
    },
    /// Print one condition as JSON.
    Show { name: String },
    /// List all conditions.
    List,
    /// Delete a condition.
    Remove { name: String },
    /// Evaluate a condition against a level and fields.
    Eval {
        name: String,
        #[arg(short, long, default_value = "info")]
        level: Level,
        /// Argument field as key=value; the value is parsed as JSON when it can be.
        #[arg(short, long = "field", value_parser = parse_field)]
        fields: Vec<(String, Value)>,
    },
}

fn parse_field(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn print_entry(entry: &ConditionEntry) {
    let description = if entry.description.is_empty() { "-" } else { &entry.description };
    println!(
        "{:<24} {:<32} touched {}  {}",
        entry.name,
        description,
        entry.touched_at.format("%Y-%m-%d %H:%M:%S%.6f"),
        entry.script.replace('\n', " ")
    );
}

// ── Main ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    load_dotenv();
    let cli = Cli::parse();
    let mut config = GateConfig::from_env();
    if let Some(db) = cli.db {
        config.store.path = db;
    }
    config.log_summary();

    let engine = ExpressionEngine::shared();
    let store = ConditionStore::open(&config.store, engine.clone(), tracing_sink())
        .with_context(|| format!("opening {}", config.store.path.display()))?;

    match cli.command {
        Command::Put { name, script, file, description, force } => {
            let script = match (script, file) {
                (Some(script), _) => script,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?,
                (None, None) => bail!("no script given"),
            };
            if let Err(e) = engine.compile(&name, &script) {
                if !force {
                    bail!("{} (use --force to store it anyway)", e);
                }
            }
            store.put(&name, &description, &script)?;
            info!(condition = %name, "condition stored");
        }
        Command::Show { name } => match store.get(&name)? {
            Some(entry) => println!("{}", serde_json::to_string_pretty(&entry)?),
            None => bail!("no condition named '{}'", name),
        },
        Command::List => {
            for entry in store.list()? {
                print_entry(&entry);
            }
        }
        Command::Remove { name } => {
            if !store.remove(&name)? {
                bail!("no condition named '{}'", name);
            }
            info!(condition = %name, "condition removed");
        }
        Command::Eval { name, level, fields } => {
            let condition = store.create(&name)?;
            let mut builder = LoggingContext::builder();
            for (key, value) in fields {
                builder = builder.argument(key, value);
            }
            println!("{}", condition.test(level, &builder.build()));
        }
    }

    store.close();
    Ok(())
}
