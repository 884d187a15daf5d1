use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use libbotcast::config::{resolve_config_path, Config};
use libbotcast::logging::LoggingConfig;
use libbotcast::types::{ExtraKeys, OutputEntry};
use libbotcast::{IterationRecord, RecordStore};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(name = "botcast-history")]
#[command(version, about = "Inspect a bot's posting history")]
#[command(long_about = r#"Inspect a bot's posting history file.

Loading the file upgrades legacy single-destination entries and repairs
nested birdsite records. Use --rewrite to save the file in the current format.
A history that can't be parsed is moved aside to <file>.bak.

EXAMPLES:
    # Show the last 20 iterations (default)
    botcast-history

    # Only mastodon results
    botcast-history --destination mastodon

    # JSON output for scripting
    botcast-history --format json | jq '.[] | .destinations[] | select(.success == false)'

    # JSONL output (one JSON object per line)
    botcast-history --format jsonl

    # Inspect another history file and upgrade it in place
    botcast-history --file ~/bots/old/secrets/oldbot-history.json --rewrite

OUTPUT FORMATS:
    text  - Human-readable, newest first (default)
    json  - JSON array
    jsonl - JSON lines, one object per line

EXIT CODES:
    0 - Success (including empty history)
    1 - Error (unreadable file, failed rewrite, etc.)
    2 - Configuration error
"#)]
struct Args {
    /// Configuration file
    #[arg(long, value_name = "PATH", env = "BOTCAST_CONFIG")]
    config: Option<PathBuf>,

    /// History file to read instead of the configured one
    #[arg(long, value_name = "PATH")]
    file: Option<String>,

    /// Only show results for this destination
    #[arg(short, long, value_name = "NAME")]
    destination: Option<String>,

    /// Maximum number of iterations to show
    #[arg(short, long, default_value = "20", value_name = "N")]
    limit: usize,

    /// Output format
    #[arg(short, long, default_value = "text", value_name = "FORMAT")]
    #[arg(value_parser = ["text", "json", "jsonl"])]
    format: String,

    /// Write the loaded history back in the current format
    #[arg(long)]
    rewrite: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// One iteration as shown to the user
#[derive(Debug, Serialize)]
struct HistoryEntry {
    timestamp: String,
    extra_keys: ExtraKeys,
    destinations: Vec<DestinationStatus>,
}

/// One destination result within an iteration
#[derive(Debug, Serialize)]
struct DestinationStatus {
    destination: String,
    success: bool,
    post_id: Option<String>,
    text: Option<String>,
    in_reply_to_id: Option<String>,
    error: Option<String>,
}

fn statuses(name: &str, entry: &OutputEntry) -> Vec<DestinationStatus> {
    if entry.is_unrecognized() {
        return vec![DestinationStatus {
            destination: name.to_string(),
            success: false,
            post_id: None,
            text: None,
            in_reply_to_id: None,
            error: Some("unrecognized record".to_string()),
        }];
    }

    entry
        .records()
        .into_iter()
        .map(|record| DestinationStatus {
            destination: name.to_string(),
            success: record.is_success(),
            post_id: record.post_id().map(ToString::to_string),
            text: record.text.clone(),
            in_reply_to_id: record.in_reply_to_id.as_ref().map(ToString::to_string),
            error: record
                .error_message
                .clone()
                .or_else(|| record.error.clone()),
        })
        .collect()
}

/// Newest-first entries, filtered to `destination` when given
fn select(records: &[IterationRecord], destination: Option<&str>, limit: usize) -> Vec<HistoryEntry> {
    records
        .iter()
        .rev()
        .filter_map(|record| {
            let destinations: Vec<DestinationStatus> = record
                .output_records
                .iter()
                .filter(|(name, _)| destination.map_or(true, |d| d == name.as_str()))
                .flat_map(|(name, entry)| statuses(name, entry))
                .collect();

            if destination.is_some() && destinations.is_empty() {
                return None;
            }

            Some(HistoryEntry {
                timestamp: record.timestamp.clone(),
                extra_keys: record.extra_keys.clone(),
                destinations,
            })
        })
        .take(limit)
        .collect()
}

fn history_path(args: &Args) -> Result<PathBuf> {
    if let Some(file) = &args.file {
        return Ok(PathBuf::from(shellexpand::tilde(file).to_string()));
    }

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => resolve_config_path()?,
    };
    let config = Config::load_from_path(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;
    Ok(config.history_path()?)
}

fn preview(text: &str) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() > 60 {
        format!("{}...", flat.chars().take(60).collect::<String>())
    } else {
        flat
    }
}

fn print_text(entries: &[HistoryEntry]) {
    for entry in entries {
        let extra: Vec<String> = entry
            .extra_keys
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect();
        if extra.is_empty() {
            println!("{}", entry.timestamp);
        } else {
            println!("{} | {}", entry.timestamp, extra.join(" "));
        }

        for status in &entry.destinations {
            let symbol = if status.success { "✓" } else { "✗" };
            match (&status.post_id, &status.error) {
                (_, Some(error)) => println!("  {} {}: {}", symbol, status.destination, error),
                (Some(id), None) => println!(
                    "  {} {}: {} {}",
                    symbol,
                    status.destination,
                    id,
                    preview(status.text.as_deref().unwrap_or_default())
                ),
                (None, None) => println!("  {} {}", symbol, status.destination),
            }
        }
        println!();
    }
}

fn run(args: &Args) -> Result<()> {
    let path = history_path(args)?;
    tracing::debug!("Reading history from {}", path.display());

    let store = RecordStore::open(&path)?;

    if args.rewrite {
        store
            .persist()
            .with_context(|| format!("Failed to rewrite {}", path.display()))?;
        eprintln!("Rewrote {} records to {}", store.len(), path.display());
    }

    let entries = select(store.records(), args.destination.as_deref(), args.limit);

    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&entries)?),
        "jsonl" => {
            for entry in &entries {
                println!("{}", serde_json::to_string(entry)?);
            }
        }
        _ => print_text(&entries),
    }

    Ok(())
}

fn main() {
    let args = Args::parse();
    LoggingConfig::from_env(args.verbose).init();

    if let Err(e) = run(&args) {
        eprintln!("Error: {:#}", e);
        let code = e
            .downcast_ref::<libbotcast::BotcastError>()
            .map(libbotcast::BotcastError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}
