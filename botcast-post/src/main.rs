//! botcast-post - Post once to every destination a bot is configured for

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use libbotcast::config::{resolve_config_path, Config};
use libbotcast::credentials::CredentialBundle;
use libbotcast::destinations::mock::MockClient;
use libbotcast::destinations::{ClientFactory, DefaultClientFactory, DestinationKind, NetworkClient};
use libbotcast::error::ConfigError;
use libbotcast::logging::{LogFormat, LoggingConfig};
use libbotcast::{BotcastError, IterationRecord, Orchestrator, RateLimiter};
use serde_json::Value;
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "botcast-post")]
#[command(version, about = "Post to every destination a bot is configured for")]
#[command(long_about = r#"Post text, optionally with media, to every active destination of a bot
and append the outcome to the bot's history file.

A destination is active when its credential directory exists under the bot's
secrets directory (credentials_mastodon/, credentials_birdsite/).

EXAMPLES:
    # Post text
    botcast-post "Hello world"

    # Read the post from stdin
    fortune | botcast-post

    # Post a random line of a file, noting which file in the history
    botcast-post --random-line quotes.txt --extra corpus=quotes.txt

    # Post with images and alt text
    botcast-post "Look" --media cat.png --caption "A cat" --media dog.png

    # Try a bot's setup without touching any network
    botcast-post --dry-run "Testing"

EXIT CODES:
    0 - Posted to every active destination
    1 - At least one destination failed, or the history could not be written
    2 - Configuration error
    3 - Invalid input
"#)]
struct Cli {
    /// Text to post (reads from stdin if not provided)
    text: Option<String>,

    /// Post a random line of this file instead
    #[arg(long, value_name = "FILE", conflicts_with = "text")]
    random_line: Option<PathBuf>,

    /// Media file to attach (repeatable)
    #[arg(short, long, value_name = "FILE")]
    media: Vec<PathBuf>,

    /// Alt text for the media file in the same position (repeatable)
    #[arg(short, long, value_name = "TEXT", requires = "media")]
    caption: Vec<String>,

    /// Metadata stored with the history record (repeatable)
    #[arg(short, long, value_name = "KEY=VALUE", value_parser = parse_extra)]
    extra: Vec<(String, Value)>,

    /// Configuration file
    #[arg(long, value_name = "PATH", env = "BOTCAST_CONFIG")]
    config: Option<PathBuf>,

    /// Use in-memory clients instead of the real networks
    #[arg(long)]
    dry_run: bool,

    /// Output format
    #[arg(short, long, default_value = "text", value_parser = ["text", "json"])]
    format: String,

    /// Log format: text, json or pretty
    #[arg(long, value_name = "FORMAT", env = "BOTCAST_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Parse `KEY=VALUE`; a VALUE that is valid JSON is stored as JSON
fn parse_extra(arg: &str) -> std::result::Result<(String, Value), String> {
    let (key, value) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", arg))?;

    if key.is_empty() {
        return Err(format!("empty key in '{}'", arg));
    }

    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::from(value));
    Ok((key.to_string(), value))
}

/// Hands every destination an in-memory client
struct DryRunFactory;

impl ClientFactory for DryRunFactory {
    fn create(
        &self,
        _kind: DestinationKind,
        _credentials: &CredentialBundle,
    ) -> std::result::Result<Arc<dyn NetworkClient>, ConfigError> {
        Ok(Arc::new(MockClient::new()))
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = std::env::var(libbotcast::logging::LOG_LEVEL_ENV)
        .unwrap_or_else(|_| "warn".to_string());
    LoggingConfig::new(cli.log_format, level, cli.verbose).init();

    match run(cli).await {
        Ok(record) if record.all_succeeded() => {}
        Ok(_) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            let code = e
                .downcast_ref::<BotcastError>()
                .map(BotcastError::exit_code)
                .unwrap_or(1);
            std::process::exit(code);
        }
    }
}

async fn run(cli: Cli) -> Result<IterationRecord> {
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => resolve_config_path()?,
    };
    let config = Config::load_from_path(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;

    let text = post_text(&cli)?;
    debug!("Posting {:?} as {}", text, config.bot_name);

    let limiter = Arc::new(RateLimiter::system());
    let mut orchestrator = if cli.dry_run {
        Orchestrator::from_config(&config, &DryRunFactory, limiter)?
    } else {
        Orchestrator::from_config(&config, &DefaultClientFactory, limiter)?
    };

    if let Some(path) = &cli.random_line {
        orchestrator.store_extra_info("random_line_source", path.display().to_string());
    }
    orchestrator.store_extra_keys(cli.extra.iter().cloned());

    let record = if cli.media.is_empty() {
        orchestrator.send(&text).await?
    } else {
        orchestrator
            .send_with_media(&text, &cli.media, &cli.caption)
            .await?
    };

    print_record(&record, &cli.format)?;
    Ok(record)
}

fn post_text(cli: &Cli) -> Result<String> {
    let text = if let Some(path) = &cli.random_line {
        libbotcast::util::random_line(path)
            .with_context(|| format!("Failed to pick a line from {}", path.display()))?
    } else if let Some(text) = &cli.text {
        text.clone()
    } else {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read post from stdin")?;
        buffer
    };

    let text = text.trim().to_string();
    if text.is_empty() {
        return Err(BotcastError::InvalidArgument("Nothing to post".to_string()).into());
    }
    Ok(text)
}

fn print_record(record: &IterationRecord, format: &str) -> Result<()> {
    if format == "json" {
        println!("{}", serde_json::to_string_pretty(record)?);
        return Ok(());
    }

    if record.output_records.is_empty() {
        eprintln!("No active destinations; recorded in history only");
    }

    for (name, entry) in &record.output_records {
        for result in entry.records() {
            match (result.post_id(), &result.error_message) {
                (Some(id), None) => println!("{}: {}", name, id),
                (_, Some(message)) => println!("{}: error: {}", name, message),
                (None, None) => println!("{}: no post id", name),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_extra_json_value() {
        assert_eq!(
            parse_extra("line=12").unwrap(),
            ("line".to_string(), Value::from(12))
        );
        assert_eq!(
            parse_extra("tags=[\"a\"]").unwrap(),
            ("tags".to_string(), serde_json::json!(["a"]))
        );
    }

    #[test]
    fn test_parse_extra_plain_string() {
        assert_eq!(
            parse_extra("corpus=quotes.txt").unwrap(),
            ("corpus".to_string(), Value::from("quotes.txt"))
        );
        assert_eq!(
            parse_extra("note=a=b").unwrap(),
            ("note".to_string(), Value::from("a=b"))
        );
    }

    #[test]
    fn test_parse_extra_rejects_malformed() {
        assert!(parse_extra("novalue").is_err());
        assert!(parse_extra("=1").is_err());
    }
}
