//! ChainIngest CLI: tail liquid-staking logs and event feeds into a document store.
//!
//! # Commands
//! ```
//! chainingest run        --config <path.yaml>
//! chainingest tail       --profile <name> --path <file> [--from-end]
//! chainingest decode     --event <json | @file> [--plain]
//! chainingest replay-log --path <listener.log>
//! chainingest mapping
//! chainingest profiles
//! ```

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use chainingest_core::{
    AttributeEncoding, BlockProfile, DecoderConfig, EventAttributeDecoder, FieldTypeTable,
    LineHandler, LineOutcome, LineStreamOptions, OutputRecord, ProtocolEvent, RecordNormalizer,
    StartPosition,
};
use chainingest_observability::{init_tracing, LogConfig};
use chainingest_sources::TxLogLineHandler;
use chainingest_storage::mapping_for;
use clap::{Parser, Subcommand};

mod cmd_run;
mod config;

use config::IngestConfig;

#[derive(Parser)]
#[command(
    name = "chainingest",
    about = "Stream-to-record extraction for Stride liquid-staking data",
    long_about = "
ChainIngest turns key/value query dumps, transaction listener logs and live
CometBFT websocket events into typed records for Elasticsearch or stdout.

ENVIRONMENT VARIABLES:
  RUST_LOG    overrides the configured log levels (e.g. chainingest_core=debug)
",
    version
)]
struct Cli {
    /// Debug-level logging (ignored when RUST_LOG is set)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every stream of a YAML configuration until Ctrl-C
    Run {
        #[arg(short, long, default_value = "chainingest.yaml")]
        config: PathBuf,
    },

    /// Follow one key/value dump and print its records as JSON lines
    Tail {
        /// Built-in profile: redemption_rate | host_zone_unbondings
        #[arg(long)]
        profile: String,
        #[arg(long)]
        path: String,
        /// Skip content already in the file
        #[arg(long)]
        from_end: bool,
        #[arg(long, default_value_t = 1_000)]
        poll_ms: u64,
    },

    /// Decode one transaction event (JSON, or @path to a JSON file)
    Decode {
        #[arg(long)]
        event: String,
        /// Attribute keys and values are plain text rather than base64
        #[arg(long)]
        plain: bool,
    },

    /// Decode a transaction listener log file once and print its records
    ReplayLog {
        #[arg(long)]
        path: PathBuf,
    },

    /// Print the index mapping of the built-in field-type table
    Mapping,

    /// List built-in block profiles
    Profiles,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => {
            let cfg = IngestConfig::load(&config)?;
            let mut log = cfg.log.clone();
            if cli.verbose {
                log.level = "debug".into();
            }
            init_logging(&log)?;
            cmd_run::run(cfg).await
        }

        Commands::Tail {
            profile,
            path,
            from_end,
            poll_ms,
        } => {
            init_logging(&cli_log(cli.verbose))?;
            let profile = BlockProfile::builtin(&profile).ok_or_else(|| {
                anyhow!(
                    "unknown profile '{}' (built-in: {})",
                    profile,
                    BlockProfile::builtin_names().join(", ")
                )
            })?;
            let options = LineStreamOptions {
                start_from: if from_end {
                    StartPosition::End
                } else {
                    StartPosition::Beginning
                },
                poll_interval_ms: poll_ms,
                ..LineStreamOptions::default()
            };
            cmd_run::tail(&path, profile, options).await
        }

        Commands::Decode { event, plain } => {
            let json = if let Some(path) = event.strip_prefix('@') {
                std::fs::read_to_string(path)
                    .with_context(|| format!("read event file '{}'", path))?
            } else {
                event
            };
            let encoding = if plain {
                AttributeEncoding::Plain
            } else {
                AttributeEncoding::Base64
            };
            for record in decode_event_records(&json, encoding)? {
                println!("{}", serde_json::to_string(&record)?);
            }
            Ok(())
        }

        Commands::ReplayLog { path } => {
            init_logging(&cli_log(cli.verbose))?;
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("read log file '{}'", path.display()))?;
            let (records, malformed) = replay_log(&text);
            for record in &records {
                println!("{}", serde_json::to_string(record)?);
            }
            eprintln!("{} records, {} malformed lines", records.len(), malformed);
            Ok(())
        }

        Commands::Mapping => {
            let mapping = mapping_for(&FieldTypeTable::liquid_staking());
            println!("{}", serde_json::to_string_pretty(&mapping)?);
            Ok(())
        }

        Commands::Profiles => {
            for name in BlockProfile::builtin_names() {
                if let Some(p) = BlockProfile::builtin(name) {
                    println!("{name}");
                    println!("  required: {}", p.required_fields.join(", "));
                    if let Some(start) = &p.block_start_key {
                        println!("  starts:   {start}");
                    }
                    if let Some(end) = &p.block_end_key {
                        println!("  ends:     {end}");
                    }
                    if !p.sticky_fields.is_empty() {
                        println!("  sticky:   {}", p.sticky_fields.join(", "));
                    }
                }
            }
            Ok(())
        }
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn cli_log(verbose: bool) -> LogConfig {
    LogConfig {
        level: if verbose { "debug" } else { "info" }.into(),
        ..LogConfig::default()
    }
}

fn init_logging(log: &LogConfig) -> Result<()> {
    init_tracing(log).map_err(|e| anyhow!("failed to initialise logging: {e}"))
}

/// Decode and normalize one event with the built-in field types.
fn decode_event_records(json: &str, encoding: AttributeEncoding) -> Result<Vec<OutputRecord>> {
    let event: ProtocolEvent = serde_json::from_str(json).context("parse event JSON")?;
    let decoder = EventAttributeDecoder::new(DecoderConfig {
        encoding,
        ..DecoderConfig::default()
    });
    let normalizer = RecordNormalizer::new(FieldTypeTable::liquid_staking());
    Ok(decoder
        .decode(&event)
        .into_records()
        .iter()
        .map(|raw| normalizer.normalize(raw))
        .collect())
}

/// Run every line of a listener log through the transaction-log handler.
/// Returns the records and the number of malformed lines.
fn replay_log(text: &str) -> (Vec<OutputRecord>, usize) {
    let mut handler = TxLogLineHandler::default();
    let normalizer = RecordNormalizer::new(FieldTypeTable::liquid_staking());
    let mut raw = Vec::new();
    let mut malformed = 0;
    for line in text.lines() {
        if handler.handle_line(line, &mut raw) == LineOutcome::Malformed {
            malformed += 1;
        }
    }
    let records = raw.iter().map(|r| normalizer.normalize(r)).collect();
    (records, malformed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainingest_core::FieldValue;

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from([
            "chainingest",
            "tail",
            "--profile",
            "redemption_rate",
            "--path",
            "/tmp/x.log",
            "--from-end",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Tail { from_end: true, poll_ms: 1_000, .. }
        ));

        let cli = Cli::try_parse_from(["chainingest", "-v", "mapping"]).unwrap();
        assert!(cli.verbose);
    }

    #[test]
    fn decode_plain_event() {
        let json = r#"{
            "type": "wasm-liquid_stake",
            "attributes": [
                {"key": "_contract_address", "value": "stride1c"},
                {"key": "amount", "value": "100"},
                {"key": "liquid_staking_interval", "value": "7"}
            ],
            "tx_hash": "ABC",
            "block_height": 12,
            "timestamp": 1700000000
        }"#;
        let records = decode_event_records(json, AttributeEncoding::Plain).unwrap();
        assert_eq!(records.len(), 1);
        let rec = &records[0];
        assert_eq!(rec.tx_hash(), Some("ABC"));
        assert_eq!(rec.get("liquid_staking_interval"), Some(&FieldValue::Int(7)));
        assert_eq!(rec.get("amount"), Some(&FieldValue::Str("100".into())));
    }

    #[test]
    fn replay_counts_malformed_lines() {
        let (records, malformed) = replay_log("{not json\n\n");
        assert!(records.is_empty());
        assert_eq!(malformed, 1);
    }
}
