use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use fulltext_core::{ArtifactStore, ExitCode, FulltextConfig, StalenessEngine, read_links_file};
use fulltext_extract::{GazetteerRecognizer, Pipeline, identify_facilities};

// ─── CLI Definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "fulltext",
    about = "Extract, store and inspect article full texts",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output in JSON format (for scripts).
    /// Also enabled by setting FULLTEXT_JSON=1.
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract every record of a links file that needs it.
    Run {
        /// Tab-separated file: bibcode, source, provider.
        links: PathBuf,
        /// Re-extract even when the stored artifact is current.
        #[arg(long)]
        force: bool,
        /// Process at most this many records.
        #[arg(long)]
        max: Option<usize>,
    },

    /// Report which records of a links file need extraction, without extracting.
    Check { links: PathBuf },

    /// Show the stored artifact of a bibcode.
    Show {
        bibcode: String,
        /// Print the full text instead of a summary.
        #[arg(long)]
        text: bool,
    },

    /// Print the shard directory of a bibcode.
    Path { bibcode: String },

    /// Recognise facilities in a stored artifact and record them in its meta.
    Facilities { bibcode: String },

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show all config values.
    List,
    /// Print the config file path.
    Path,
    /// Write the current configuration to the config file.
    Init,
}

// ─── Main ────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let start = Instant::now();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let json_output = cli.json || std::env::var("FULLTEXT_JSON").as_deref() == Ok("1");
    let config = FulltextConfig::load()?;

    match cli.command {
        Commands::Run { links, force, max } => {
            let mut records = read_links_file(&links, force)
                .with_context(|| format!("reading {}", links.display()))?;
            if let Some(max) = max {
                records.truncate(max);
            }
            let total = records.len();

            let pipeline = Pipeline::from_config(&config)?;
            let report = pipeline.process_batch(records).await;
            let dur = start.elapsed().as_millis();

            if json_output {
                print_json(&serde_json::json!({
                    "status": if report.failed.is_empty() { "ok" } else { "partial" },
                    "data": report,
                    "meta": { "duration_ms": dur, "total": total }
                }))?;
            } else {
                println!(
                    "{total} records: {} extracted, {} up to date, {} failed",
                    report.ready.len(),
                    report.up_to_date.len(),
                    report.failed.len()
                );
                for (identifier, error) in &report.failed {
                    println!("  {identifier}: {error}");
                }
            }
            if !report.failed.is_empty() {
                std::process::exit(ExitCode::PartialFailure as i32);
            }
        }

        Commands::Check { links } => {
            let records = read_links_file(&links, false)
                .with_context(|| format!("reading {}", links.display()))?;
            let engine = StalenessEngine::new(config.layout());
            let outcome = engine.decide_batch(records);
            let dur = start.elapsed().as_millis();

            let pending = |records: &[fulltext_core::Record]| -> Vec<serde_json::Value> {
                records
                    .iter()
                    .map(|r| {
                        serde_json::json!({
                            "bibcode": r.identifier,
                            "reason": r.update_reason,
                            "format": r.format,
                        })
                    })
                    .collect()
            };
            let failed: Vec<_> = outcome
                .failed
                .iter()
                .map(|(id, e)| serde_json::json!({ "bibcode": id, "error": e.to_string() }))
                .collect();

            if json_output {
                print_json(&serde_json::json!({
                    "status": "ok",
                    "data": {
                        "standard": pending(&outcome.standard),
                        "pdf": pending(&outcome.pdf),
                        "up_to_date": outcome.up_to_date,
                        "failed": failed,
                    },
                    "meta": { "duration_ms": dur }
                }))?;
            } else {
                for record in outcome.standard.iter().chain(&outcome.pdf) {
                    let reason = record
                        .update_reason
                        .map(|r| r.to_string())
                        .unwrap_or_default();
                    println!("{:<20}  {reason}", record.identifier);
                }
                for (identifier, error) in &outcome.failed {
                    println!("{identifier:<20}  ERROR {error}");
                }
                println!(
                    "{} pending ({} pdf), {} up to date, {} failed",
                    outcome.pending(),
                    outcome.pdf.len(),
                    outcome.up_to_date.len(),
                    outcome.failed.len()
                );
            }
        }

        Commands::Show { bibcode, text } => {
            let store = ArtifactStore::new(config.layout());
            let artifact = store.read_artifact(&bibcode)?;
            let dur = start.elapsed().as_millis();

            match artifact {
                Some(artifact) if json_output => print_json(&serde_json::json!({
                    "status": "ok",
                    "data": artifact,
                    "meta": { "duration_ms": dur }
                }))?,
                Some(artifact) if text => println!("{}", artifact.full_text),
                Some(artifact) => {
                    let meta = &artifact.meta;
                    println!("bibcode:    {}", meta.identifier);
                    println!("provider:   {}", meta.provider);
                    if let Some(format) = &meta.format {
                        println!("format:     {format}");
                    }
                    if let Some(reason) = meta.update_reason {
                        println!("reason:     {reason}");
                    }
                    if let Some(at) = meta.extracted_at {
                        println!("extracted:  {at}");
                    }
                    println!("sources:    {}", meta.source_locations.join(", "));
                    println!("full text:  {} chars", artifact.full_text.chars().count());
                    if let Some(ack) = &artifact.acknowledgements {
                        println!("ack:        {} chars", ack.chars().count());
                    }
                    if !meta.dataset.is_empty() {
                        println!("datasets:   {}", meta.dataset.join(", "));
                    }
                }
                None if json_output => {
                    print_json(&serde_json::json!({
                        "status": "error",
                        "error": "not_found",
                        "message": format!("No artifact for {bibcode}"),
                        "meta": { "duration_ms": dur }
                    }))?;
                    std::process::exit(ExitCode::NotFound as i32);
                }
                None => {
                    eprintln!("No artifact for {bibcode}");
                    std::process::exit(ExitCode::NotFound as i32);
                }
            }
        }

        Commands::Path { bibcode } => {
            let dir = config.layout().artifact_dir(&bibcode)?;
            if json_output {
                print_json(&serde_json::json!({
                    "status": "ok",
                    "data": { "relative": config.layout().relative_dir(&bibcode)?, "path": dir },
                    "meta": { "duration_ms": start.elapsed().as_millis() }
                }))?;
            } else {
                println!("{}", dir.display());
            }
        }

        Commands::Facilities { bibcode } => {
            let store = ArtifactStore::new(config.layout());
            let recognizer = GazetteerRecognizer::new(config.facilities.names.iter().cloned())?;
            let mentions = identify_facilities(&store, &recognizer, &bibcode)?;
            let dur = start.elapsed().as_millis();

            match mentions {
                Some(mentions) if json_output => print_json(&serde_json::json!({
                    "status": "ok",
                    "data": mentions,
                    "meta": { "duration_ms": dur }
                }))?,
                Some(mentions) => {
                    println!("acknowledgements: {}", mentions.acknowledgements.join(", "));
                    println!("full text:        {}", mentions.full_text.join(", "));
                }
                None => {
                    eprintln!("No artifact for {bibcode}");
                    std::process::exit(ExitCode::NotFound as i32);
                }
            }
        }

        Commands::Config { action } => match action.unwrap_or(ConfigAction::List) {
            ConfigAction::List => {
                if json_output {
                    print_json(&serde_json::json!({
                        "status": "ok",
                        "data": config,
                        "meta": { "duration_ms": start.elapsed().as_millis() }
                    }))?;
                } else {
                    print!("{}", toml::to_string_pretty(&config)?);
                }
            }
            ConfigAction::Path => println!("{}", FulltextConfig::config_path().display()),
            ConfigAction::Init => {
                let path = FulltextConfig::config_path();
                config.save_to(&path)?;
                println!("Wrote {}", path.display());
            }
        },
    }

    Ok(())
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn print_json(val: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(val)?);
    Ok(())
}
