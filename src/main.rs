//! # kbrag
//!
//! Command-line interface for the knowledge-base question answering service.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kbrag init` | Create the SQLite database and schema |
//! | `kbrag ingest` | Rebuild the collection from the knowledge-base directory |
//! | `kbrag ask "<question>"` | Answer one question |
//! | `kbrag serve` | Start the HTTP API |
//! | `kbrag stats` | Show what the collection holds |
//!
//! ## Examples
//!
//! ```bash
//! kbrag --config ./config/kb.toml init
//! kbrag --config ./config/kb.toml ingest
//! kbrag --config ./config/kb.toml ask "How many vacation days do I get?"
//! kbrag --config ./config/kb.toml ask "..." --json
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use kb_rag::config::{self, Config};
use kb_rag::embedding::create_provider;
use kb_rag::ingest::{self, IngestReport};
use kb_rag::migrate;
use kb_rag::models::{Candidate, PipelineResult};
use kb_rag::pipeline::RagPipeline;
use kb_rag::server;
use kb_rag::stats;
use kb_rag::store::sqlite::SqliteIndex;

/// Answer questions from a markdown knowledge base with cited sources.
#[derive(Parser)]
#[command(name = "kbrag", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kb.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Rebuild the collection from the knowledge-base directory.
    ///
    /// Replaces the whole collection; re-running on unchanged files yields
    /// the same contents.
    Ingest {
        /// Count documents and chunks without calling any service.
        #[arg(long)]
        dry_run: bool,
    },

    /// Answer one question.
    Ask {
        question: String,

        /// Print the full result as JSON.
        #[arg(long)]
        json: bool,

        /// Also print retrieved and reranked candidates.
        #[arg(long)]
        debug: bool,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,

    /// Show collection statistics.
    Stats,
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kb_rag=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { dry_run } => {
            let report = if dry_run {
                ingest::dry_run(&cfg)?
            } else {
                run_ingest(&cfg).await?
            };
            print_ingest_report(&cfg, &report);
        }
        Commands::Ask {
            question,
            json,
            debug,
        } => {
            let pipeline = RagPipeline::from_config(&cfg).await?;
            let result = pipeline.run(&question).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_result(&result, debug);
            }
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}

async fn run_ingest(cfg: &Config) -> anyhow::Result<IngestReport> {
    let embedder = create_provider(&cfg.embedding)?;
    let index = Arc::new(SqliteIndex::open(cfg).await?);
    let report = ingest::run_ingest(cfg, embedder, index.clone()).await;
    index.close().await;
    report
}

fn print_ingest_report(cfg: &Config, report: &IngestReport) {
    if report.dry_run {
        println!("ingest {} (dry-run)", cfg.kb.dir.display());
    } else {
        println!("ingest {}", cfg.kb.dir.display());
    }
    println!("  documents: {}", report.documents);
    println!("  chunks: {}", report.chunks);
    println!("  embedding batches: {}", report.batches);
    if !report.dry_run {
        println!("  model: {} ({} dims)", report.model, report.dims);
        println!("  collection: {}", cfg.db.collection);
    }
    println!("ok");
}

fn print_result(result: &PipelineResult, debug: bool) {
    println!("{}", result.answer);
    println!();
    println!("---");
    if result.sources.is_empty() {
        println!("Sources: none");
    } else {
        println!("Sources:");
        for source in &result.sources {
            println!("  - {}", source);
        }
    }
    println!("Gate: {}", result.debug.gate_reason);

    if let Some(report) = &result.debug.citations {
        if report.has_drift() {
            println!(
                "Citation check: {} out-of-range marker(s), {} uncited sentence(s)",
                report.out_of_range.len(),
                report.uncited_sentences.len()
            );
        }
    }

    if debug {
        print_candidates("Retrieved", &result.debug.retrieved);
        print_candidates("Reranked", &result.debug.reranked);
    }
}

fn print_candidates(label: &str, candidates: &[Candidate]) {
    println!();
    println!("{} ({}):", label, candidates.len());
    for (i, c) in candidates.iter().enumerate() {
        let preview: String = c.text.chars().take(80).collect();
        println!(
            "  {:>2}. {:.4}  {:<24} {}",
            i + 1,
            c.distance,
            c.source,
            preview.replace('\n', " ")
        );
    }
}
