//! CLI entry point for the similarity index.
//!
//! Commands for creating the configuration, indexing JSONL corpora, querying
//! similar documents, deleting documents and inspecting the index.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::{
    ArgGroup, Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use console::style;
use serde::Serialize;
use simdex::config::ModelKind;
use simdex::display::{create_progress_bar, create_results_table, create_status_table, with_spinner};
use simdex::logging::{self, Verbosity};
use simdex::semantic::model_from_settings;
use simdex::{Document, DocumentId, IndexError, IndexServer, Query, SemanticModel, Settings};

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Incremental document similarity index
#[derive(Parser)]
#[command(
    name = "simdex",
    version = env!("CARGO_PKG_VERSION"),
    about = "Find similar documents with a precomputed similarity index",
    long_about = "Index documents from JSONL files and query the most similar documents by id or by text.",
    next_line_help = true,
    styles = clap_cargo_style(),
    after_help = "Quick Start:\n  $ simdex init\n  $ simdex index corpus.jsonl --progress\n  $ simdex similar --id doc_42 --limit 10\n  $ simdex similar --text \"graph minors\""
)]
struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Errors only
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Disable colored log output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize project
    #[command(about = "Set up .simdex directory with default configuration")]
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Index documents from a JSONL file
    #[command(
        about = "Add documents from a JSONL file to the index",
        after_help = "Each line is one JSON document:\n  {\"id\": \"doc_1\", \"text\": \"...\", \"title\": \"optional\"}\n\nRe-indexing an existing id replaces it."
    )]
    Index {
        /// JSONL file, one document per line
        file: PathBuf,

        /// Documents per indexing batch
        #[arg(short, long, default_value = "1000")]
        batch_size: usize,

        /// Show progress during indexing
        #[arg(short, long)]
        progress: bool,
    },

    /// Find similar documents
    #[command(
        about = "Find documents similar to an indexed document or to free text",
        group(ArgGroup::new("anchor").required(true).args(["id", "text"]))
    )]
    Similar {
        /// Id of an indexed document
        #[arg(long)]
        id: Option<String>,

        /// Free text, vectorised but not stored
        #[arg(long)]
        text: Option<String>,

        /// Stop at the first score below this value (overrides config)
        #[arg(long)]
        min_score: Option<f32>,

        /// Maximum number of results, 0 for no limit (overrides config)
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Remove documents from the index
    Delete {
        /// Ids to remove
        #[arg(required = true, num_args = 1..)]
        ids: Vec<String>,
    },

    /// Show index statistics
    Status {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Remove the index files
    Drop,

    /// Show current configuration settings
    #[command(about = "Display active settings from .simdex/settings.toml")]
    Config,
}

#[derive(Debug, Serialize)]
struct SimilarResult<'a> {
    id: &'a str,
    score: f32,
}

fn main() {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => match Settings::load_from(path) {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("Configuration error loading from {}: {e}", path.display());
                std::process::exit(1);
            }
        },
        None => Settings::load().unwrap_or_else(|e| {
            eprintln!("Configuration error: {e}");
            Settings::default()
        }),
    };

    logging::init(
        &settings.logging.level,
        Verbosity::from_flags(cli.verbose, cli.quiet),
        cli.no_color,
    );

    if let Err(e) = run(cli, settings) {
        eprintln!("{} {e:#}", style("Error:").red().bold());
        if let Some(index_error) = e.downcast_ref::<IndexError>() {
            for suggestion in index_error.recovery_suggestions() {
                eprintln!("  {} {suggestion}", style("hint:").yellow());
            }
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli, settings: Settings) -> Result<()> {
    if settings.index.parallel_threads > 0
        && let Err(e) = rayon::ThreadPoolBuilder::new()
            .num_threads(settings.index.parallel_threads)
            .build_global()
    {
        tracing::warn!("Could not configure the thread pool: {e}");
    }

    match cli.command {
        Commands::Init { force } => {
            let path = Settings::init_config_file(force)
                .map_err(|e| anyhow::anyhow!("{e}"))
                .context("Failed to write configuration")?;
            println!("Created configuration file at: {}", path.display());
            println!("Edit this file to customize your settings.");
            Ok(())
        }

        Commands::Config => {
            println!("Current Configuration:");
            println!("{}", "=".repeat(50));
            println!("{}", toml::to_string_pretty(&settings)?);
            Ok(())
        }

        Commands::Index {
            file,
            batch_size,
            progress,
        } => index_file(&settings, &file, batch_size, progress),

        Commands::Similar {
            id,
            text,
            min_score,
            limit,
            json,
        } => {
            let server = open_server(&settings)?;
            let query = match (id, text) {
                (Some(id), _) => Query::Id(DocumentId::new(id)),
                (None, Some(text)) => {
                    server.set_model(load_model(&settings)?);
                    Query::Document(Document::new("query", text))
                }
                (None, None) => bail!("Either --id or --text is required"),
            };

            let sims = server.find_similar(
                query,
                min_score.unwrap_or(settings.query.min_score),
                limit.unwrap_or(settings.query.max_results),
            )?;

            if json {
                let results: Vec<SimilarResult> = sims
                    .iter()
                    .map(|(id, score)| SimilarResult {
                        id: id.as_str(),
                        score: *score,
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else if sims.is_empty() {
                println!("No similar documents found.");
            } else {
                println!("{}", create_results_table(&sims));
            }
            Ok(())
        }

        Commands::Delete { ids } => {
            let server = open_server(&settings)?;
            let ids: Vec<DocumentId> = ids.into_iter().map(DocumentId::new).collect();
            let removed = server.delete(&ids)?;
            println!("Deleted {removed} documents.");
            Ok(())
        }

        Commands::Status { json } => {
            let server = open_server(&settings)?;
            let status = server.status();
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("{}", create_status_table(&status));
            }
            Ok(())
        }

        Commands::Drop => {
            let server = open_server(&settings)?;
            server.drop_index(false)?;
            println!("Removed index at {}", server.root().display());
            Ok(())
        }
    }
}

fn open_server(settings: &Settings) -> Result<IndexServer> {
    let path = settings.resolved_index_path();
    IndexServer::open(&path, settings.index.clone())
        .with_context(|| format!("Failed to open index at {}", path.display()))
}

fn load_model(settings: &Settings) -> Result<Arc<dyn SemanticModel>> {
    let build = || model_from_settings(&settings.model);
    let model = if settings.model.kind == ModelKind::Fastembed {
        with_spinner("Loading embedding model...", build)?
    } else {
        build()?
    };
    Ok(Arc::from(model))
}

fn index_file(settings: &Settings, file: &Path, batch_size: usize, progress: bool) -> Result<()> {
    if batch_size == 0 {
        bail!("--batch-size must be at least 1");
    }

    let docs = read_jsonl(file)?;
    if docs.is_empty() {
        println!("No documents found in {}", file.display());
        return Ok(());
    }

    let server = open_server(settings)?.with_model(load_model(settings)?);
    let start = Instant::now();
    let bar = progress.then(|| create_progress_bar(docs.len() as u64, "documents"));

    let total = docs.len();
    let mut indexed = 0;
    let mut docs = docs.into_iter().peekable();
    while docs.peek().is_some() {
        let batch: Vec<Document> = docs.by_ref().take(batch_size).collect();
        let len = batch.len() as u64;
        server.add_documents(batch);
        indexed += server.index(None)?;
        if let Some(bar) = &bar {
            bar.inc(len);
        }
    }

    if let Some(bar) = bar {
        bar.finish_with_message("done");
    }

    let status = server.status();
    println!(
        "Indexed {indexed} of {total} documents in {:.2}s. Index holds {} documents ({} ghost slots).",
        start.elapsed().as_secs_f64(),
        status.documents,
        status.ghost_slots
    );
    Ok(())
}

fn read_jsonl(file: &Path) -> Result<Vec<Document>> {
    let reader = BufReader::new(
        File::open(file).with_context(|| format!("Failed to open {}", file.display()))?,
    );

    let mut docs = Vec::new();
    for (line_number, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", file.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let doc: Document = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid document", file.display(), line_number + 1))?;
        docs.push(doc);
    }
    Ok(docs)
}
