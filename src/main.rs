//! # docchat CLI
//!
//! The `docchat` binary starts the chat server and offers a few offline
//! commands against the same stores.
//!
//! ## Usage
//!
//! ```bash
//! docchat --config ./config/docchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docchat serve` | Start the HTTP server and chat UI |
//! | `docchat ingest <PATH>...` | Index local files into the `documents` namespace |
//! | `docchat ask "<question>"` | Ask one question and print the answer |
//! | `docchat status` | Show every namespace's chunk and source counts |
//! | `docchat clear <namespace>` | Drop a namespace's index and files |
//!
//! Log verbosity is controlled with `DOCCHAT_LOG` (default `info`).

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use docchat::chat::{ChatEngine, RetrievalMode};
use docchat::config::load_config;
use docchat::scan::{load_document, scan_paths};
use docchat::server::run_server;
use docchat_core::Namespace;
use tracing_subscriber::EnvFilter;

/// docchat: chat with your documents, wiki pages, and the web.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docchat.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "docchat", version, about = "Retrieval-augmented chat over documents")]
struct Cli {
    /// Path to configuration file (TOML). A missing file means defaults.
    #[arg(long, global = true, default_value = "./config/docchat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    Serve,

    /// Index local files or directories into the `documents` namespace.
    ///
    /// Directories are walked recursively and filtered with the
    /// `[ingest]` include/exclude globs.
    Ingest {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Ask a single question and print the answer with its sources.
    Ask {
        question: String,

        /// Retrieval mode: documents, web, confluence, octane.
        #[arg(long, default_value = "documents")]
        mode: String,

        /// Confluence space keys (repeatable).
        #[arg(long = "space")]
        spaces: Vec<String>,

        /// Octane shared space id.
        #[arg(long)]
        shared_space: Option<String>,

        /// Octane workspace id.
        #[arg(long)]
        workspace: Option<String>,
    },

    /// Show the status of every namespace.
    Status,

    /// Clear one namespace.
    Clear { namespace: String },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("DOCCHAT_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            run_server(&cfg).await?;
        }
        Commands::Ingest { paths } => {
            let engine = ChatEngine::from_config(&cfg)?;
            let files = scan_paths(&paths, &cfg.ingest)?;
            if files.is_empty() {
                println!("No matching files.");
                return Ok(());
            }

            let mut total = 0;
            let mut failed = 0;
            for file in &files {
                let result = match load_document(file) {
                    Ok(doc) => engine
                        .ingest(None, Namespace::Documents, doc)
                        .await
                        .map_err(anyhow::Error::from),
                    Err(e) => Err(e),
                };
                match result {
                    Ok(report) => {
                        total += report.chunks;
                        println!("  {} ({} chunks)", file.source_id, report.chunks);
                    }
                    Err(e) => {
                        failed += 1;
                        println!("  {} FAILED: {:#}", file.source_id, e);
                    }
                }
            }
            println!(
                "Ingested {} chunks from {} files ({} failed).",
                total,
                files.len() - failed,
                failed
            );
        }
        Commands::Ask {
            question,
            mode,
            spaces,
            shared_space,
            workspace,
        } => {
            let engine = ChatEngine::from_config(&cfg)?;
            let mode = RetrievalMode::from_parts(&mode, spaces, shared_space, workspace)?;
            let reply = engine.ask(None, &mode, &question).await;

            for notice in &reply.notices {
                println!("note: {}", notice);
            }
            if let Some(error) = &reply.error {
                anyhow::bail!("{}", error);
            }
            println!("{}", reply.answer);
            if !reply.sources.is_empty() {
                println!();
                println!("Sources:");
                for source in &reply.sources {
                    let locator = source.locator.as_deref().unwrap_or(&source.source_id);
                    println!("  [{}] {} ({:.3}) {}", source.index, source.label, source.score, locator);
                }
            }
        }
        Commands::Status => {
            let engine = ChatEngine::from_config(&cfg)?;
            println!("{:<12} {:>8} {:>8} {:>6}", "NAMESPACE", "CHUNKS", "SOURCES", "DIM");
            for status in engine.status() {
                println!(
                    "{:<12} {:>8} {:>8} {:>6}",
                    status.namespace.as_str(),
                    status.chunks,
                    status.sources.len(),
                    status
                        .dimension
                        .map(|d| d.to_string())
                        .unwrap_or_else(|| "-".to_string())
                );
            }
        }
        Commands::Clear { namespace } => {
            let namespace: Namespace = namespace.parse()?;
            let engine = ChatEngine::from_config(&cfg)?;
            engine
                .clear(namespace)
                .await
                .with_context(|| format!("failed to clear {}", namespace))?;
            println!("Cleared {}.", namespace);
        }
    }

    Ok(())
}
