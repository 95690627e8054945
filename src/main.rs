//! # ragchat CLI
//!
//! ```bash
//! ragchat --config ./config/ragchat.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragchat init` | Create the SQLite database and run schema migrations |
//! | `ragchat ingest <location>` | Run the ingestion pipeline for one document |
//! | `ragchat status <id>` | Show a document's status record |
//! | `ragchat documents` | List all document status records |
//! | `ragchat chat "<question>"` | Run one chat turn |
//! | `ragchat expire-stale` | Fail runs stuck in PENDING/PROCESSING |
//! | `ragchat serve` | Start the HTTP server |
//!
//! Logs go to stderr and honour `RUST_LOG` (default `info`).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::bail;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ragchat::app::{build_chat, build_pipeline, open_stores};
use ragchat::blob;
use ragchat::chat::{ChatRequest, ProviderConfig};
use ragchat::config;
use ragchat::ingest::expire_stale_runs;
use ragchat::migrate;
use ragchat::server;
use ragchat_core::store::DocumentStatusStore;

/// ragchat: document ingestion and retrieval-augmented chat.
#[derive(Parser)]
#[command(name = "ragchat", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ragchat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Ingest one document and wait for the run to finish.
    Ingest {
        /// Blob location, e.g. `public/brochure.pdf` or `s3://bucket/public/brochure.pdf`.
        location: String,
    },

    /// Show the status record of a document.
    Status {
        /// Document id (location without the `public/` prefix and spaces).
        id: String,
    },

    /// List all documents, most recently updated first.
    Documents,

    /// Ask one question.
    ///
    /// Pass `--conversation` with the id printed by a previous call to
    /// continue that conversation.
    Chat {
        question: String,

        #[arg(long)]
        conversation: Option<String>,

        /// Document whose index answers a new conversation.
        #[arg(long)]
        document: Option<String>,

        /// Provider id or short name (claude, titan, jurassic).
        #[arg(long)]
        provider: Option<String>,
    },

    /// Mark runs with no progress for `pipeline.stale_after_secs` as FAILED.
    ExpireStale,

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { location } => {
            let stores = open_stores(&cfg).await?;
            let blobs = blob::from_config(&cfg.storage)?;
            let Some(pipeline) = build_pipeline(&cfg, blobs, stores.documents.clone())? else {
                bail!("Ingestion requires an [embedding] provider.");
            };
            let outcome = pipeline.ingest(&location).await?;
            println!("ingest {}", outcome.document_id);
            println!("  run:      {}", outcome.run_id);
            println!("  status:   {}", outcome.status);
            println!("  passages: {}", outcome.passages);
            if let Some(pointer) = &outcome.index_pointer {
                println!("  index:    {}", pointer);
            }
            if let Some((stage, class)) = outcome.failure {
                bail!("ingestion failed at {} ({})", stage, class);
            }
        }
        Commands::Status { id } => {
            let stores = open_stores(&cfg).await?;
            match stores.documents.get(&id).await? {
                Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                None => bail!("document not found: {}", id),
            }
        }
        Commands::Documents => {
            let stores = open_stores(&cfg).await?;
            let records = stores.documents.list().await?;
            if records.is_empty() {
                println!("No documents.");
            }
            for r in records {
                println!(
                    "{:<40} {:<10} {}  {}",
                    r.id,
                    r.status,
                    r.updated_at.format("%Y-%m-%d %H:%M:%S"),
                    r.index_pointer.as_deref().unwrap_or("-")
                );
            }
        }
        Commands::Chat {
            question,
            conversation,
            document,
            provider,
        } => {
            let stores = open_stores(&cfg).await?;
            let blobs = blob::from_config(&cfg.storage)?;
            let engine = build_chat(&cfg, blobs, &stores)?;
            let reply = engine
                .turn(ChatRequest {
                    question,
                    conversation_id: conversation,
                    provider_config: Some(ProviderConfig {
                        provider,
                        document_id: document,
                        ..Default::default()
                    }),
                    token: None,
                })
                .await?;
            println!("{}", reply.answer);
            for s in &reply.sources {
                println!("  source: {} ({})", s.file_name, s.access_url);
            }
            println!("conversation: {}", reply.conversation_id);
        }
        Commands::ExpireStale => {
            let stores = open_stores(&cfg).await?;
            let ttl = chrono::Duration::seconds(cfg.pipeline.stale_after_secs as i64);
            let documents: Arc<dyn DocumentStatusStore> = stores.documents;
            let expired = expire_stale_runs(documents.as_ref(), ttl, Utc::now()).await?;
            println!("expired {} stale run(s)", expired.len());
            for id in expired {
                println!("  {}", id);
            }
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
