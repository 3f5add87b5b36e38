//! # Knowledge-base assistant CLI (`kba`)
//!
//! Runs the document and question-answering handlers locally, one event at
//! a time, or behind an HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! kba --config ./config/kba.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kba invoke <handler>` | Run `sync`, `upload`, `ask` or `relay` on a JSON event |
//! | `kba ask "<question>"` | Ask a question and print the answer |
//! | `kba upload <file>` | Store a Markdown file and index it |
//! | `kba serve` | Start the HTTP event server |
//!
//! ## Examples
//!
//! ```bash
//! # Replay a storage notification through the sync handler
//! kba invoke sync --event ./events/object-created.json
//!
//! # Pipe an event from another tool
//! cat event.json | kba invoke upload
//!
//! # Ask with conversation memory
//! kba ask "What is the refund policy?" --session support-42
//!
//! # Try event shapes without touching AWS
//! kba --local invoke ask --event ./events/ask.json
//! ```

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use kb_assistant::config;
use kb_assistant::handlers::{self, Handler};
use kb_assistant::ingest;
use kb_assistant::logging::init_logging;
use kb_assistant::memory::InMemoryBackends;
use kb_assistant::server;
use kb_assistant::traits::{Backends, HandlerContext};

/// Knowledge-base assistant: Markdown documents into a search index,
/// questions answered from the index or a language model.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/kba.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "kba",
    about = "Knowledge-base assistant: document sync, upload, question answering and relay",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kba.toml")]
    config: PathBuf,

    /// Use in-memory backends instead of AWS and Telegram.
    ///
    /// Nothing persists between runs. When the config file is missing,
    /// built-in defaults are used.
    #[arg(long, global = true)]
    local: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one handler on a JSON event and print the response envelope.
    Invoke {
        /// Handler: `sync`, `upload`, `ask` or `relay`.
        handler: String,

        /// Event file, or `-` for stdin.
        #[arg(long, default_value = "-")]
        event: String,
    },

    /// Ask a question and print the answer.
    Ask {
        question: String,

        /// Conversation session id.
        #[arg(long)]
        session: Option<String>,

        /// Forward the exchange to the messaging bot.
        ///
        /// Delivery runs in the background and may be cut short when the
        /// command exits.
        #[arg(long)]
        from_frontend: bool,
    },

    /// Store a Markdown file in the bucket and index it.
    Upload {
        file: PathBuf,

        /// Name to store the file under (defaults to the file's name).
        #[arg(long)]
        name: Option<String>,
    },

    /// Start the HTTP event server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = if cli.local {
        config::load_config_or_minimal(&cli.config)?
    } else {
        config::load_config(&cli.config)?
    };
    init_logging(&cfg.logging)?;

    let backends = if cli.local {
        InMemoryBackends::new().backends()
    } else {
        Backends::from_config(&cfg)?
    };
    let ctx = HandlerContext::new(Arc::new(cfg), backends);

    match cli.command {
        Commands::Invoke { handler, event } => {
            let handler: Handler = handler.parse()?;
            let event = read_event(&event)?;
            let response = handlers::invoke(handler, &ctx, &event).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Ask {
            question,
            session,
            from_frontend,
        } => {
            let mut event = json!({ "question": question, "fromFrontend": from_frontend });
            if let Some(session) = session {
                event["session_id"] = json!(session);
            }
            let response = handlers::invoke(Handler::Ask, &ctx, &event).await;
            let body = response.body_json()?;
            let text = body
                .get("response")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if !response.is_success() {
                bail!("{}", text);
            }
            println!("{}", text);
        }
        Commands::Upload { file, name } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let name = match name {
                Some(name) => name,
                None => file
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .context("upload path has no file name")?,
            };
            let outcome = ingest::upload_and_ingest(&ctx, &name, &content).await?;
            println!("stored   {}", outcome.file_key);
            println!("indexed  {} ({})", outcome.processing.document_id, outcome.processing.title);
        }
        Commands::Serve => {
            server::run_server(ctx).await?;
        }
    }

    Ok(())
}

fn read_event(source: &str) -> anyhow::Result<Value> {
    let raw = if source == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read event from stdin")?;
        buf
    } else {
        std::fs::read_to_string(source)
            .with_context(|| format!("Failed to read event file: {}", source))?
    };
    serde_json::from_str(&raw).context("event is not valid JSON")
}
