//! # kb-assistant
//!
//! Event handlers that keep a Markdown knowledge base in a hosted search
//! index and answer questions from it, with conversation memory and a
//! language-model fallback.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────┐   ┌───────────────────┐
//! │ Events       │──▶│ normalize  │──▶│ handlers          │
//! │ storage/HTTP │   │ shapes     │   │ sync upload ask   │
//! └──────────────┘   └────────────┘   │ relay             │
//!                                     └────────┬──────────┘
//!                                              │ traits (Arc<dyn …>)
//!               ┌──────────┬──────────┬────────┴─┬───────────┐
//!               ▼          ▼          ▼          ▼           ▼
//!              S3       Kendra     Bedrock    DynamoDB    Telegram
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kba invoke sync --event object-created.json
//! kba upload ./docs/refunds.md
//! kba ask "How long do refunds take?" --session s-1
//! kba serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | Tracing subscriber setup |
//! | [`error`] | Handler error kinds and status mapping |
//! | [`models`] | Core data types and the response envelope |
//! | [`normalize`] | Event shape recognition |
//! | [`markdown`] | Markdown rendering and markup stripping |
//! | [`traits`] | Backend seams and the handler context |
//! | [`aws`] | SigV4 signing and signed requests |
//! | [`s3`], [`kendra`], [`bedrock`], [`dynamo`], [`telegram`] | Service clients |
//! | [`memory`] | In-memory backends |
//! | [`ingest`] | Document ingestion pipeline |
//! | [`handlers`] | The four handlers |
//! | [`server`] | HTTP event server |

pub mod aws;
pub mod bedrock;
pub mod config;
pub mod dynamo;
pub mod error;
pub mod handlers;
pub mod ingest;
pub mod kendra;
pub mod logging;
pub mod markdown;
pub mod memory;
pub mod models;
pub mod normalize;
pub mod s3;
pub mod server;
pub mod telegram;
pub mod traits;
