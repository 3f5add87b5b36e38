//! Backend seams for the handlers.
//!
//! Every external service the handlers touch sits behind a trait, so the
//! pipelines can run against AWS in production and against the in-memory
//! doubles in [`crate::memory`] in tests.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                      HandlerContext                       │
//! │   Config   +   Backends (constructed once per process)    │
//! │  ┌──────────┐ ┌───────────┐ ┌─────────┐ ┌──────────────┐  │
//! │  │ObjectSto-│ │SearchIndex│ │Language-│ │Conversation- │  │
//! │  │re (S3)   │ │ (Kendra)  │ │Model    │ │Store (Dynamo)│  │
//! │  └──────────┘ └───────────┘ └─────────┘ └──────────────┘  │
//! │  ┌──────────────────┐  ┌──────────────────────────────┐   │
//! │  │MessageRelay (bot)│◀─│RelayDispatcher (detached task)│  │
//! │  └──────────────────┘  └──────────────────────────────┘   │
//! └──────────────────────────┬────────────────────────────────┘
//!                            ▼
//!            sync / upload / ask / relay handlers
//! ```

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::aws::{AwsClient, AwsCredentials};
use crate::bedrock::BedrockModel;
use crate::config::Config;
use crate::dynamo::DynamoConversationStore;
use crate::kendra::KendraIndex;
use crate::models::{
    ConversationTurn, FailedDocument, IndexDocument, ModelRequest, QueryRequest, QueryResultItem,
    RelayMessage,
};
use crate::s3::S3ObjectStore;
use crate::telegram::{DisabledRelay, TelegramRelay};

// ═══════════════════════════════════════════════════════════════════════
// Service traits
// ═══════════════════════════════════════════════════════════════════════

/// Object storage holding the Markdown sources.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object's raw bytes.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;

    /// Write an object, replacing any existing one at `key`.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<()>;
}

/// The hosted search index.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Submit documents in one batch call.
    ///
    /// Returns the documents the service rejected inside an otherwise
    /// successful call; an `Err` means the call itself failed.
    async fn batch_put_documents(&self, documents: &[IndexDocument])
        -> Result<Vec<FailedDocument>>;

    /// Run a query and return hits in rank order.
    async fn query(&self, request: &QueryRequest) -> Result<Vec<QueryResultItem>>;
}

/// The hosted text-generation model.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Invoke the model and return its raw JSON response.
    ///
    /// Interpreting the response shape is left to the caller, which decides
    /// what counts as unusable.
    async fn invoke(&self, request: &ModelRequest) -> Result<Value>;
}

/// Key-sorted storage for conversation turns.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn put_turn(&self, turn: &ConversationTurn) -> Result<()>;

    /// The `limit` most recent turns for a session, newest first.
    async fn recent_turns(&self, session_id: &str, limit: usize) -> Result<Vec<ConversationTurn>>;
}

/// The messaging bot.
#[async_trait]
pub trait MessageRelay: Send + Sync {
    /// Deliver one message. No retries.
    async fn send(&self, message: &RelayMessage) -> Result<()>;
}

/// Hands relay messages off without waiting for delivery.
pub trait RelayDispatcher: Send + Sync {
    /// Schedule delivery and return immediately. Delivery failures are
    /// logged by the dispatcher and never reach the caller.
    fn dispatch(&self, message: RelayMessage);
}

/// Dispatches each message on its own detached tokio task.
///
/// Must be called from within a tokio runtime. The spawned task is never
/// joined; if the process exits first, the message is lost.
pub struct TaskRelayDispatcher {
    relay: Arc<dyn MessageRelay>,
}

impl TaskRelayDispatcher {
    pub fn new(relay: Arc<dyn MessageRelay>) -> Self {
        Self { relay }
    }
}

impl RelayDispatcher for TaskRelayDispatcher {
    fn dispatch(&self, message: RelayMessage) {
        let relay = self.relay.clone();
        tokio::spawn(async move {
            match relay.send(&message).await {
                Ok(()) => info!("relayed question to messaging bot"),
                Err(e) => warn!(error = %format!("{:#}", e), "relay delivery failed"),
            }
        });
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Backends
// ═══════════════════════════════════════════════════════════════════════

/// The set of service handles the handlers run against.
///
/// Cloning is cheap: every handle is an `Arc`.
#[derive(Clone)]
pub struct Backends {
    pub objects: Arc<dyn ObjectStore>,
    pub index: Arc<dyn SearchIndex>,
    pub model: Arc<dyn LanguageModel>,
    pub conversations: Arc<dyn ConversationStore>,
    pub relay: Arc<dyn MessageRelay>,
    pub dispatcher: Arc<dyn RelayDispatcher>,
}

impl Backends {
    /// Build the AWS-backed handles described by the config.
    ///
    /// AWS credentials are required. The messaging relay is optional: when
    /// no bot token or chat id is configured, a [`DisabledRelay`] is used and
    /// relay attempts fail with a descriptive error.
    pub fn from_config(config: &Config) -> Result<Self> {
        let credentials = AwsCredentials::from_env()?;
        let aws = Arc::new(AwsClient::new(
            credentials,
            config.aws.region.clone(),
            config.aws.timeout_secs,
        )?);

        let relay: Arc<dyn MessageRelay> = match TelegramRelay::from_config(config) {
            Ok(relay) => Arc::new(relay),
            Err(e) => {
                warn!(error = %e, "messaging relay not configured; relay disabled");
                Arc::new(DisabledRelay)
            }
        };

        Ok(Self {
            objects: Arc::new(S3ObjectStore::new(aws.clone(), &config.storage)),
            index: Arc::new(KendraIndex::new(aws.clone(), &config.index)),
            model: Arc::new(BedrockModel::new(aws.clone(), &config.model)),
            conversations: Arc::new(DynamoConversationStore::new(aws, &config.memory)),
            dispatcher: Arc::new(TaskRelayDispatcher::new(relay.clone())),
            relay,
        })
    }
}

/// Everything a handler invocation needs: configuration plus backends.
///
/// Created once per process and shared across invocations.
#[derive(Clone)]
pub struct HandlerContext {
    pub config: Arc<Config>,
    pub backends: Backends,
}

impl HandlerContext {
    pub fn new(config: Arc<Config>, backends: Backends) -> Self {
        Self { config, backends }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::RecordingRelay;
    use std::time::Duration;

    #[tokio::test]
    async fn test_task_dispatcher_delivers_in_background() {
        let relay = Arc::new(RecordingRelay::new());
        let dispatcher = TaskRelayDispatcher::new(relay.clone());

        dispatcher.dispatch(RelayMessage {
            question: "q".to_string(),
            answer: "a".to_string(),
        });

        for _ in 0..50 {
            if !relay.sent().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(relay.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_task_dispatcher_swallows_failures() {
        let relay = Arc::new(RecordingRelay::failing());
        let dispatcher = TaskRelayDispatcher::new(relay.clone());
        dispatcher.dispatch(RelayMessage {
            question: "q".to_string(),
            answer: "a".to_string(),
        });

        for _ in 0..50 {
            if relay.attempts() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(relay.attempts(), 1);
        assert!(relay.sent().is_empty());
    }
}
