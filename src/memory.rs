//! In-memory backends.
//!
//! Every backend trait has an implementation here that keeps its state in
//! process memory and records what it was asked to do. The integration
//! tests run all four handlers against these, and they are handy for
//! trying event shapes locally without cloud credentials.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::models::{
    ConversationTurn, FailedDocument, IndexDocument, ModelRequest, QueryRequest, QueryResultItem,
    RelayMessage,
};
use crate::traits::{
    Backends, ConversationStore, LanguageModel, MessageRelay, ObjectStore, RelayDispatcher,
    SearchIndex,
};

/// Lock a mutex, recovering the data if a previous holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============ Object store ============

/// A stored object and its content type.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredBlob {
    pub body: Vec<u8>,
    pub content_type: String,
}

#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<BTreeMap<(String, String), StoredBlob>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object, as if something had already uploaded it.
    pub fn insert(&self, bucket: &str, key: &str, body: impl Into<Vec<u8>>) {
        lock(&self.objects).insert(
            (bucket.to_string(), key.to_string()),
            StoredBlob {
                body: body.into(),
                content_type: "text/markdown".to_string(),
            },
        );
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<StoredBlob> {
        lock(&self.objects)
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// All keys stored in `bucket`, sorted.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        lock(&self.objects)
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        self.get(bucket, key)
            .map(|blob| blob.body)
            .ok_or_else(|| anyhow!("NoSuchKey: s3://{}/{}", bucket, key))
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        lock(&self.objects).insert(
            (bucket.to_string(), key.to_string()),
            StoredBlob {
                body,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }
}

// ============ Search index ============

/// How the in-memory index answers `batch_put_documents`.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum SubmitBehavior {
    /// Accept every document.
    #[default]
    Accept,
    /// Accept the call but report every document as failed.
    RejectDocuments,
    /// Fail the call itself.
    Fail,
}

/// Records submitted documents and answers queries with canned results.
#[derive(Default)]
pub struct InMemorySearchIndex {
    documents: Mutex<Vec<IndexDocument>>,
    results: Mutex<Vec<QueryResultItem>>,
    queries: Mutex<Vec<QueryRequest>>,
    submit: Mutex<SubmitBehavior>,
}

impl InMemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Results returned by every subsequent query.
    pub fn set_results(&self, results: Vec<QueryResultItem>) {
        *lock(&self.results) = results;
    }

    pub fn set_submit_behavior(&self, behavior: SubmitBehavior) {
        *lock(&self.submit) = behavior;
    }

    pub fn documents(&self) -> Vec<IndexDocument> {
        lock(&self.documents).clone()
    }

    pub fn queries(&self) -> Vec<QueryRequest> {
        lock(&self.queries).clone()
    }
}

#[async_trait]
impl SearchIndex for InMemorySearchIndex {
    async fn batch_put_documents(
        &self,
        documents: &[IndexDocument],
    ) -> Result<Vec<FailedDocument>> {
        let behavior = lock(&self.submit).clone();
        match behavior {
            SubmitBehavior::Fail => bail!("BatchPutDocument failed: ServiceUnavailable"),
            SubmitBehavior::RejectDocuments => Ok(documents
                .iter()
                .map(|d| FailedDocument {
                    id: d.id.clone(),
                    error_code: Some("InvalidRequest".to_string()),
                    error_message: "document rejected".to_string(),
                })
                .collect()),
            SubmitBehavior::Accept => {
                lock(&self.documents).extend(documents.iter().cloned());
                Ok(Vec::new())
            }
        }
    }

    async fn query(&self, request: &QueryRequest) -> Result<Vec<QueryResultItem>> {
        lock(&self.queries).push(request.clone());
        let results = lock(&self.results).clone();
        Ok(results
            .into_iter()
            .take(request.page_size.max(0) as usize)
            .collect())
    }
}

// ============ Language model ============

/// Returns a fixed JSON response (or error) and records every prompt.
pub struct StaticModel {
    response: Mutex<std::result::Result<Value, String>>,
    prompts: Mutex<Vec<ModelRequest>>,
}

impl StaticModel {
    pub fn new(response: Value) -> Self {
        Self {
            response: Mutex::new(Ok(response)),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// A model whose every call fails with `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            response: Mutex::new(Err(message.to_string())),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// A model answering in the Anthropic messages shape.
    pub fn answering(text: &str) -> Self {
        Self::new(serde_json::json!({
            "content": [{ "type": "text", "text": text }]
        }))
    }

    pub fn set_response(&self, response: Value) {
        *lock(&self.response) = Ok(response);
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        lock(&self.prompts).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.prompts).len()
    }
}

#[async_trait]
impl LanguageModel for StaticModel {
    async fn invoke(&self, request: &ModelRequest) -> Result<Value> {
        lock(&self.prompts).push(request.clone());
        lock(&self.response).clone().map_err(|e| anyhow!(e))
    }
}

// ============ Conversation store ============

#[derive(Default)]
pub struct InMemoryConversationStore {
    turns: Mutex<Vec<ConversationTurn>>,
    failing: bool,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose reads and writes always fail.
    pub fn failing() -> Self {
        Self {
            turns: Mutex::new(Vec::new()),
            failing: true,
        }
    }

    pub fn insert(&self, turn: ConversationTurn) {
        lock(&self.turns).push(turn);
    }

    /// Turns for a session, oldest first.
    pub fn turns(&self, session_id: &str) -> Vec<ConversationTurn> {
        let mut turns: Vec<_> = lock(&self.turns)
            .iter()
            .filter(|t| t.session_id == session_id)
            .cloned()
            .collect();
        turns.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        turns
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn put_turn(&self, turn: &ConversationTurn) -> Result<()> {
        if self.failing {
            bail!("PutItem failed: ResourceNotFoundException");
        }
        let mut turns = lock(&self.turns);
        // Same key replaces, as a keyed table would.
        turns.retain(|t| !(t.session_id == turn.session_id && t.timestamp == turn.timestamp));
        turns.push(turn.clone());
        Ok(())
    }

    async fn recent_turns(&self, session_id: &str, limit: usize) -> Result<Vec<ConversationTurn>> {
        if self.failing {
            bail!("Query failed: ResourceNotFoundException");
        }
        let mut turns = self.turns(session_id);
        turns.reverse();
        turns.truncate(limit);
        Ok(turns)
    }
}

// ============ Relay ============

/// Records delivered messages; optionally fails every send.
#[derive(Default)]
pub struct RecordingRelay {
    sent: Mutex<Vec<RelayMessage>>,
    attempts: AtomicUsize,
    failing: bool,
}

impl RecordingRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<RelayMessage> {
        lock(&self.sent).clone()
    }

    /// Sends attempted, including failed ones.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageRelay for RecordingRelay {
    async fn send(&self, message: &RelayMessage) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            bail!("Telegram sendMessage failed (HTTP 400): chat not found");
        }
        lock(&self.sent).push(message.clone());
        Ok(())
    }
}

/// Records dispatched messages instead of spawning delivery tasks.
#[derive(Default)]
pub struct RecordingDispatcher {
    dispatched: Mutex<Vec<RelayMessage>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatched(&self) -> Vec<RelayMessage> {
        lock(&self.dispatched).clone()
    }
}

impl RelayDispatcher for RecordingDispatcher {
    fn dispatch(&self, message: RelayMessage) {
        lock(&self.dispatched).push(message);
    }
}

// ============ Bundle ============

/// Concrete handles to every in-memory backend, for inspection after a run.
#[derive(Clone)]
pub struct InMemoryBackends {
    pub objects: Arc<InMemoryObjectStore>,
    pub index: Arc<InMemorySearchIndex>,
    pub model: Arc<StaticModel>,
    pub conversations: Arc<InMemoryConversationStore>,
    pub relay: Arc<RecordingRelay>,
    pub dispatcher: Arc<RecordingDispatcher>,
}

impl Default for InMemoryBackends {
    fn default() -> Self {
        Self {
            objects: Arc::new(InMemoryObjectStore::new()),
            index: Arc::new(InMemorySearchIndex::new()),
            model: Arc::new(StaticModel::answering("I don't know.")),
            conversations: Arc::new(InMemoryConversationStore::new()),
            relay: Arc::new(RecordingRelay::new()),
            dispatcher: Arc::new(RecordingDispatcher::new()),
        }
    }
}

impl InMemoryBackends {
    pub fn new() -> Self {
        Self::default()
    }

    /// Type-erased handles for a [`crate::traits::HandlerContext`].
    pub fn backends(&self) -> Backends {
        Backends {
            objects: self.objects.clone(),
            index: self.index.clone(),
            model: self.model.clone(),
            conversations: self.conversations.clone(),
            relay: self.relay.clone(),
            dispatcher: self.dispatcher.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AnswerSource;

    fn turn(ts: &str) -> ConversationTurn {
        ConversationTurn {
            session_id: "s".into(),
            timestamp: ts.into(),
            question: format!("q{}", ts),
            answer: "a".into(),
            source: AnswerSource::Kendra,
        }
    }

    #[tokio::test]
    async fn test_recent_turns_newest_first_and_limited() {
        let store = InMemoryConversationStore::new();
        for ts in ["1", "3", "2", "4"] {
            store.put_turn(&turn(ts)).await.unwrap();
        }
        let recent = store.recent_turns("s", 3).await.unwrap();
        let order: Vec<_> = recent.iter().map(|t| t.timestamp.as_str()).collect();
        assert_eq!(order, vec!["4", "3", "2"]);
        assert!(store.recent_turns("other", 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_object_store_round_trip() {
        let store = InMemoryObjectStore::new();
        store
            .put_object("b", "k.md", b"# hi".to_vec(), "text/markdown")
            .await
            .unwrap();
        assert_eq!(store.get_object("b", "k.md").await.unwrap(), b"# hi");
        assert!(store.get_object("b", "missing").await.is_err());
        assert_eq!(store.keys("b"), vec!["k.md"]);
    }

    #[tokio::test]
    async fn test_index_respects_page_size() {
        let index = InMemorySearchIndex::new();
        index.set_results(vec![QueryResultItem::default(); 8]);
        let hits = index
            .query(&QueryRequest {
                text: "x".into(),
                page_size: 5,
                language_code: "en".into(),
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 5);
        assert_eq!(index.queries().len(), 1);
    }
}
