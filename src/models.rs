//! Core data models shared by the handlers and backend clients.
//!
//! These types describe what flows between the event normalizer, the
//! pipelines, and the external services: index documents, conversation
//! turns, relay messages, and the response envelope every handler returns.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Attribute key the index uses for document language.
pub const LANGUAGE_ATTRIBUTE: &str = "_language_code";

/// Where an answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerSource {
    Kendra,
    Claude,
    None,
}

impl AnswerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerSource::Kendra => "kendra",
            AnswerSource::Claude => "claude",
            AnswerSource::None => "none",
        }
    }

    /// Unknown labels read back from storage map to `None`.
    pub fn from_label(label: &str) -> Self {
        match label {
            "kendra" => AnswerSource::Kendra,
            "claude" => AnswerSource::Claude,
            _ => AnswerSource::None,
        }
    }
}

/// One question/answer exchange, keyed by `(session_id, timestamp)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub session_id: String,
    /// ISO-8601 with microseconds; lexical order is chronological order.
    pub timestamp: String,
    pub question: String,
    pub answer: String,
    pub source: AnswerSource,
}

/// Format a turn timestamp the way the conversation table sorts it.
pub fn turn_timestamp(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

/// Value of a single index document attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    String(String),
    Date(DateTime<Utc>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentAttribute {
    pub key: String,
    pub value: AttributeValue,
}

impl DocumentAttribute {
    pub fn string(key: &str, value: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            value: AttributeValue::String(value.into()),
        }
    }

    pub fn date(key: &str, value: DateTime<Utc>) -> Self {
        Self {
            key: key.to_string(),
            value: AttributeValue::Date(value),
        }
    }
}

/// A document ready for submission to the search index.
#[derive(Debug, Clone)]
pub struct IndexDocument {
    pub id: String,
    pub title: String,
    /// Rendered HTML bytes.
    pub blob: Vec<u8>,
    pub content_type: String,
    pub attributes: Vec<DocumentAttribute>,
}

impl IndexDocument {
    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes
            .iter()
            .find(|a| a.key == key)
            .map(|a| &a.value)
    }
}

/// Per-document failure reported inside an otherwise successful batch call.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedDocument {
    pub id: String,
    pub error_code: Option<String>,
    pub error_message: String,
}

/// A search request, filtered to a single language.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub text: String,
    pub page_size: i64,
    pub language_code: String,
}

/// One ranked hit from the search index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResultItem {
    pub document_id: Option<String>,
    pub document_title: Option<String>,
    pub excerpt: Option<String>,
}

/// Request for a single text generation.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub prompt: String,
    pub max_tokens: u32,
}

/// A question/answer pair forwarded to the messaging bot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayMessage {
    pub question: String,
    pub answer: String,
}

impl RelayMessage {
    pub fn text(&self) -> String {
        format!(
            "🧑 User's Question: {}\n🤖 Chatbot's Answer: {}",
            self.question, self.answer
        )
    }
}

/// The envelope every handler returns: `{statusCode, headers, body}`.
///
/// `body` is a JSON-encoded string, following the API gateway proxy
/// convention.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HandlerResponse {
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl HandlerResponse {
    pub fn new(status_code: u16, body: &Value) -> Self {
        Self {
            status_code,
            headers: BTreeMap::new(),
            body: body.to_string(),
        }
    }

    /// Add the permissive cross-origin and JSON content-type headers.
    pub fn with_cors(mut self) -> Self {
        self.headers
            .insert("Access-Control-Allow-Origin".to_string(), "*".to_string());
        self.headers
            .insert("Content-Type".to_string(), "application/json".to_string());
        self
    }

    /// Decode `body` back into JSON.
    pub fn body_json(&self) -> serde_json::Result<Value> {
        serde_json::from_str(&self.body)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}
