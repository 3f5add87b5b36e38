//! DynamoDB conversation store.
//!
//! Turns live in a table keyed by `session_id` (partition) and
//! `timestamp` (sort). Every attribute is stored as a string, so the
//! table needs no schema beyond its key.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::aws::{AwsClient, Endpoint, JsonProtocol};
use crate::config::MemoryConfig;
use crate::models::{AnswerSource, ConversationTurn};
use crate::traits::ConversationStore;

const TARGET_PREFIX: &str = "DynamoDB_20120810";

pub struct DynamoConversationStore {
    client: Arc<AwsClient>,
    table: String,
    region: Option<String>,
    endpoint: Endpoint,
}

impl DynamoConversationStore {
    pub fn new(client: Arc<AwsClient>, config: &MemoryConfig) -> Self {
        let region = config
            .region
            .clone()
            .unwrap_or_else(|| client.region().to_string());
        let endpoint = Endpoint::resolve(
            config.endpoint_url.as_deref(),
            format!("dynamodb.{}.amazonaws.com", region),
        );
        Self {
            client,
            table: config.table.clone(),
            region: config.region.clone(),
            endpoint,
        }
    }

    async fn call(&self, operation: &str, payload: &Value) -> Result<Value> {
        self.client
            .call_json(
                &self.endpoint,
                "dynamodb",
                JsonProtocol::V1_0,
                &format!("{}.{}", TARGET_PREFIX, operation),
                payload,
                self.region.as_deref(),
            )
            .await
    }
}

#[async_trait]
impl ConversationStore for DynamoConversationStore {
    async fn put_turn(&self, turn: &ConversationTurn) -> Result<()> {
        self.call("PutItem", &put_item_payload(&self.table, turn))
            .await?;
        Ok(())
    }

    async fn recent_turns(&self, session_id: &str, limit: usize) -> Result<Vec<ConversationTurn>> {
        let response = self
            .call("Query", &query_payload(&self.table, session_id, limit))
            .await?;
        Ok(parse_turns(&response))
    }
}

/// `PutItem` body storing one turn as string attributes.
pub fn put_item_payload(table: &str, turn: &ConversationTurn) -> Value {
    json!({
        "TableName": table,
        "Item": {
            "session_id": { "S": turn.session_id },
            "timestamp": { "S": turn.timestamp },
            "question": { "S": turn.question },
            "answer": { "S": turn.answer },
            "source": { "S": turn.source.as_str() },
        }
    })
}

/// `Query` body for the newest `limit` turns of a session.
pub fn query_payload(table: &str, session_id: &str, limit: usize) -> Value {
    json!({
        "TableName": table,
        "KeyConditionExpression": "session_id = :sid",
        "ExpressionAttributeValues": {
            ":sid": { "S": session_id }
        },
        "ScanIndexForward": false,
        "Limit": limit,
    })
}

fn string_attr(item: &Value, name: &str) -> Option<String> {
    item.get(name)
        .and_then(|v| v.get("S"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Read turns out of a `Query` response, in the order returned.
///
/// Items missing a key attribute are skipped; missing text attributes read
/// as empty strings.
pub fn parse_turns(response: &Value) -> Vec<ConversationTurn> {
    let Some(items) = response.get("Items").and_then(Value::as_array) else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            Some(ConversationTurn {
                session_id: string_attr(item, "session_id")?,
                timestamp: string_attr(item, "timestamp")?,
                question: string_attr(item, "question").unwrap_or_default(),
                answer: string_attr(item, "answer").unwrap_or_default(),
                source: string_attr(item, "source")
                    .map(|s| AnswerSource::from_label(&s))
                    .unwrap_or(AnswerSource::None),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn() -> ConversationTurn {
        ConversationTurn {
            session_id: "s1".into(),
            timestamp: "2024-05-01T10:00:00.000001".into(),
            question: "What is the refund window?".into(),
            answer: "30 days".into(),
            source: AnswerSource::Kendra,
        }
    }

    #[test]
    fn test_put_item_payload() {
        let payload = put_item_payload("ChatbotMemory", &turn());
        assert_eq!(payload["TableName"], "ChatbotMemory");
        assert_eq!(payload["Item"]["session_id"]["S"], "s1");
        assert_eq!(payload["Item"]["source"]["S"], "kendra");
    }

    #[test]
    fn test_query_payload_newest_first() {
        let payload = query_payload("ChatbotMemory", "s1", 3);
        assert_eq!(payload["ScanIndexForward"], false);
        assert_eq!(payload["Limit"], 3);
        assert_eq!(payload["ExpressionAttributeValues"][":sid"]["S"], "s1");
    }

    #[test]
    fn test_parse_turns() {
        let resp = json!({"Items": [
            {
                "session_id": {"S": "s1"},
                "timestamp": {"S": "2024-05-01T10:00:00.000002"},
                "question": {"S": "q2"},
                "answer": {"S": "a2"},
                "source": {"S": "claude"}
            },
            {"session_id": {"S": "s1"}}
        ]});
        let turns = parse_turns(&resp);
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].question, "q2");
        assert_eq!(turns[0].source, AnswerSource::Claude);
        assert!(parse_turns(&json!({})).is_empty());
    }
}
