//! Amazon Kendra search index.
//!
//! Submits documents with `BatchPutDocument` and answers questions with
//! `Query`, both over the Kendra JSON 1.1 API. Request and response bodies
//! are built and read by small pure functions so they can be tested
//! without a network.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};

use crate::aws::{AwsClient, Endpoint, JsonProtocol};
use crate::config::IndexConfig;
use crate::models::{
    AttributeValue, FailedDocument, IndexDocument, QueryRequest, QueryResultItem,
    LANGUAGE_ATTRIBUTE,
};
use crate::traits::SearchIndex;

const TARGET_PREFIX: &str = "AWSKendraFrontendService";

pub struct KendraIndex {
    client: Arc<AwsClient>,
    index_id: String,
    region: Option<String>,
    endpoint: Endpoint,
}

impl KendraIndex {
    pub fn new(client: Arc<AwsClient>, config: &IndexConfig) -> Self {
        let region = config
            .region
            .clone()
            .unwrap_or_else(|| client.region().to_string());
        let endpoint = Endpoint::resolve(
            config.endpoint_url.as_deref(),
            format!("kendra.{}.amazonaws.com", region),
        );
        Self {
            client,
            index_id: config.index_id.clone(),
            region: config.region.clone(),
            endpoint,
        }
    }

    async fn call(&self, operation: &str, payload: &Value) -> Result<Value> {
        self.client
            .call_json(
                &self.endpoint,
                "kendra",
                JsonProtocol::V1_1,
                &format!("{}.{}", TARGET_PREFIX, operation),
                payload,
                self.region.as_deref(),
            )
            .await
    }
}

#[async_trait]
impl SearchIndex for KendraIndex {
    async fn batch_put_documents(
        &self,
        documents: &[IndexDocument],
    ) -> Result<Vec<FailedDocument>> {
        let payload = batch_put_payload(&self.index_id, documents);
        let response = self.call("BatchPutDocument", &payload).await?;
        Ok(parse_failed_documents(&response))
    }

    async fn query(&self, request: &QueryRequest) -> Result<Vec<QueryResultItem>> {
        let payload = query_payload(&self.index_id, request);
        let response = self.call("Query", &payload).await?;
        Ok(parse_result_items(&response))
    }
}

fn attribute_json(value: &AttributeValue) -> Value {
    match value {
        AttributeValue::String(s) => json!({ "StringValue": s }),
        // The JSON protocol carries timestamps as epoch seconds.
        AttributeValue::Date(d) => json!({ "DateValue": d.timestamp() }),
    }
}

/// Build the `BatchPutDocument` request body.
pub fn batch_put_payload(index_id: &str, documents: &[IndexDocument]) -> Value {
    let documents: Vec<Value> = documents
        .iter()
        .map(|doc| {
            let mut entry = json!({
                "Id": doc.id,
                "Title": doc.title,
                "Blob": STANDARD.encode(&doc.blob),
                "ContentType": doc.content_type,
            });
            if !doc.attributes.is_empty() {
                entry["Attributes"] = doc
                    .attributes
                    .iter()
                    .map(|a| json!({ "Key": a.key, "Value": attribute_json(&a.value) }))
                    .collect();
            }
            entry
        })
        .collect();

    json!({ "IndexId": index_id, "Documents": documents })
}

/// Read `FailedDocuments` from a `BatchPutDocument` response.
pub fn parse_failed_documents(response: &Value) -> Vec<FailedDocument> {
    response
        .get("FailedDocuments")
        .and_then(Value::as_array)
        .map(|failed| {
            failed
                .iter()
                .map(|f| FailedDocument {
                    id: f
                        .get("Id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    error_code: f
                        .get("ErrorCode")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    error_message: f
                        .get("ErrorMessage")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Build the `Query` request body, filtered to the request's language.
pub fn query_payload(index_id: &str, request: &QueryRequest) -> Value {
    json!({
        "IndexId": index_id,
        "QueryText": request.text,
        "PageSize": request.page_size,
        "AttributeFilter": {
            "EqualsTo": {
                "Key": LANGUAGE_ATTRIBUTE,
                "Value": { "StringValue": request.language_code }
            }
        }
    })
}

/// Read `ResultItems` from a `Query` response, keeping rank order.
pub fn parse_result_items(response: &Value) -> Vec<QueryResultItem> {
    let text_of = |item: &Value, field: &str| {
        item.get(field)
            .and_then(|f| f.get("Text"))
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    response
        .get("ResultItems")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| QueryResultItem {
                    document_id: item
                        .get("DocumentId")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    document_title: text_of(item, "DocumentTitle"),
                    excerpt: text_of(item, "DocumentExcerpt"),
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentAttribute;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_batch_put_payload() {
        let doc = IndexDocument {
            id: "uploads-a.md-123".to_string(),
            title: "a".to_string(),
            blob: b"<p>hi</p>".to_vec(),
            content_type: "HTML".to_string(),
            attributes: vec![
                DocumentAttribute::string(LANGUAGE_ATTRIBUTE, "en"),
                DocumentAttribute::date(
                    "updated_at",
                    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                ),
            ],
        };
        let payload = batch_put_payload("idx", &[doc]);
        let entry = &payload["Documents"][0];
        assert_eq!(payload["IndexId"], "idx");
        assert_eq!(entry["Blob"], STANDARD.encode("<p>hi</p>"));
        assert_eq!(entry["ContentType"], "HTML");
        assert_eq!(entry["Attributes"][0]["Key"], "_language_code");
        assert_eq!(entry["Attributes"][0]["Value"]["StringValue"], "en");
        assert_eq!(entry["Attributes"][1]["Value"]["DateValue"], 1704067200);
    }

    #[test]
    fn test_payload_omits_empty_attributes() {
        let doc = IndexDocument {
            id: "k".into(),
            title: "k".into(),
            blob: vec![],
            content_type: "HTML".into(),
            attributes: vec![],
        };
        let payload = batch_put_payload("idx", &[doc]);
        assert!(payload["Documents"][0].get("Attributes").is_none());
    }

    #[test]
    fn test_parse_failed_documents() {
        let resp = json!({"FailedDocuments": [{"Id": "d1", "ErrorCode": "InvalidRequest", "ErrorMessage": "too big"}]});
        let failed = parse_failed_documents(&resp);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, "d1");
        assert_eq!(failed[0].error_code.as_deref(), Some("InvalidRequest"));
        assert!(parse_failed_documents(&json!({})).is_empty());
    }

    #[test]
    fn test_query_payload_filters_language() {
        let payload = query_payload(
            "idx",
            &QueryRequest {
                text: "refunds?".into(),
                page_size: 5,
                language_code: "en".into(),
            },
        );
        assert_eq!(payload["PageSize"], 5);
        assert_eq!(payload["AttributeFilter"]["EqualsTo"]["Key"], "_language_code");
        assert_eq!(
            payload["AttributeFilter"]["EqualsTo"]["Value"]["StringValue"],
            "en"
        );
    }

    #[test]
    fn test_parse_result_items_keeps_order() {
        let resp = json!({"ResultItems": [
            {"DocumentId": "a", "DocumentExcerpt": {"Text": "first"}},
            {"DocumentId": "b", "DocumentTitle": {"Text": "B"}}
        ]});
        let items = parse_result_items(&resp);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].excerpt.as_deref(), Some("first"));
        assert_eq!(items[1].excerpt, None);
        assert_eq!(items[1].document_title.as_deref(), Some("B"));
        assert!(parse_result_items(&json!({"ResultItems": []})).is_empty());
    }
}
