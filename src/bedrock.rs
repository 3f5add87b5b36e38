//! Bedrock runtime language model.
//!
//! Calls `POST /model/{modelId}/invoke` with an Anthropic messages request
//! body and returns the model's JSON response untouched.
//!
//! # Configuration
//!
//! ```toml
//! [model]
//! model_id = "anthropic.claude-3-5-sonnet-20240620-v1:0"
//! max_tokens = 1000
//! anthropic_version = "bedrock-2023-05-31"
//! ```

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};

use crate::aws::{AwsClient, AwsRequest, Endpoint};
use crate::config::ModelConfig;
use crate::models::ModelRequest;
use crate::traits::LanguageModel;

pub struct BedrockModel {
    client: Arc<AwsClient>,
    model_id: String,
    anthropic_version: String,
    region: Option<String>,
    endpoint: Endpoint,
}

impl BedrockModel {
    pub fn new(client: Arc<AwsClient>, config: &ModelConfig) -> Self {
        let region = config
            .region
            .clone()
            .unwrap_or_else(|| client.region().to_string());
        let endpoint = Endpoint::resolve(
            config.endpoint_url.as_deref(),
            format!("bedrock-runtime.{}.amazonaws.com", region),
        );
        Self {
            client,
            model_id: config.model_id.clone(),
            anthropic_version: config.anthropic_version.clone(),
            region: config.region.clone(),
            endpoint,
        }
    }
}

/// Build a single-turn Anthropic messages request.
pub fn request_body(anthropic_version: &str, request: &ModelRequest) -> Value {
    json!({
        "anthropic_version": anthropic_version,
        "max_tokens": request.max_tokens,
        "messages": [
            {
                "role": "user",
                "content": [
                    { "type": "text", "text": request.prompt }
                ]
            }
        ]
    })
}

#[async_trait]
impl LanguageModel for BedrockModel {
    async fn invoke(&self, request: &ModelRequest) -> Result<Value> {
        let mut req = AwsRequest::new(Method::POST, &self.endpoint, "bedrock");
        req.segments = vec![
            "model".to_string(),
            self.model_id.clone(),
            "invoke".to_string(),
        ];
        req.headers = vec![
            ("content-type".to_string(), "application/json".to_string()),
            ("accept".to_string(), "application/json".to_string()),
        ];
        req.body = serde_json::to_vec(&request_body(&self.anthropic_version, request))?;

        let resp = self.client.send(req, self.region.as_deref()).await?;
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            bail!(
                "Bedrock InvokeModel failed (HTTP {}): {}",
                status,
                text.chars().take(500).collect::<String>()
            );
        }

        tracing::debug!(response = %text, "raw model response");
        serde_json::from_str(&text).context("Bedrock returned invalid JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let body = request_body(
            "bedrock-2023-05-31",
            &ModelRequest {
                prompt: "Hello?".into(),
                max_tokens: 1000,
            },
        );
        assert_eq!(body["anthropic_version"], "bedrock-2023-05-31");
        assert_eq!(body["max_tokens"], 1000);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"][0]["type"], "text");
        assert_eq!(body["messages"][0]["content"][0]["text"], "Hello?");
    }
}
