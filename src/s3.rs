//! Amazon S3 object store.
//!
//! Reads and writes single objects through the S3 REST API with SigV4
//! signing (see [`crate::aws`]). Uses virtual-hosted addressing
//! (`<bucket>.s3.<region>.amazonaws.com`) by default and path-style
//! addressing when a custom `endpoint_url` is configured (MinIO,
//! LocalStack).
//!
//! # Configuration
//!
//! ```toml
//! [storage]
//! bucket = "chatbot-knowledgebase-md"
//! upload_prefix = "uploads/"
//! # endpoint_url = "http://localhost:4566"
//! ```

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::Method;
use tracing::debug;

use crate::aws::{AwsClient, AwsRequest, Endpoint};
use crate::config::StorageConfig;
use crate::traits::ObjectStore;

pub struct S3ObjectStore {
    client: Arc<AwsClient>,
    endpoint_url: Option<String>,
}

impl S3ObjectStore {
    pub fn new(client: Arc<AwsClient>, config: &StorageConfig) -> Self {
        Self {
            client,
            endpoint_url: config.endpoint_url.clone(),
        }
    }

    /// Endpoint and path segments addressing `bucket/key`.
    fn locate(&self, bucket: &str, key: &str) -> (Endpoint, Vec<String>) {
        let key_segments = key.split('/').map(str::to_string);
        match self.endpoint_url {
            Some(ref url) => {
                let mut segments = vec![bucket.to_string()];
                segments.extend(key_segments);
                (Endpoint::from_url(url), segments)
            }
            None => (
                Endpoint::resolve(
                    None,
                    format!("{}.s3.{}.amazonaws.com", bucket, self.client.region()),
                ),
                key_segments.collect(),
            ),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let (endpoint, segments) = self.locate(bucket, key);
        let mut req = AwsRequest::new(Method::GET, &endpoint, "s3");
        req.segments = segments;

        let resp = self
            .client
            .send(req, None)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to get s3://{}/{}: {:#}", bucket, key, e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            bail!("S3 GetObject failed (HTTP {}) for key '{}'", status, key);
        }

        let bytes = resp.bytes().await?;
        debug!(bucket, key, size = bytes.len(), "downloaded object");
        Ok(bytes.to_vec())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        let (endpoint, segments) = self.locate(bucket, key);
        let mut req = AwsRequest::new(Method::PUT, &endpoint, "s3");
        req.segments = segments;
        req.headers = vec![("content-type".to_string(), content_type.to_string())];
        req.body = body;

        let resp = self
            .client
            .send(req, None)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to put s3://{}/{}: {:#}", bucket, key, e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "S3 PutObject failed (HTTP {}) for key '{}': {}",
                status,
                key,
                body.chars().take(500).collect::<String>()
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::AwsCredentials;

    fn store(endpoint_url: Option<&str>) -> S3ObjectStore {
        let client = AwsClient::new(
            AwsCredentials::new("AKID", "secret", None),
            "ap-southeast-1".to_string(),
            5,
        )
        .unwrap();
        S3ObjectStore::new(
            Arc::new(client),
            &StorageConfig {
                bucket: "docs".to_string(),
                upload_prefix: "uploads/".to_string(),
                endpoint_url: endpoint_url.map(str::to_string),
            },
        )
    }

    #[test]
    fn test_virtual_hosted_addressing() {
        let (endpoint, segments) = store(None).locate("docs", "uploads/a b.md");
        assert_eq!(endpoint.host, "docs.s3.ap-southeast-1.amazonaws.com");
        assert_eq!(segments, vec!["uploads", "a b.md"]);
    }

    #[test]
    fn test_path_style_with_custom_endpoint() {
        let (endpoint, segments) = store(Some("http://localhost:4566")).locate("docs", "x/y.md");
        assert_eq!(endpoint.scheme, "http");
        assert_eq!(endpoint.host, "localhost:4566");
        assert_eq!(segments, vec!["docs", "x", "y.md"]);
    }
}
