//! Signed requests to AWS service APIs.
//!
//! All backend clients (S3, Kendra, Bedrock runtime, DynamoDB) talk to AWS
//! over plain HTTPS with
//! [Signature Version 4](https://docs.aws.amazon.com/IAM/latest/UserGuide/reference_aws-signing.html)
//! authentication. Signing uses HMAC-SHA256 from the pure-Rust `hmac` and
//! `sha2` crates, so no C toolchain is needed to build.
//!
//! # Environment Variables
//!
//! Credentials are read from environment variables:
//! - `AWS_ACCESS_KEY_ID` (required)
//! - `AWS_SECRET_ACCESS_KEY` (required)
//! - `AWS_SESSION_TOKEN` (optional, for temporary credentials)
//!
//! # Endpoints
//!
//! Every service accepts an `endpoint_url` override (LocalStack, MinIO).
//! Without one, the regional `*.amazonaws.com` host is used.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Method;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

// ============ Credentials ============

/// AWS credentials loaded from environment variables.
#[derive(Clone)]
pub struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token,
        }
    }

    /// Load credentials from `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`,
    /// and optionally `AWS_SESSION_TOKEN`.
    pub fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .context("AWS_ACCESS_KEY_ID environment variable not set")?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .finish_non_exhaustive()
    }
}

// ============ Endpoints ============

/// Where a service is reached: scheme plus host (and port).
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub scheme: String,
    pub host: String,
}

impl Endpoint {
    /// Parse an override URL such as `http://localhost:4566/`.
    pub fn from_url(url: &str) -> Self {
        let (scheme, rest) = match url.split_once("://") {
            Some((scheme, rest)) => (scheme.to_string(), rest),
            None => ("https".to_string(), url),
        };
        Self {
            scheme,
            host: rest.trim_end_matches('/').to_string(),
        }
    }

    /// The override when present, `https://{default_host}` otherwise.
    pub fn resolve(override_url: Option<&str>, default_host: String) -> Self {
        match override_url {
            Some(url) => Self::from_url(url),
            None => Self {
                scheme: "https".to_string(),
                host: default_host,
            },
        }
    }
}

/// Wire format of an AWS JSON-protocol service.
#[derive(Debug, Clone, Copy)]
pub enum JsonProtocol {
    /// `application/x-amz-json-1.0` (DynamoDB).
    V1_0,
    /// `application/x-amz-json-1.1` (Kendra).
    V1_1,
}

impl JsonProtocol {
    fn content_type(self) -> &'static str {
        match self {
            JsonProtocol::V1_0 => "application/x-amz-json-1.0",
            JsonProtocol::V1_1 => "application/x-amz-json-1.1",
        }
    }
}

// ============ Client ============

/// One signed HTTP request, before it is sent.
pub struct AwsRequest<'a> {
    pub method: Method,
    pub endpoint: &'a Endpoint,
    /// Service name in the credential scope (`s3`, `kendra`, `bedrock`, `dynamodb`).
    pub service: &'a str,
    /// Raw (unencoded) path segments.
    pub segments: Vec<String>,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl<'a> AwsRequest<'a> {
    pub fn new(method: Method, endpoint: &'a Endpoint, service: &'a str) -> Self {
        Self {
            method,
            endpoint,
            service,
            segments: Vec::new(),
            query: Vec::new(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }
}

/// A shared HTTP client plus the credentials and region to sign with.
///
/// Built once per process and shared by every service client.
pub struct AwsClient {
    http: reqwest::Client,
    credentials: AwsCredentials,
    region: String,
}

impl AwsClient {
    pub fn new(credentials: AwsCredentials, region: String, timeout_secs: u64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            http,
            credentials,
            region,
        })
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Sign and send a request, signing in `region` (or the client default).
    ///
    /// Returns the response whatever its status; callers check it.
    pub async fn send(&self, req: AwsRequest<'_>, region: Option<&str>) -> Result<reqwest::Response> {
        let region = region.unwrap_or(&self.region);
        let path = request_path(&req.segments);
        let canonical_uri = canonical_uri(&req.segments, req.service);

        let mut sorted_query = req.query.clone();
        sorted_query.sort();
        let canonical_querystring = canonical_query(&sorted_query);

        let signed = sign(
            &self.credentials,
            &SigningInput {
                method: req.method.as_str(),
                host: &req.endpoint.host,
                canonical_uri: &canonical_uri,
                canonical_querystring: &canonical_querystring,
                headers: &req.headers,
                payload: &req.body,
                region,
                service: req.service,
            },
            Utc::now(),
        );

        let url = if canonical_querystring.is_empty() {
            format!("{}://{}{}", req.endpoint.scheme, req.endpoint.host, path)
        } else {
            format!(
                "{}://{}{}?{}",
                req.endpoint.scheme, req.endpoint.host, path, canonical_querystring
            )
        };

        debug!(method = %req.method, url = %url, service = req.service, "sending signed request");

        let mut builder = self.http.request(req.method.clone(), &url);
        for (name, value) in req.headers.iter().chain(signed.iter()) {
            builder = builder.header(name.as_str(), value.as_str());
        }

        builder
            .body(req.body)
            .send()
            .await
            .with_context(|| format!("request to {} failed", url))
    }

    /// Call an AWS JSON-protocol operation (`X-Amz-Target: {target}`).
    ///
    /// # Errors
    ///
    /// Non-2xx responses become errors carrying the service's `__type` and
    /// message.
    pub async fn call_json(
        &self,
        endpoint: &Endpoint,
        service: &str,
        protocol: JsonProtocol,
        target: &str,
        payload: &Value,
        region: Option<&str>,
    ) -> Result<Value> {
        let mut req = AwsRequest::new(Method::POST, endpoint, service);
        req.headers = vec![
            ("content-type".to_string(), protocol.content_type().to_string()),
            ("x-amz-target".to_string(), target.to_string()),
        ];
        req.body = serde_json::to_vec(payload)?;

        let resp = self.send(req, region).await?;
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            bail!("{} failed (HTTP {}): {}", target, status, describe_aws_error(&text));
        }
        if text.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        serde_json::from_str(&text).with_context(|| format!("{} returned invalid JSON", target))
    }
}

/// Pull `__type` and `message` out of a JSON error body, if it is one.
fn describe_aws_error(body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    match parsed {
        Some(v) => {
            let kind = v
                .get("__type")
                .and_then(Value::as_str)
                .map(|t| t.rsplit('#').next().unwrap_or(t).to_string());
            let message = v
                .get("message")
                .or_else(|| v.get("Message"))
                .and_then(Value::as_str);
            match (kind, message) {
                (Some(k), Some(m)) => format!("{}: {}", k, m),
                (Some(k), None) => k,
                (None, Some(m)) => m.to_string(),
                (None, None) => body.chars().take(500).collect(),
            }
        }
        None => body.chars().take(500).collect(),
    }
}

// ============ AWS SigV4 ============

/// Everything that goes into a signature.
pub struct SigningInput<'a> {
    pub method: &'a str,
    pub host: &'a str,
    pub canonical_uri: &'a str,
    pub canonical_querystring: &'a str,
    /// Extra headers to sign; names must be lowercase.
    pub headers: &'a [(String, String)],
    pub payload: &'a [u8],
    pub region: &'a str,
    pub service: &'a str,
}

/// Compute SigV4 headers for a request.
///
/// Returns the headers to add: `authorization`, `x-amz-date`,
/// `x-amz-content-sha256` and, with temporary credentials,
/// `x-amz-security-token`. `host` is signed but left for the HTTP client
/// to send.
pub fn sign(
    creds: &AwsCredentials,
    input: &SigningInput<'_>,
    now: DateTime<Utc>,
) -> Vec<(String, String)> {
    let date_stamp = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let payload_hash = hex_sha256(input.payload);

    let mut headers: Vec<(String, String)> = input
        .headers
        .iter()
        .map(|(k, v)| (k.to_lowercase(), v.trim().to_string()))
        .collect();
    headers.push(("host".to_string(), input.host.to_string()));
    headers.push(("x-amz-content-sha256".to_string(), payload_hash.clone()));
    headers.push(("x-amz-date".to_string(), amz_date.clone()));
    if let Some(ref token) = creds.session_token {
        headers.push(("x-amz-security-token".to_string(), token.clone()));
    }
    headers.sort_by(|a, b| a.0.cmp(&b.0));

    let signed_headers: String = headers
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v))
        .collect();

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        input.method,
        input.canonical_uri,
        input.canonical_querystring,
        canonical_headers,
        signed_headers,
        payload_hash
    );

    let credential_scope = format!(
        "{}/{}/{}/aws4_request",
        date_stamp, input.region, input.service
    );
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        credential_scope,
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(
        &creds.secret_access_key,
        &date_stamp,
        input.region,
        input.service,
    );
    let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        creds.access_key_id, credential_scope, signed_headers, signature
    );

    let mut out = vec![
        ("authorization".to_string(), authorization),
        ("x-amz-content-sha256".to_string(), payload_hash),
        ("x-amz-date".to_string(), amz_date),
    ];
    if let Some(ref token) = creds.session_token {
        out.push(("x-amz-security-token".to_string(), token.clone()));
    }
    out
}

/// The path as sent on the wire: each segment encoded once.
fn request_path(segments: &[String]) -> String {
    if segments.is_empty() {
        return "/".to_string();
    }
    format!(
        "/{}",
        segments
            .iter()
            .map(|s| uri_encode(s))
            .collect::<Vec<_>>()
            .join("/")
    )
}

/// The path as signed. S3 signs the wire path; every other service signs
/// it encoded a second time.
fn canonical_uri(segments: &[String], service: &str) -> String {
    if service == "s3" || segments.is_empty() {
        return request_path(segments);
    }
    format!(
        "/{}",
        segments
            .iter()
            .map(|s| uri_encode(&uri_encode(s)))
            .collect::<Vec<_>>()
            .join("/")
    )
}

fn canonical_query(sorted: &[(String, String)]) -> String {
    sorted
        .iter()
        .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Compute the hex-encoded SHA-256 hash of data.
pub fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compute HMAC-SHA256 of data with the given key.
fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Compute hex-encoded HMAC-SHA256.
fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

/// Derive the AWS SigV4 signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
pub fn derive_signing_key(
    secret_key: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// URI-encode a string per RFC 3986 (used in SigV4 canonical requests).
///
/// Encodes all characters except unreserved characters:
/// `A-Z a-z 0-9 - _ . ~`
pub fn uri_encode(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}
