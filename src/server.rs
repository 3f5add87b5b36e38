//! HTTP front door for the handlers.
//!
//! Accepts raw events over HTTP and answers with the handler's envelope
//! unwrapped into a real HTTP response: `statusCode` becomes the status,
//! `headers` become response headers and `body` is sent as-is.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/events/{handler}` | Run `sync`, `upload`, `ask` or `relay` on the request body |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! Handler failures come back in the handler's own envelope. Requests that
//! never reach a handler get:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "request body is not valid JSON: ..." } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser front ends
//! can post questions directly.

use axum::{
    extract::{Path, State},
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::handlers::{self, Handler};
use crate::models::HandlerResponse;
use crate::traits::HandlerContext;

/// Build the router. Split out from [`run_server`] so tests can drive it.
pub fn router(ctx: HandlerContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/events/{handler}", post(handle_event))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(ctx)
}

/// Serve on `[server].bind` until the process is terminated.
pub async fn run_server(ctx: HandlerContext) -> anyhow::Result<()> {
    let bind_addr = ctx.config.server.bind.clone();
    let app = router(ctx);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(bind = %bind_addr, "event server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /events/{handler} ============

async fn handle_event(
    State(ctx): State<HandlerContext>,
    Path(name): Path<String>,
    body: String,
) -> Result<Response, AppError> {
    let handler: Handler = name.parse().map_err(|e: anyhow::Error| not_found(e.to_string()))?;

    let event: Value = if body.trim().is_empty() {
        Value::Object(Default::default())
    } else {
        serde_json::from_str(&body)
            .map_err(|e| bad_request(format!("request body is not valid JSON: {}", e)))?
    };

    let envelope = handlers::invoke(handler, &ctx, &event).await;
    Ok(envelope_response(envelope))
}

/// Unwrap a handler envelope into an HTTP response.
fn envelope_response(envelope: HandlerResponse) -> Response {
    let status =
        StatusCode::from_u16(envelope.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, envelope.body).into_response();

    let headers = response.headers_mut();
    headers.insert(
        axum::http::header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    for (name, value) in &envelope.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(header = %name, "dropping invalid response header"),
        }
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_response_copies_status_and_headers() {
        let envelope = HandlerResponse::new(400, &json!({"error": "bad"})).with_cors();
        let response = envelope_response(envelope);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers()["access-control-allow-origin"],
            HeaderValue::from_static("*")
        );
        assert_eq!(
            response.headers()["content-type"],
            HeaderValue::from_static("application/json")
        );
    }
}
