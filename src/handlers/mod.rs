//! The four event handlers.
//!
//! Each handler takes a raw JSON event and a [`HandlerContext`] and always
//! produces a [`HandlerResponse`]: failures are logged and folded into the
//! error envelope, never returned.
//!
//! | Handler | Event | Success body |
//! |---------|-------|--------------|
//! | [`Handler::Sync`] | storage notification | `"File successfully synced to Kendra"` |
//! | [`Handler::Upload`] | storage notification or HTTP invocation | `{message, documentId, title}` / `{message, fileKey, processingResult}` |
//! | [`Handler::Ask`] | `{question, session_id?, fromFrontend?}` in any envelope | `{response, session_id}` |
//! | [`Handler::Relay`] | `{question, answer}` | `"Message sent to Telegram successfully!"` |

pub mod ask;
pub mod relay;
pub mod sync;
pub mod upload;

use std::fmt;
use std::str::FromStr;

use serde_json::Value;
use tracing::info;

use crate::models::HandlerResponse;
use crate::traits::HandlerContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    Sync,
    Upload,
    Ask,
    Relay,
}

impl Handler {
    pub const ALL: [Handler; 4] = [Handler::Sync, Handler::Upload, Handler::Ask, Handler::Relay];

    pub fn as_str(&self) -> &'static str {
        match self {
            Handler::Sync => "sync",
            Handler::Upload => "upload",
            Handler::Ask => "ask",
            Handler::Relay => "relay",
        }
    }
}

impl fmt::Display for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Handler {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Handler::ALL
            .into_iter()
            .find(|h| h.as_str() == s)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Unknown handler: '{}'. Available: sync, upload, ask, relay",
                    s
                )
            })
    }
}

/// Run one handler on one event.
pub async fn invoke(handler: Handler, ctx: &HandlerContext, event: &Value) -> HandlerResponse {
    info!(handler = %handler, "received event");
    let response = match handler {
        Handler::Sync => sync::handle(ctx, event).await,
        Handler::Upload => upload::handle(ctx, event).await,
        Handler::Ask => ask::handle(ctx, event).await,
        Handler::Relay => relay::handle(ctx, event).await,
    };
    info!(handler = %handler, status = response.status_code, "handler finished");
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_names_round_trip() {
        for handler in Handler::ALL {
            assert_eq!(handler.as_str().parse::<Handler>().unwrap(), handler);
        }
        assert!("search".parse::<Handler>().is_err());
    }
}
