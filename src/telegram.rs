//! Telegram bot relay.
//!
//! Sends a single `sendMessage` call per relayed exchange. The bot token
//! comes from `TELEGRAM_BOT_TOKEN`; the chat id from `[relay].chat_id`, or
//! `TELEGRAM_CHAT_ID` when the config leaves it unset.

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::config::Config;
use crate::models::RelayMessage;
use crate::traits::MessageRelay;

pub struct TelegramRelay {
    http: reqwest::Client,
    api_base: String,
    token: String,
    chat_id: String,
}

impl TelegramRelay {
    /// Build a relay from config and environment.
    ///
    /// # Errors
    ///
    /// Returns an error if `TELEGRAM_BOT_TOKEN` is not set or no chat id is
    /// configured.
    pub fn from_config(config: &Config) -> Result<Self> {
        let token = std::env::var("TELEGRAM_BOT_TOKEN")
            .map_err(|_| anyhow::anyhow!("TELEGRAM_BOT_TOKEN environment variable not set"))?;
        let chat_id = match config.relay.chat_id {
            Some(ref id) => id.clone(),
            None => std::env::var("TELEGRAM_CHAT_ID").map_err(|_| {
                anyhow::anyhow!("relay.chat_id not configured and TELEGRAM_CHAT_ID not set")
            })?,
        };

        Self::new(&config.relay.api_base, token, chat_id, config.aws.timeout_secs)
    }

    pub fn new(api_base: &str, token: String, chat_id: String, timeout_secs: u64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
            chat_id,
        })
    }

    fn send_message_url(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, self.token)
    }
}

#[async_trait]
impl MessageRelay for TelegramRelay {
    async fn send(&self, message: &RelayMessage) -> Result<()> {
        let text = message.text();
        let resp = self
            .http
            .post(self.send_message_url())
            .form(&[("chat_id", self.chat_id.as_str()), ("text", text.as_str())])
            .send()
            .await
            // reqwest errors embed the URL, which carries the token.
            .map_err(|e| anyhow::anyhow!("Telegram request failed: {}", e.without_url()))?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            bail!(
                "Telegram sendMessage failed (HTTP {}): {}",
                status,
                describe_telegram_error(&body)
            );
        }

        debug!(chat_id = %self.chat_id, "telegram message delivered");
        Ok(())
    }
}

/// Telegram error bodies look like `{"ok":false,"description":"..."}`.
fn describe_telegram_error(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("description")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.chars().take(500).collect())
}

/// Relay used when no bot is configured. Every send fails.
pub struct DisabledRelay;

#[async_trait]
impl MessageRelay for DisabledRelay {
    async fn send(&self, _message: &RelayMessage) -> Result<()> {
        bail!("messaging relay is disabled: set TELEGRAM_BOT_TOKEN and a chat id")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_message_url() {
        let relay = TelegramRelay::new(
            "https://api.telegram.org/",
            "123:abc".to_string(),
            "42".to_string(),
            5,
        )
        .unwrap();
        assert_eq!(
            relay.send_message_url(),
            "https://api.telegram.org/bot123:abc/sendMessage"
        );
    }

    #[test]
    fn test_describe_telegram_error() {
        assert_eq!(
            describe_telegram_error(r#"{"ok":false,"description":"Bad Request: chat not found"}"#),
            "Bad Request: chat not found"
        );
        assert_eq!(describe_telegram_error("gateway down"), "gateway down");
    }

    #[tokio::test]
    async fn test_disabled_relay_fails() {
        let msg = RelayMessage {
            question: "q".into(),
            answer: "a".into(),
        };
        assert!(DisabledRelay.send(&msg).await.is_err());
    }
}
