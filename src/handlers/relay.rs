//! Forward a question/answer pair to the messaging bot.

use serde_json::{json, Value};
use tracing::{error, info};

use crate::models::{HandlerResponse, RelayMessage};
use crate::normalize;
use crate::traits::{HandlerContext, MessageRelay};

pub async fn handle(ctx: &HandlerContext, event: &Value) -> HandlerResponse {
    let message = normalize::extract_relay_message(event);
    info!(question = %message.question, answer = %message.answer, "relaying exchange");

    if forward(ctx.backends.relay.as_ref(), &message).await {
        HandlerResponse::new(200, &json!("Message sent to Telegram successfully!"))
    } else {
        HandlerResponse::new(500, &json!("Failed to send message to Telegram."))
    }
}

/// Deliver one message, logging instead of failing.
pub async fn forward(relay: &dyn MessageRelay, message: &RelayMessage) -> bool {
    match relay.send(message).await {
        Ok(()) => {
            info!("message sent to messaging bot");
            true
        }
        Err(e) => {
            error!(error = %format!("{:#}", e), "failed to send message to messaging bot");
            false
        }
    }
}
