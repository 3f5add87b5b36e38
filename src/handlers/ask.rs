//! Question answering with conversation memory.
//!
//! ```text
//! question ─▶ history (last N turns) ─▶ index query ─┬─ hit ──▶ excerpt as plain text   (kendra)
//!                                                    └─ miss ─▶ model with history prompt (claude | none)
//!          ─▶ store turn ─▶ relay (front end only, detached) ─▶ {response, session_id}
//! ```
//!
//! Only a missing question fails the request. History, storage and relay
//! problems are logged and the answer is still returned; a model failure
//! becomes a canned answer with source `none`.

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::error::HandlerResult;
use crate::markdown;
use crate::models::{
    turn_timestamp, AnswerSource, ConversationTurn, HandlerResponse, ModelRequest, QueryRequest,
    RelayMessage,
};
use crate::normalize::{self, QuestionRequest};
use crate::traits::HandlerContext;

pub const NO_EXCERPT: &str = "No answer found.";
pub const NO_MODEL_TEXT: &str = "No answer found";
pub const EMPTY_MODEL_CONTENT: &str = "No answer found from Claude 3.5 Sonnet.";
pub const NO_ANSWER: &str = "No relevant information found in the knowledge base.";

/// An answer and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    pub source: AnswerSource,
}

pub async fn handle(ctx: &HandlerContext, event: &Value) -> HandlerResponse {
    match run(ctx, event).await {
        Ok((request, answer)) => HandlerResponse::new(
            200,
            &json!({ "response": answer.text, "session_id": request.session_id }),
        )
        .with_cors(),
        Err(e) => {
            error!(error = %e, "error answering question");
            HandlerResponse::new(
                500,
                &json!({
                    "response": format!("An error occurred while processing your question: {}", e)
                }),
            )
            .with_cors()
        }
    }
}

async fn run(ctx: &HandlerContext, event: &Value) -> HandlerResult<(QuestionRequest, Answer)> {
    let config = &ctx.config;
    let shapes = normalize::question_shapes(config.assistant.accept_arguments_shape);
    let request = normalize::extract_question(event, &shapes, &config.memory.default_session)?;
    info!(question = %request.question, session_id = %request.session_id, "extracted question");

    let history = load_history(ctx, &request.session_id).await;
    info!(turns = history.len(), "retrieved previous conversation");

    let answer = answer_question(ctx, &request.question, &history).await?;

    let turn = ConversationTurn {
        session_id: request.session_id.clone(),
        timestamp: turn_timestamp(Utc::now()),
        question: request.question.clone(),
        answer: answer.text.clone(),
        source: answer.source,
    };
    match ctx.backends.conversations.put_turn(&turn).await {
        Ok(()) => info!(session_id = %turn.session_id, "stored conversation turn"),
        Err(e) => error!(error = %format!("{:#}", e), "error storing conversation turn"),
    }

    if request.from_frontend {
        ctx.backends.dispatcher.dispatch(RelayMessage {
            question: request.question.clone(),
            answer: answer.text.clone(),
        });
    }

    Ok((request, answer))
}

/// Recent turns for the session, oldest first. Errors yield no history.
async fn load_history(ctx: &HandlerContext, session_id: &str) -> Vec<ConversationTurn> {
    match ctx
        .backends
        .conversations
        .recent_turns(session_id, ctx.config.memory.history_limit)
        .await
    {
        Ok(mut turns) => {
            turns.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
            turns
        }
        Err(e) => {
            warn!(error = %format!("{:#}", e), "error retrieving conversation history");
            Vec::new()
        }
    }
}

/// Answer from the index when it has a hit, otherwise from the model.
///
/// # Errors
///
/// Only when the index query itself fails.
pub async fn answer_question(
    ctx: &HandlerContext,
    question: &str,
    history: &[ConversationTurn],
) -> HandlerResult<Answer> {
    let config = &ctx.config;
    let hits = ctx
        .backends
        .index
        .query(&QueryRequest {
            text: question.to_string(),
            page_size: config.index.page_size,
            language_code: config.index.language_code.clone(),
        })
        .await?;

    if let Some(top) = hits.first() {
        let excerpt = top.excerpt.as_deref().unwrap_or(NO_EXCERPT);
        return Ok(Answer {
            text: markdown::markdown_to_text(excerpt),
            source: AnswerSource::Kendra,
        });
    }

    info!("no index results, asking the language model");
    let request = ModelRequest {
        prompt: build_prompt(question, history),
        max_tokens: config.model.max_tokens,
    };
    let answer = match ctx.backends.model.invoke(&request).await {
        Ok(response) => extract_model_answer(&response),
        Err(e) => {
            warn!(error = %format!("{:#}", e), "language model call failed");
            None
        }
    };

    Ok(answer.unwrap_or_else(|| Answer {
        text: NO_ANSWER.to_string(),
        source: AnswerSource::None,
    }))
}

/// The bare question, or the question framed by the previous turns.
pub fn build_prompt(question: &str, history: &[ConversationTurn]) -> String {
    if history.is_empty() {
        return question.to_string();
    }

    let mut context = String::from("Previous conversation:\n");
    for turn in history {
        context.push_str(&format!(
            "User: {}\nAssistant: {}\n\n",
            turn.question, turn.answer
        ));
    }

    format!(
        "{}\n\nNew Question: {}\n\nPlease respond to the new question using the context of our previous conversation when relevant.",
        context, question
    )
}

/// Read `content[0].text` from an Anthropic messages response.
///
/// Returns `None` when the response is not an object, which callers treat
/// as no answer at all.
pub fn extract_model_answer(response: &Value) -> Option<Answer> {
    let body = response.as_object()?;
    let first = body
        .get("content")
        .and_then(Value::as_array)
        .and_then(|content| content.first());

    let text = match first {
        Some(block) => block
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or(NO_MODEL_TEXT)
            .to_string(),
        None => EMPTY_MODEL_CONTENT.to_string(),
    };

    Some(Answer {
        text,
        source: AnswerSource::Claude,
    })
}
