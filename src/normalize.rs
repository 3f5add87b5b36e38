//! Event normalization.
//!
//! Front ends deliver the same data in different envelopes: a bare JSON
//! object, an API gateway proxy event with a string (possibly base64) body,
//! a structured upload with an embedded file, or an object-storage
//! notification. This module turns all of them into one canonical request.
//!
//! Each recognizer is a pure function over the event. Recognizers are kept
//! in ordered lists and tried in priority order:
//!
//! ```text
//! question:  direct ─▶ body ─▶ arguments (opt-in)
//! upload:    storage notification ─▶ http invocation
//!                                      └─▶ structured file ─▶ declared json ─▶ raw text
//! relay:     body ─▶ direct
//! ```
//!
//! A recognizer returns `None` when the event does not have its shape and
//! `Some(result)` when it does. The first `Some` is final: once a shape
//! matches structurally, later shapes are never consulted, even if the
//! matched shape's own extraction came up empty.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{HandlerError, HandlerResult};
use crate::models::RelayMessage;

/// Filename used when a structured file omits `fileName`.
pub const DEFAULT_FILE_NAME: &str = "document.md";
/// Filename used when the whole body is the file.
pub const DEFAULT_RAW_FILE_NAME: &str = "uploaded_document.md";
/// Header that overrides [`DEFAULT_RAW_FILE_NAME`].
pub const FILENAME_HEADER: &str = "x-filename";

type Event = Map<String, Value>;

// ═══════════════════════════════════════════════════════════════════════
// Question extraction
// ═══════════════════════════════════════════════════════════════════════

/// Canonical question-answering request.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionRequest {
    pub question: String,
    pub session_id: String,
    /// Set by the web front end; triggers relay forwarding.
    pub from_frontend: bool,
}

/// Raw fields pulled out of a matched shape, before defaults apply.
#[derive(Debug, Default, PartialEq)]
pub struct QuestionFields {
    pub question: Option<String>,
    pub session_id: Option<String>,
}

/// A named question recognizer.
#[derive(Clone, Copy)]
pub struct QuestionShape {
    pub name: &'static str,
    matcher: fn(&Event) -> Option<QuestionFields>,
}

impl QuestionShape {
    pub fn matches(&self, event: &Event) -> Option<QuestionFields> {
        (self.matcher)(event)
    }
}

/// `{"question": ..., "session_id": ...}`
pub const DIRECT_QUESTION: QuestionShape = QuestionShape {
    name: "direct",
    matcher: match_direct_question,
};

/// `{"body": "<json>"}` or `{"body": {...}}`
pub const BODY_QUESTION: QuestionShape = QuestionShape {
    name: "body",
    matcher: match_body_question,
};

/// `{"arguments": {"question": ...}}`
pub const ARGUMENTS_QUESTION: QuestionShape = QuestionShape {
    name: "arguments",
    matcher: match_arguments_question,
};

/// The question shapes in priority order.
pub fn question_shapes(accept_arguments: bool) -> Vec<QuestionShape> {
    let mut shapes = vec![DIRECT_QUESTION, BODY_QUESTION];
    if accept_arguments {
        shapes.push(ARGUMENTS_QUESTION);
    }
    shapes
}

/// Extract `(question, session_id)` from an event of unknown shape.
///
/// Missing or non-string `session_id` falls back to `default_session`.
///
/// # Errors
///
/// [`HandlerError::MissingQuestion`] when no shape yields a non-empty
/// question.
pub fn extract_question(
    event: &Value,
    shapes: &[QuestionShape],
    default_session: &str,
) -> HandlerResult<QuestionRequest> {
    let map = event.as_object().ok_or(HandlerError::MissingQuestion)?;

    let fields = shapes
        .iter()
        .find_map(|shape| {
            shape.matches(map).map(|fields| {
                debug!(shape = shape.name, "matched question shape");
                fields
            })
        })
        .unwrap_or_default();

    let question = fields
        .question
        .filter(|q| !q.is_empty())
        .ok_or(HandlerError::MissingQuestion)?;

    let session_id = fields
        .session_id
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default_session.to_string());

    Ok(QuestionRequest {
        question,
        session_id,
        from_frontend: map
            .get("fromFrontend")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

fn question_fields(container: &Value) -> QuestionFields {
    QuestionFields {
        question: string_field(container, "question"),
        session_id: string_field(container, "session_id"),
    }
}

fn match_direct_question(event: &Event) -> Option<QuestionFields> {
    if !event.contains_key("question") {
        return None;
    }
    Some(QuestionFields {
        question: event
            .get("question")
            .and_then(Value::as_str)
            .map(str::to_string),
        session_id: event
            .get("session_id")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

fn match_body_question(event: &Event) -> Option<QuestionFields> {
    let body = event.get("body")?;
    // An unparseable body still claims the event: no question.
    Some(
        parse_json_body(body)
            .map(|b| question_fields(&b))
            .unwrap_or_default(),
    )
}

fn match_arguments_question(event: &Event) -> Option<QuestionFields> {
    event.get("arguments").map(question_fields)
}

// ═══════════════════════════════════════════════════════════════════════
// File extraction
// ═══════════════════════════════════════════════════════════════════════

/// An object that already lives in storage.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub bucket: String,
    pub key: String,
}

/// Canonical upload request.
#[derive(Debug, Clone, PartialEq)]
pub enum FileSource {
    /// Storage notification: process the existing object.
    Stored(StoredObject),
    /// Direct upload: persist, then process.
    Inline { file_name: String, content: String },
}

/// A named top-level upload recognizer.
#[derive(Clone, Copy)]
pub struct FileShape {
    pub name: &'static str,
    matcher: fn(&Event) -> Option<HandlerResult<FileSource>>,
}

/// The decoded body of an HTTP-style invocation.
pub struct DecodedBody<'a> {
    /// Parsed JSON, or a JSON string holding raw text.
    pub value: Value,
    /// The body as text, when it arrived as text.
    pub text: Option<String>,
    pub headers: Option<&'a Value>,
}

/// A named recognizer over a decoded body.
#[derive(Clone, Copy)]
pub struct BodyShape {
    pub name: &'static str,
    matcher: fn(&DecodedBody<'_>) -> Option<HandlerResult<FileSource>>,
}

/// Top-level upload shapes in priority order.
pub const FILE_SHAPES: &[FileShape] = &[
    FileShape {
        name: "storage_notification",
        matcher: match_storage_notification,
    },
    FileShape {
        name: "http_invocation",
        matcher: match_http_invocation,
    },
];

/// Body shapes in priority order, tried once the body has been decoded.
pub const BODY_SHAPES: &[BodyShape] = &[
    BodyShape {
        name: "structured_file",
        matcher: match_structured_file,
    },
    BodyShape {
        name: "declared_json",
        matcher: match_declared_json,
    },
    BodyShape {
        name: "raw_text",
        matcher: match_raw_text,
    },
];

/// Extract the upload target from a storage notification or an HTTP-style
/// invocation.
///
/// # Errors
///
/// - [`HandlerError::InvalidBody`]: malformed base64, non-UTF-8 bytes, or
///   a body declared as JSON that does not parse.
/// - [`HandlerError::NoFileData`]: a body was present but held no file.
/// - [`HandlerError::InvalidEvent`]: neither records nor a body.
pub fn extract_file(event: &Value) -> HandlerResult<FileSource> {
    let map = event.as_object().ok_or(HandlerError::InvalidEvent)?;

    for shape in FILE_SHAPES {
        if let Some(result) = (shape.matcher)(map) {
            debug!(shape = shape.name, "matched upload shape");
            return result;
        }
    }

    Err(HandlerError::InvalidEvent)
}

/// Read `Records[0].s3.bucket.name` and `Records[0].s3.object.key`.
///
/// Object keys in notifications are form-encoded and are decoded here.
pub fn storage_object(event: &Value) -> HandlerResult<StoredObject> {
    let s3 = event
        .get("Records")
        .and_then(|r| r.get(0))
        .and_then(|r| r.get("s3"))
        .ok_or(HandlerError::InvalidEvent)?;

    let bucket = s3
        .get("bucket")
        .and_then(|b| b.get("name"))
        .and_then(Value::as_str)
        .ok_or(HandlerError::InvalidEvent)?;
    let raw_key = s3
        .get("object")
        .and_then(|o| o.get("key"))
        .and_then(Value::as_str)
        .ok_or(HandlerError::InvalidEvent)?;

    Ok(StoredObject {
        bucket: bucket.to_string(),
        key: decode_object_key(raw_key),
    })
}

fn decode_object_key(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|k| k.into_owned())
        .unwrap_or(spaced)
}

fn match_storage_notification(event: &Event) -> Option<HandlerResult<FileSource>> {
    let source = event
        .get("Records")?
        .get(0)?
        .get("eventSource")?
        .as_str()?;
    if source != "aws:s3" {
        return None;
    }
    let event = Value::Object(event.clone());
    Some(storage_object(&event).map(FileSource::Stored))
}

fn match_http_invocation(event: &Event) -> Option<HandlerResult<FileSource>> {
    let raw = event.get("body")?;
    let base64_encoded = event
        .get("isBase64Encoded")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    Some(decode_body(raw, base64_encoded).and_then(|(value, text)| {
        let body = DecodedBody {
            value,
            text,
            headers: event.get("headers"),
        };
        for shape in BODY_SHAPES {
            if let Some(result) = (shape.matcher)(&body) {
                debug!(shape = shape.name, "matched body shape");
                return result;
            }
        }
        Err(HandlerError::NoFileData(
            "Unable to extract file data from request".to_string(),
        ))
    }))
}

/// Decode an invocation body into `(value, text)`.
///
/// String bodies are parsed as JSON when possible and kept as text
/// otherwise. With `isBase64Encoded`, the string is base64-decoded first and
/// the decoded text takes the place of the raw body.
fn decode_body(raw: &Value, base64_encoded: bool) -> HandlerResult<(Value, Option<String>)> {
    let Value::String(raw_text) = raw else {
        if base64_encoded {
            return Err(HandlerError::InvalidBody(
                "Invalid base64 encoded body".to_string(),
            ));
        }
        return Ok((raw.clone(), None));
    };

    let text = if base64_encoded {
        decode_base64_text(raw_text)
            .map_err(|e| HandlerError::InvalidBody(format!("Error decoding base64 body: {}", e)))?
    } else {
        raw_text.clone()
    };

    let value = serde_json::from_str(&text).unwrap_or_else(|_| Value::String(text.clone()));
    Ok((value, Some(text)))
}

fn match_structured_file(body: &DecodedBody<'_>) -> Option<HandlerResult<FileSource>> {
    let file = body.value.as_object()?.get("file")?;
    Some(inline_file(file))
}

fn inline_file(file: &Value) -> HandlerResult<FileSource> {
    let file = file
        .as_object()
        .ok_or_else(|| HandlerError::InvalidBody("'file' must be an object".to_string()))?;

    let file_name = file
        .get("fileName")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_FILE_NAME)
        .to_string();

    let content = match file.get("content") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };

    let content = if file.get("encoding").and_then(Value::as_str) == Some("base64") {
        decode_base64_text(&content).map_err(|e| {
            HandlerError::InvalidBody(format!("Error decoding file content: {}", e))
        })?
    } else {
        content
    };

    Ok(FileSource::Inline { file_name, content })
}

fn match_declared_json(body: &DecodedBody<'_>) -> Option<HandlerResult<FileSource>> {
    let content_type = header(body.headers, "content-type")?;
    if !content_type.to_lowercase().contains("application/json") {
        return None;
    }
    Some(match &body.value {
        Value::Object(_) => Err(HandlerError::NoFileData(
            "No file data found in request".to_string(),
        )),
        _ => Err(HandlerError::InvalidBody("Invalid JSON format".to_string())),
    })
}

fn match_raw_text(body: &DecodedBody<'_>) -> Option<HandlerResult<FileSource>> {
    let text = body.text.as_ref().filter(|t| !t.trim().is_empty())?;
    let file_name = header(body.headers, FILENAME_HEADER)
        .unwrap_or(DEFAULT_RAW_FILE_NAME)
        .to_string();
    Some(Ok(FileSource::Inline {
        file_name,
        content: text.clone(),
    }))
}

// ═══════════════════════════════════════════════════════════════════════
// Relay extraction
// ═══════════════════════════════════════════════════════════════════════

/// Extract a Q/A pair for the relay, filling in placeholders.
///
/// Never fails: a missing or unreadable body yields placeholder text, the
/// way the relay has always behaved.
pub fn extract_relay_message(event: &Value) -> RelayMessage {
    if let Some(body) = event.get("body") {
        return match parse_json_body(body).filter(Value::is_object) {
            Some(parsed) => RelayMessage {
                question: string_field(&parsed, "question")
                    .unwrap_or_else(|| "Unknown Question".to_string()),
                answer: string_field(&parsed, "answer")
                    .unwrap_or_else(|| "Unknown Answer".to_string()),
            },
            None => RelayMessage {
                question: "Unknown Question".to_string(),
                answer: "No Answer Provided".to_string(),
            },
        };
    }

    RelayMessage {
        question: string_field(event, "question").unwrap_or_else(|| "Unknown Question".to_string()),
        answer: string_field(event, "answer").unwrap_or_else(|| "No Answer Provided".to_string()),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════════════════

/// Parse a body that may be a JSON string or already-structured JSON.
fn parse_json_body(body: &Value) -> Option<Value> {
    match body {
        Value::String(s) => serde_json::from_str(s).ok(),
        other => Some(other.clone()),
    }
}

fn string_field(container: &Value, key: &str) -> Option<String> {
    container.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Case-insensitive header lookup.
pub fn header<'a>(headers: Option<&'a Value>, name: &str) -> Option<&'a str> {
    headers?
        .as_object()?
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .and_then(|(_, v)| v.as_str())
}

/// Decode standard base64 and interpret the bytes as UTF-8.
///
/// Line breaks and other ASCII whitespace are ignored, so MIME-wrapped
/// payloads decode the same as single-line ones.
pub fn decode_base64_text(encoded: &str) -> anyhow::Result<String> {
    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = STANDARD.decode(compact)?;
    Ok(String::from_utf8(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ask(event: Value) -> HandlerResult<QuestionRequest> {
        extract_question(&event, &question_shapes(false), "default_session")
    }

    fn b64(s: &str) -> String {
        STANDARD.encode(s.as_bytes())
    }

    // ── questions ──────────────────────────────────────────────

    #[test]
    fn test_direct_question_with_default_session() {
        let req = ask(json!({"question": "What is the refund policy?"})).unwrap();
        assert_eq!(req.question, "What is the refund policy?");
        assert_eq!(req.session_id, "default_session");
        assert!(!req.from_frontend);
    }

    #[test]
    fn test_question_envelopes_agree() {
        let direct = ask(json!({"question": "q1", "session_id": "s1"})).unwrap();
        let string_body = ask(json!({"body": "{\"question\":\"q1\",\"session_id\":\"s1\"}"})).unwrap();
        let object_body = ask(json!({"body": {"question": "q1", "session_id": "s1"}})).unwrap();
        assert_eq!(direct, string_body);
        assert_eq!(direct, object_body);
    }

    #[test]
    fn test_from_frontend_flag() {
        let req = ask(json!({"question": "q", "fromFrontend": true})).unwrap();
        assert!(req.from_frontend);
    }

    #[test]
    fn test_unparseable_body_is_missing_question() {
        let err = ask(json!({"body": "not json"})).unwrap_err();
        assert!(matches!(err, HandlerError::MissingQuestion));
    }

    #[test]
    fn test_body_short_circuits_later_shapes() {
        let event = json!({"body": "{}", "arguments": {"question": "from args"}});
        let err = extract_question(&event, &question_shapes(true), "d").unwrap_err();
        assert!(matches!(err, HandlerError::MissingQuestion));
    }

    #[test]
    fn test_arguments_shape_is_opt_in() {
        let event = json!({"arguments": {"question": "q", "session_id": "s"}});
        assert!(ask(event.clone()).is_err());
        let req = extract_question(&event, &question_shapes(true), "d").unwrap();
        assert_eq!(req.question, "q");
        assert_eq!(req.session_id, "s");
    }

    #[test]
    fn test_empty_question_rejected() {
        assert!(ask(json!({"question": ""})).is_err());
        assert!(ask(json!({"question": null})).is_err());
        assert!(ask(json!("question")).is_err());
    }

    #[test]
    fn test_empty_session_falls_back() {
        let req = ask(json!({"question": "q", "session_id": ""})).unwrap();
        assert_eq!(req.session_id, "default_session");
    }

    // ── files ──────────────────────────────────────────────────

    fn inline(name: &str, content: &str) -> FileSource {
        FileSource::Inline {
            file_name: name.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn test_storage_notification() {
        let event = json!({
            "Records": [{
                "eventSource": "aws:s3",
                "s3": {"bucket": {"name": "docs"}, "object": {"key": "guides/refund+policy%281%29.md"}}
            }]
        });
        assert_eq!(
            extract_file(&event).unwrap(),
            FileSource::Stored(StoredObject {
                bucket: "docs".into(),
                key: "guides/refund policy(1).md".into()
            })
        );
    }

    #[test]
    fn test_file_envelopes_agree() {
        let file = json!({"file": {"fileName": "a.md", "content": "# A"}});
        let expected = inline("a.md", "# A");

        let object_body = json!({"body": file.clone()});
        let string_body = json!({"body": file.to_string()});
        let b64_body = json!({"body": b64(&file.to_string()), "isBase64Encoded": true});
        let b64_content = json!({"body": {"file": {"fileName": "a.md", "content": b64("# A"), "encoding": "base64"}}});

        for event in [object_body, string_body, b64_body, b64_content] {
            assert_eq!(extract_file(&event).unwrap(), expected, "event: {}", event);
        }
    }

    #[test]
    fn test_default_file_name() {
        let event = json!({"body": {"file": {"content": "x"}}});
        assert_eq!(extract_file(&event).unwrap(), inline(DEFAULT_FILE_NAME, "x"));
    }

    #[test]
    fn test_raw_body_with_filename_header() {
        let event = json!({"body": "# Notes\n", "headers": {"X-Filename": "notes.md"}});
        assert_eq!(extract_file(&event).unwrap(), inline("notes.md", "# Notes\n"));

        let event = json!({"body": "# Notes\n"});
        assert_eq!(
            extract_file(&event).unwrap(),
            inline(DEFAULT_RAW_FILE_NAME, "# Notes\n")
        );
    }

    #[test]
    fn test_base64_raw_text_uses_decoded_text() {
        let event = json!({"body": b64("plain markdown"), "isBase64Encoded": true});
        assert_eq!(
            extract_file(&event).unwrap(),
            inline(DEFAULT_RAW_FILE_NAME, "plain markdown")
        );
    }

    #[test]
    fn test_wrapped_base64_decodes() {
        let text = "# Returns\n\nItems can be returned within thirty days of delivery for a full refund.";
        let encoded = b64(text);
        assert!(encoded.len() > 76);
        let wrapped = format!("{}\n{}\r\n", &encoded[..76], &encoded[76..]);

        let event = json!({"body": {"file": {"fileName": "returns.md", "content": wrapped, "encoding": "base64"}}});
        assert_eq!(extract_file(&event).unwrap(), inline("returns.md", text));

        let event = json!({"body": wrapped, "isBase64Encoded": true});
        assert_eq!(
            extract_file(&event).unwrap(),
            inline(DEFAULT_RAW_FILE_NAME, text)
        );
    }

    #[test]
    fn test_bad_base64_is_invalid_body() {
        let event = json!({"body": "!!!not base64!!!", "isBase64Encoded": true});
        assert!(matches!(
            extract_file(&event).unwrap_err(),
            HandlerError::InvalidBody(_)
        ));

        let event = json!({"body": {"file": {"content": "%%%", "encoding": "base64"}}});
        assert!(matches!(
            extract_file(&event).unwrap_err(),
            HandlerError::InvalidBody(_)
        ));

        let event = json!({"body": {"a": 1}, "isBase64Encoded": true});
        assert!(matches!(
            extract_file(&event).unwrap_err(),
            HandlerError::InvalidBody(_)
        ));
    }

    #[test]
    fn test_base64_non_utf8_is_invalid_body() {
        let event = json!({"body": STANDARD.encode([0xff, 0xfe, 0xfd]), "isBase64Encoded": true});
        assert!(matches!(
            extract_file(&event).unwrap_err(),
            HandlerError::InvalidBody(_)
        ));
    }

    #[test]
    fn test_declared_json_without_file() {
        let event = json!({"body": "{\"other\": 1}", "headers": {"Content-Type": "application/json"}});
        assert!(matches!(
            extract_file(&event).unwrap_err(),
            HandlerError::NoFileData(_)
        ));

        let event = json!({"body": "oops", "headers": {"content-type": "application/json; charset=utf-8"}});
        assert!(matches!(
            extract_file(&event).unwrap_err(),
            HandlerError::InvalidBody(_)
        ));
    }

    #[test]
    fn test_empty_and_missing_bodies() {
        assert!(matches!(
            extract_file(&json!({"body": "   "})).unwrap_err(),
            HandlerError::NoFileData(_)
        ));
        assert!(matches!(
            extract_file(&json!({"body": {"nofile": true}})).unwrap_err(),
            HandlerError::NoFileData(_)
        ));
        assert!(matches!(
            extract_file(&json!({"something": "else"})).unwrap_err(),
            HandlerError::InvalidEvent
        ));
    }

    #[test]
    fn test_non_s3_records_fall_through_to_invalid_event() {
        let event = json!({"Records": [{"eventSource": "aws:sqs"}]});
        assert!(matches!(
            extract_file(&event).unwrap_err(),
            HandlerError::InvalidEvent
        ));
    }

    // ── relay ──────────────────────────────────────────────────

    #[test]
    fn test_relay_direct_and_body() {
        let direct = extract_relay_message(&json!({"question": "q", "answer": "a"}));
        let body = extract_relay_message(&json!({"body": "{\"question\":\"q\",\"answer\":\"a\"}"}));
        assert_eq!(direct, body);
        assert_eq!(direct.question, "q");
    }

    #[test]
    fn test_relay_placeholders() {
        let msg = extract_relay_message(&json!({}));
        assert_eq!(msg.question, "Unknown Question");
        assert_eq!(msg.answer, "No Answer Provided");

        let msg = extract_relay_message(&json!({"body": {"question": "q"}}));
        assert_eq!(msg.answer, "Unknown Answer");

        let msg = extract_relay_message(&json!({"body": "garbage"}));
        assert_eq!(msg.question, "Unknown Question");
        assert_eq!(msg.answer, "No Answer Provided");
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let headers = json!({"Content-TYPE": "text/markdown"});
        assert_eq!(header(Some(&headers), "content-type"), Some("text/markdown"));
        assert_eq!(header(None, "content-type"), None);
    }
}
