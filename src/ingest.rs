//! Document ingestion pipeline.
//!
//! Turns a Markdown object into an index document and submits it:
//!
//! ```text
//! fetch bytes ─▶ UTF-8 decode ─▶ Markdown→HTML ─▶ attributes + id ─▶ BatchPutDocument
//! ```
//!
//! Direct uploads are first persisted to the configured bucket under a
//! timestamped key, then ingested from storage like any other object.
//! Failures are returned as [`HandlerError`]s; nothing is retried and an
//! object that was stored before indexing failed stays stored.

use chrono::{DateTime, Utc};
use tracing::{error, info};
use uuid::Uuid;

use crate::error::{HandlerError, HandlerResult};
use crate::markdown;
use crate::models::{DocumentAttribute, IndexDocument, LANGUAGE_ATTRIBUTE};
use crate::traits::HandlerContext;

/// Content type the index is told every document has.
pub const DOCUMENT_CONTENT_TYPE: &str = "HTML";
/// Content type of objects written by direct uploads.
pub const UPLOAD_CONTENT_TYPE: &str = "text/markdown";

/// How a stored object becomes an index document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestMode {
    /// Storage-trigger sync: id and title are the raw object key, raw HTML,
    /// no attributes.
    Sync,
    /// Upload processing: unique id, title from the file stem, normalized
    /// HTML and the full attribute set.
    Upload,
}

/// What was submitted to the index.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    pub document_id: String,
    pub title: String,
}

/// Result of a direct upload: where the file went and how it was indexed.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadOutcome {
    pub file_key: String,
    pub processing: IngestOutcome,
}

/// Fetch `bucket/key`, convert it and submit it to the index.
///
/// # Errors
///
/// - [`HandlerError::Backend`] if the fetch or the index call fails.
/// - [`HandlerError::Decode`] if the object is not UTF-8.
/// - [`HandlerError::PartialIndexFailure`] if the index rejects the document.
pub async fn ingest_stored(
    ctx: &HandlerContext,
    bucket: &str,
    key: &str,
    mode: IngestMode,
) -> HandlerResult<IngestOutcome> {
    let bytes = ctx.backends.objects.get_object(bucket, key).await?;
    let content = String::from_utf8(bytes).map_err(|e| HandlerError::Decode(e.to_string()))?;

    let document = build_document(
        bucket,
        key,
        &content,
        mode,
        &ctx.config.index.language_code,
        Utc::now(),
    );
    info!(
        bucket,
        key,
        document_id = %document.id,
        bytes = document.blob.len(),
        "submitting document to index"
    );

    let failed = ctx
        .backends
        .index
        .batch_put_documents(std::slice::from_ref(&document))
        .await?;

    if !failed.is_empty() {
        let detail = failed
            .iter()
            .map(|f| match f.error_code {
                Some(ref code) => format!("{} ({}): {}", f.id, code, f.error_message),
                None => format!("{}: {}", f.id, f.error_message),
            })
            .collect::<Vec<_>>()
            .join("; ");
        error!(key, failed = %detail, "index rejected document");
        return Err(HandlerError::PartialIndexFailure(detail));
    }

    Ok(IngestOutcome {
        document_id: document.id,
        title: document.title,
    })
}

/// Persist an uploaded file, then ingest it in [`IngestMode::Upload`].
///
/// # Errors
///
/// [`HandlerError::NoFileData`] for empty content, otherwise as
/// [`ingest_stored`]. When indexing fails the stored key is lost to the
/// caller; use [`store_upload`] and [`ingest_stored`] separately to keep it.
pub async fn upload_and_ingest(
    ctx: &HandlerContext,
    file_name: &str,
    content: &str,
) -> HandlerResult<UploadOutcome> {
    let file_key = store_upload(ctx, file_name, content).await?;
    let processing = ingest_stored(
        ctx,
        &ctx.config.storage.bucket,
        &file_key,
        IngestMode::Upload,
    )
    .await?;
    Ok(UploadOutcome {
        file_key,
        processing,
    })
}

/// Write an uploaded file to the configured bucket and return its key.
pub async fn store_upload(
    ctx: &HandlerContext,
    file_name: &str,
    content: &str,
) -> HandlerResult<String> {
    if content.is_empty() {
        return Err(HandlerError::NoFileData("Empty file content".to_string()));
    }

    let file_name = ensure_markdown_extension(file_name);
    let file_key = upload_key(&ctx.config.storage.upload_prefix, &file_name, Utc::now());
    info!(file = %file_name, length = content.len(), "storing uploaded file");

    ctx.backends
        .objects
        .put_object(
            &ctx.config.storage.bucket,
            &file_key,
            content.as_bytes().to_vec(),
            UPLOAD_CONTENT_TYPE,
        )
        .await?;

    info!(bucket = %ctx.config.storage.bucket, key = %file_key, "uploaded file stored");
    Ok(file_key)
}

/// Build the index document for a Markdown object.
pub fn build_document(
    bucket: &str,
    key: &str,
    content: &str,
    mode: IngestMode,
    language_code: &str,
    now: DateTime<Utc>,
) -> IndexDocument {
    match mode {
        IngestMode::Sync => IndexDocument {
            id: key.to_string(),
            title: key.to_string(),
            blob: markdown::render_html(content).into_bytes(),
            content_type: DOCUMENT_CONTENT_TYPE.to_string(),
            attributes: Vec::new(),
        },
        IngestMode::Upload => {
            let title = title_from_key(key);
            IndexDocument {
                id: document_id(key, Uuid::new_v4()),
                attributes: vec![
                    DocumentAttribute::string(LANGUAGE_ATTRIBUTE, language_code),
                    DocumentAttribute::string("source_uri", format!("s3://{}/{}", bucket, key)),
                    DocumentAttribute::string("title", title.clone()),
                    DocumentAttribute::date("updated_at", now),
                ],
                title,
                blob: markdown::render_normalized_html(content).into_bytes(),
                content_type: DOCUMENT_CONTENT_TYPE.to_string(),
            }
        }
    }
}

/// `uploads/a.md` + uuid → `uploads-a.md-<uuid>`.
pub fn document_id(key: &str, id: Uuid) -> String {
    format!("{}-{}", key.replace('/', "-"), id)
}

/// Base name of the key without its last extension.
pub fn title_from_key(key: &str) -> String {
    let file_name = key.rsplit('/').next().unwrap_or(key);
    match file_name.rfind('.') {
        // A leading dot is part of the name, not an extension.
        Some(idx) if idx > 0 => file_name[..idx].to_string(),
        _ => file_name.to_string(),
    }
}

/// `{prefix}{YYYYmmddHHMMSS}_{file_name}`
pub fn upload_key(prefix: &str, file_name: &str, now: DateTime<Utc>) -> String {
    format!("{}{}_{}", prefix, now.format("%Y%m%d%H%M%S"), file_name)
}

pub fn ensure_markdown_extension(file_name: &str) -> String {
    if file_name.to_lowercase().ends_with(".md") {
        file_name.to_string()
    } else {
        format!("{}.md", file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AttributeValue;
    use chrono::TimeZone;

    #[test]
    fn test_sync_document_uses_raw_key() {
        let doc = build_document(
            "b",
            "docs/refunds.md",
            "# Refunds",
            IngestMode::Sync,
            "en",
            Utc::now(),
        );
        assert_eq!(doc.id, "docs/refunds.md");
        assert_eq!(doc.title, "docs/refunds.md");
        assert!(doc.attributes.is_empty());
        assert_eq!(doc.content_type, "HTML");
        assert!(String::from_utf8(doc.blob).unwrap().contains("<h1>Refunds</h1>"));
    }

    #[test]
    fn test_upload_document_attributes() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let doc = build_document(
            "kb",
            "uploads/20240301120000_faq.md",
            "Hello",
            IngestMode::Upload,
            "en",
            now,
        );
        assert!(doc.id.starts_with("uploads-20240301120000_faq.md-"));
        assert_eq!(doc.title, "20240301120000_faq");
        assert_eq!(
            doc.attribute("_language_code"),
            Some(&AttributeValue::String("en".into()))
        );
        assert_eq!(
            doc.attribute("source_uri"),
            Some(&AttributeValue::String(
                "s3://kb/uploads/20240301120000_faq.md".into()
            ))
        );
        assert_eq!(doc.attribute("updated_at"), Some(&AttributeValue::Date(now)));
    }

    #[test]
    fn test_upload_ids_are_unique() {
        let a = build_document("b", "k.md", "x", IngestMode::Upload, "en", Utc::now());
        let b = build_document("b", "k.md", "x", IngestMode::Upload, "en", Utc::now());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_title_from_key() {
        assert_eq!(title_from_key("uploads/notes.md"), "notes");
        assert_eq!(title_from_key("a.b.md"), "a.b");
        assert_eq!(title_from_key("README"), "README");
        assert_eq!(title_from_key("dir/.hidden"), ".hidden");
    }

    #[test]
    fn test_upload_key_format() {
        let now = Utc.with_ymd_and_hms(2024, 12, 31, 23, 5, 9).unwrap();
        assert_eq!(
            upload_key("uploads/", "faq.md", now),
            "uploads/20241231230509_faq.md"
        );
    }

    #[test]
    fn test_ensure_markdown_extension() {
        assert_eq!(ensure_markdown_extension("notes"), "notes.md");
        assert_eq!(ensure_markdown_extension("NOTES.MD"), "NOTES.MD");
        assert_eq!(ensure_markdown_extension("a.txt"), "a.txt.md");
    }
}
