//! Document upload: index an object that is already stored, or store and
//! index a file carried in the request.

use serde_json::{json, Value};
use tracing::{error, info};

use crate::error::HandlerError;
use crate::ingest::{self, IngestMode, IngestOutcome};
use crate::models::HandlerResponse;
use crate::normalize::{self, FileSource};
use crate::traits::HandlerContext;

pub async fn handle(ctx: &HandlerContext, event: &Value) -> HandlerResponse {
    let source = match normalize::extract_file(event) {
        Ok(source) => source,
        Err(e) => return input_error(e),
    };

    match source {
        FileSource::Stored(object) => {
            info!(bucket = %object.bucket, key = %object.key, "processing stored object");
            match ingest::ingest_stored(ctx, &object.bucket, &object.key, IngestMode::Upload).await
            {
                Ok(outcome) => ok(processed_body(&outcome)),
                Err(e) => processing_error(e, None),
            }
        }
        FileSource::Inline { file_name, content } => {
            info!(file = %file_name, "processing direct upload");
            let file_key = match ingest::store_upload(ctx, &file_name, &content).await {
                Ok(key) => key,
                Err(e) if e.is_client_error() => return input_error(e),
                Err(e) => {
                    error!(error = %e, "error uploading file");
                    return error_response(500, &format!("Error uploading file: {}", e), None);
                }
            };

            match ingest::ingest_stored(
                ctx,
                &ctx.config.storage.bucket,
                &file_key,
                IngestMode::Upload,
            )
            .await
            {
                Ok(outcome) => ok(json!({
                    "message": "File uploaded and processed successfully",
                    "fileKey": file_key,
                    "processingResult": processed_body(&outcome),
                })),
                // The object stays stored; report where it went.
                Err(e) => processing_error(e, Some(&file_key)),
            }
        }
    }
}

fn processed_body(outcome: &IngestOutcome) -> Value {
    json!({
        "message": "File processed and indexed successfully",
        "documentId": outcome.document_id,
        "title": outcome.title,
    })
}

fn ok(body: Value) -> HandlerResponse {
    HandlerResponse::new(200, &body).with_cors()
}

fn input_error(e: HandlerError) -> HandlerResponse {
    error!(error = %e, "rejected upload request");
    error_response(e.status_code(), &e.to_string(), None)
}

fn processing_error(e: HandlerError, file_key: Option<&str>) -> HandlerResponse {
    error!(error = %e, "error processing file");
    error_response(500, &format!("Failed to process file: {}", e), file_key)
}

fn error_response(status: u16, message: &str, file_key: Option<&str>) -> HandlerResponse {
    let mut body = json!({ "error": message });
    if let Some(key) = file_key {
        body["fileKey"] = json!(key);
    }
    HandlerResponse::new(status, &body).with_cors()
}
