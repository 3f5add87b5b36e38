//! Storage-trigger sync: one created object in, one index document out.

use serde_json::{json, Value};
use tracing::error;

use crate::error::HandlerResult;
use crate::ingest::{self, IngestMode, IngestOutcome};
use crate::models::HandlerResponse;
use crate::normalize;
use crate::traits::HandlerContext;

pub async fn handle(ctx: &HandlerContext, event: &Value) -> HandlerResponse {
    match run(ctx, event).await {
        Ok(_) => HandlerResponse::new(200, &json!("File successfully synced to Kendra")),
        Err(e) => {
            error!(error = %e, "error syncing document to index");
            HandlerResponse::new(
                500,
                &json!(format!("Error syncing document to Kendra: {}", e)),
            )
        }
    }
}

async fn run(ctx: &HandlerContext, event: &Value) -> HandlerResult<IngestOutcome> {
    let object = normalize::storage_object(event)?;
    ingest::ingest_stored(ctx, &object.bucket, &object.key, IngestMode::Sync).await
}
