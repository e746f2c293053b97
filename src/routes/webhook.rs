//! Telemetry ingestion endpoint for the tankflow backend.
//!
//! Exposes `POST /webhook/telemetry`, the entry point the device platform
//! pushes batches to. The handler authenticates the bearer token, normalizes
//! the body (single object or array) into a record list, runs the ingestion
//! pipeline, and always answers 200 with a batch summary once the run
//! completed, even when individual records failed.

use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::ingest::{self, ERROR_SAMPLE_LIMIT};
use crate::store::DynStore;
use crate::Config;

// ---

pub fn router() -> Router<(DynStore, Config)> {
    // ---
    Router::new().route("/webhook/telemetry", post(handler))
}

/// Counters echoed back to the platform after a batch run.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchStats {
    // ---
    total_records: usize,
    processed_records: usize,
    error_count: usize,
    /// Elapsed wall time, e.g. `"42ms"`.
    duration: String,
}

#[derive(Serialize)]
struct WebhookResponse {
    // ---
    success: bool,
    message: String,
    stats: BatchStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<Vec<String>>,
}

async fn handler(
    State((store, config)): State<(DynStore, Config)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    // ---
    // Authenticate before touching the database
    if !authorized(&headers, &config.webhook_secret) {
        warn!("POST /webhook/telemetry - rejected: bad or missing bearer token");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "success": false, "message": "Unauthorized" })),
        )
            .into_response();
    }

    // The platform sends either one payload object or an array of them
    let records = match body {
        Value::Array(items) => items,
        Value::Object(_) => vec![body],
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "success": false,
                    "message": "Body must be a JSON object or array of device payloads",
                })),
            )
                .into_response();
        }
    };

    info!("POST /webhook/telemetry - {} record(s)", records.len());

    let outcome = ingest::process_batch(store.as_ref(), &config.thresholds, records).await;

    let errors = if outcome.errors.is_empty() {
        None
    } else {
        Some(
            outcome
                .errors
                .iter()
                .take(ERROR_SAMPLE_LIMIT)
                .cloned()
                .collect(),
        )
    };

    let response = WebhookResponse {
        success: outcome.errors.is_empty(),
        message: format!("Processed {} of {} records", outcome.processed, outcome.total),
        stats: BatchStats {
            total_records: outcome.total,
            processed_records: outcome.processed,
            error_count: outcome.errors.len(),
            duration: format!("{}ms", outcome.duration_ms),
        },
        errors,
    };

    (StatusCode::OK, Json(response)).into_response()
}

// ---

fn authorized(headers: &HeaderMap, secret: &str) -> bool {
    // ---
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .is_some_and(|token| token == secret)
}
