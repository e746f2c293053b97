//! Alert endpoints for the tankflow backend.
//!
//! Exposes `GET /alerts/{asset_key}` listing an asset's active alerts and
//! `POST /alerts/{asset_key}/{alert_type}/resolve` closing one. Resolution
//! is idempotent at the HTTP level: resolving an alert that is not active
//! answers 200 with `resolved: false`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tracing::{error, info};

use crate::models::AlertType;
use crate::store::DynStore;
use crate::Config;

// ---

pub fn router() -> Router<(DynStore, Config)> {
    // ---
    Router::new()
        .route("/alerts/{asset_key}", get(list_alerts))
        .route("/alerts/{asset_key}/{alert_type}/resolve", post(resolve_alert))
}

async fn list_alerts(
    Path(asset_key): Path<String>,
    State((store, _config)): State<(DynStore, Config)>,
) -> impl IntoResponse {
    // ---
    info!("GET /alerts/{}", asset_key);

    let asset = match store.get_asset_by_key(&asset_key).await {
        Ok(Some(asset)) => asset,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": format!("unknown asset '{asset_key}'") })),
            )
                .into_response();
        }
        Err(e) => {
            error!("GET /alerts/{} - {}", asset_key, e);
            return storage_failure();
        }
    };

    match store.list_active_alerts(asset.id).await {
        Ok(alerts) => (StatusCode::OK, Json(alerts)).into_response(),
        Err(e) => {
            error!("GET /alerts/{} - {}", asset_key, e);
            storage_failure()
        }
    }
}

async fn resolve_alert(
    Path((asset_key, alert_type)): Path<(String, String)>,
    State((store, _config)): State<(DynStore, Config)>,
) -> impl IntoResponse {
    // ---
    info!("POST /alerts/{}/{}/resolve", asset_key, alert_type);

    let alert_type: AlertType = match alert_type.parse() {
        Ok(alert_type) => alert_type,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() })))
                .into_response();
        }
    };

    let asset = match store.get_asset_by_key(&asset_key).await {
        Ok(Some(asset)) => asset,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": format!("unknown asset '{asset_key}'") })),
            )
                .into_response();
        }
        Err(e) => {
            error!("POST /alerts/{}/{}/resolve - {}", asset_key, alert_type, e);
            return storage_failure();
        }
    };

    match store.resolve_alert(asset.id, alert_type).await {
        Ok(resolved) => (StatusCode::OK, Json(json!({ "resolved": resolved }))).into_response(),
        Err(e) => {
            error!("POST /alerts/{}/{}/resolve - {}", asset_key, alert_type, e);
            storage_failure()
        }
    }
}

// ---

fn storage_failure() -> axum::response::Response {
    // ---
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "storage failure" })),
    )
        .into_response()
}
