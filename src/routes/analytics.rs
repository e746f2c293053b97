//! Consumption analytics endpoints for the tankflow backend.
//!
//! Exposes `GET /analytics/consumption/{asset_key}` for one tank and
//! `GET /analytics/fleet` for the whole fleet. Both serve best-effort data:
//! storage failures inside the analytics engine degrade to zeros or nulls
//! rather than surfacing as errors, so the dashboard always has something
//! to draw.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;
use tracing::{error, info};

use crate::analytics;
use crate::store::DynStore;
use crate::Config;

// ---

pub fn router() -> Router<(DynStore, Config)> {
    // ---
    Router::new()
        .route("/analytics/consumption/{asset_key}", get(consumption))
        .route("/analytics/fleet", get(fleet))
}

async fn consumption(
    Path(asset_key): Path<String>,
    State((store, _config)): State<(DynStore, Config)>,
) -> impl IntoResponse {
    // ---
    info!("GET /analytics/consumption/{}", asset_key);

    match store.get_asset_by_key(&asset_key).await {
        Ok(Some(asset)) => {
            let data = analytics::tank_consumption(store.as_ref(), &asset).await;
            (StatusCode::OK, Json(data)).into_response()
        }
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("unknown asset '{asset_key}'") })),
        )
            .into_response(),
        Err(e) => {
            error!("GET /analytics/consumption/{} - {}", asset_key, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "storage failure" })),
            )
                .into_response()
        }
    }
}

async fn fleet(State((store, _config)): State<(DynStore, Config)>) -> impl IntoResponse {
    // ---
    info!("GET /analytics/fleet");

    let summary = analytics::fleet_summary(store.as_ref()).await;
    Json(summary)
}
