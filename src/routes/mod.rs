use axum::Router;

use crate::store::DynStore;
use crate::Config;

mod alerts;
mod analytics;
mod health;
mod webhook;

// ---

pub fn router(store: DynStore, config: Config) -> Router {
    // ---
    Router::new()
        .merge(webhook::router())
        .merge(analytics::router())
        .merge(alerts::router())
        .merge(health::router())
        .with_state((store, config))
}
