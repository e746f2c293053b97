//! Persistence layer for the tank telemetry pipeline.
//!
//! [`TelemetryStore`] is the seam between the HTTP surface and storage. The
//! production backend is PostgreSQL ([`PgStore`]); [`MemStore`] backs the
//! test suite and local development without a database. Handlers receive the
//! store as a [`DynStore`] so either backend can sit behind the same routes.

mod memory;
mod postgres;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    Alert, AlertType, Asset, Location, NewAlert, NewAsset, NewLocation, NewReading, NewSyncLog,
    Reading,
};

pub use memory::MemStore;
pub use postgres::PgStore;

// ---

/// Fill rise, in percentage points, between consecutive readings that counts
/// as a refill rather than sensor noise.
pub const REFILL_RISE_PERCENT: f64 = 5.0;

/// A fill-level jump between two consecutive readings of one asset.
#[derive(Debug, Clone, PartialEq)]
pub struct RefillEvent {
    // ---
    /// Time of the reading that showed the higher level.
    pub recorded_at: DateTime<Utc>,
    pub fill_before: f64,
    pub fill_after: f64,
}

// ---

/// Storage operations needed by the ingest pipeline, the alert engine and
/// the analytics queries.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    // ---

    /// Insert or update a site row, matching on `location_key`.
    async fn upsert_location(&self, location: &NewLocation) -> Result<Location>;

    /// Insert or update a device row, matching on `asset_key`.
    async fn upsert_asset(&self, asset: &NewAsset) -> Result<Asset>;

    async fn get_asset_by_key(&self, asset_key: &str) -> Result<Option<Asset>>;

    /// All assets currently online and not disabled.
    async fn list_online_assets(&self) -> Result<Vec<Asset>>;

    /// Append one historical sample; returns the new row id.
    async fn insert_reading(&self, reading: &NewReading) -> Result<i64>;

    /// Readings for an asset no older than `hours`, oldest first.
    async fn find_recent_readings(&self, asset_id: i32, hours: i64) -> Result<Vec<Reading>>;

    /// Consecutive-reading fill rises above [`REFILL_RISE_PERCENT`] within
    /// the lookback window, newest first.
    async fn detect_refill_events(
        &self,
        asset_id: i32,
        lookback_days: i64,
    ) -> Result<Vec<RefillEvent>>;

    /// Insert an alert unless an active one of the same type already exists
    /// for the asset. Returns `false` when the insert was suppressed.
    async fn create_alert(&self, alert: &NewAlert) -> Result<bool>;

    async fn find_active_alert(
        &self,
        asset_id: i32,
        alert_type: AlertType,
    ) -> Result<Option<Alert>>;

    /// Active alerts for an asset, newest first.
    async fn list_active_alerts(&self, asset_id: i32) -> Result<Vec<Alert>>;

    /// Mark the active alert of the given type resolved. Returns `false`
    /// when no active alert of that type existed.
    async fn resolve_alert(&self, asset_id: i32, alert_type: AlertType) -> Result<bool>;

    /// Append one batch audit row.
    async fn record_sync_log(&self, entry: &NewSyncLog) -> Result<()>;
}

/// Shared handle to whichever backend the process was started with.
pub type DynStore = Arc<dyn TelemetryStore>;
