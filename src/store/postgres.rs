//! PostgreSQL backend for [`TelemetryStore`].
//!
//! All queries are plain parameterized SQL against the schema created by
//! [`crate::schema::create_schema`]. Upserts key on the slug columns so that
//! webhook redeliveries update rows in place, and alert inserts lean on the
//! partial unique index over active alerts to stay race-free.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{
    Alert, AlertType, Asset, Location, NewAlert, NewAsset, NewLocation, NewReading, NewSyncLog,
    Reading,
};

use super::{RefillEvent, TelemetryStore, REFILL_RISE_PERCENT};

/// Store backed by a shared connection pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    // ---
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TelemetryStore for PgStore {
    // ---

    async fn upsert_location(&self, location: &NewLocation) -> Result<Location> {
        // ---
        // Last write wins, no temporal check. fill_percent is the
        // last-known aggregate level, kept when a delivery omits it.
        let row = sqlx::query_as::<_, Location>(
            r#"
            INSERT INTO locations (
                location_key, name, customer, address, city, region, postcode,
                latitude, longitude, fill_percent, is_online, last_telemetry_at, disabled
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (location_key) DO UPDATE SET
                name = EXCLUDED.name,
                customer = EXCLUDED.customer,
                address = EXCLUDED.address,
                city = EXCLUDED.city,
                region = EXCLUDED.region,
                postcode = EXCLUDED.postcode,
                latitude = EXCLUDED.latitude,
                longitude = EXCLUDED.longitude,
                fill_percent = COALESCE(EXCLUDED.fill_percent, locations.fill_percent),
                is_online = EXCLUDED.is_online,
                last_telemetry_at = EXCLUDED.last_telemetry_at,
                disabled = EXCLUDED.disabled
            RETURNING *
            "#,
        )
        .bind(&location.location_key)
        .bind(&location.name)
        .bind(&location.customer)
        .bind(&location.address)
        .bind(&location.city)
        .bind(&location.region)
        .bind(&location.postcode)
        .bind(location.latitude)
        .bind(location.longitude)
        .bind(location.fill_percent)
        .bind(location.is_online)
        .bind(location.last_telemetry_at)
        .bind(location.disabled)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn upsert_asset(&self, asset: &NewAsset) -> Result<Asset> {
        // ---
        let row = sqlx::query_as::<_, Asset>(
            r#"
            INSERT INTO assets (
                asset_key, location_id, serial_number, is_online, battery_voltage,
                raw_fill_percent, fill_percent, daily_consumption, days_remaining,
                last_telemetry_at, telemetry_epoch, capacity_liters, source_payload
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (asset_key) DO UPDATE SET
                location_id = EXCLUDED.location_id,
                serial_number = EXCLUDED.serial_number,
                is_online = EXCLUDED.is_online,
                battery_voltage = EXCLUDED.battery_voltage,
                raw_fill_percent = EXCLUDED.raw_fill_percent,
                fill_percent = EXCLUDED.fill_percent,
                daily_consumption = EXCLUDED.daily_consumption,
                days_remaining = EXCLUDED.days_remaining,
                last_telemetry_at = EXCLUDED.last_telemetry_at,
                telemetry_epoch = EXCLUDED.telemetry_epoch,
                capacity_liters = COALESCE(EXCLUDED.capacity_liters, assets.capacity_liters),
                source_payload = EXCLUDED.source_payload
            RETURNING *
            "#,
        )
        .bind(&asset.asset_key)
        .bind(asset.location_id)
        .bind(&asset.serial_number)
        .bind(asset.is_online)
        .bind(asset.battery_voltage)
        .bind(asset.raw_fill_percent)
        .bind(asset.fill_percent)
        .bind(asset.daily_consumption)
        .bind(asset.days_remaining)
        .bind(asset.last_telemetry_at)
        .bind(asset.telemetry_epoch)
        .bind(asset.capacity_liters)
        .bind(&asset.source_payload)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn get_asset_by_key(&self, asset_key: &str) -> Result<Option<Asset>> {
        // ---
        let row = sqlx::query_as::<_, Asset>("SELECT * FROM assets WHERE asset_key = $1")
            .bind(asset_key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row)
    }

    async fn list_online_assets(&self) -> Result<Vec<Asset>> {
        // ---
        let rows = sqlx::query_as::<_, Asset>(
            r#"
            SELECT a.* FROM assets a
            JOIN locations l ON l.id = a.location_id
            WHERE a.is_online AND NOT l.disabled
            ORDER BY a.asset_key
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn insert_reading(&self, reading: &NewReading) -> Result<i64> {
        // ---
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO readings (
                asset_id, recorded_at, fill_percent, raw_fill_percent, liters,
                battery_voltage, is_online, daily_consumption, days_remaining
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(reading.asset_id)
        .bind(reading.recorded_at)
        .bind(reading.fill_percent)
        .bind(reading.raw_fill_percent)
        .bind(reading.liters)
        .bind(reading.battery_voltage)
        .bind(reading.is_online)
        .bind(reading.daily_consumption)
        .bind(reading.days_remaining)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn find_recent_readings(&self, asset_id: i32, hours: i64) -> Result<Vec<Reading>> {
        // ---
        let cutoff = Utc::now() - Duration::hours(hours);

        let rows = sqlx::query_as::<_, Reading>(
            r#"
            SELECT * FROM readings
            WHERE asset_id = $1 AND recorded_at >= $2
            ORDER BY recorded_at ASC
            "#,
        )
        .bind(asset_id)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn detect_refill_events(
        &self,
        asset_id: i32,
        lookback_days: i64,
    ) -> Result<Vec<RefillEvent>> {
        // ---
        let cutoff = Utc::now() - Duration::days(lookback_days);

        // Readings without a fill level are skipped so the window compares
        // consecutive measured levels.
        let rows = sqlx::query(
            r#"
            SELECT recorded_at, fill_before, fill_after FROM (
                SELECT
                    recorded_at,
                    LAG(fill_percent) OVER (ORDER BY recorded_at) AS fill_before,
                    fill_percent AS fill_after
                FROM readings
                WHERE asset_id = $1 AND recorded_at >= $2 AND fill_percent IS NOT NULL
            ) pairs
            WHERE fill_before IS NOT NULL AND fill_after - fill_before > $3
            ORDER BY recorded_at DESC
            "#,
        )
        .bind(asset_id)
        .bind(cutoff)
        .bind(REFILL_RISE_PERCENT)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(RefillEvent {
                    recorded_at: row.try_get("recorded_at")?,
                    fill_before: row.try_get("fill_before")?,
                    fill_after: row.try_get("fill_after")?,
                })
            })
            .collect()
    }

    async fn create_alert(&self, alert: &NewAlert) -> Result<bool> {
        // ---
        let result = sqlx::query(
            r#"
            INSERT INTO alerts (
                id, asset_id, alert_type, severity, title, message,
                current_value, threshold_value, previous_value, active, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, TRUE, NOW())
            ON CONFLICT (asset_id, alert_type) WHERE active DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(alert.asset_id)
        .bind(alert.alert_type.as_str())
        .bind(alert.severity.as_str())
        .bind(&alert.title)
        .bind(&alert.message)
        .bind(alert.current_value)
        .bind(alert.threshold_value)
        .bind(alert.previous_value)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_active_alert(
        &self,
        asset_id: i32,
        alert_type: AlertType,
    ) -> Result<Option<Alert>> {
        // ---
        let row = sqlx::query_as::<_, Alert>(
            "SELECT * FROM alerts WHERE asset_id = $1 AND alert_type = $2 AND active",
        )
        .bind(asset_id)
        .bind(alert_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn list_active_alerts(&self, asset_id: i32) -> Result<Vec<Alert>> {
        // ---
        let rows = sqlx::query_as::<_, Alert>(
            r#"
            SELECT * FROM alerts
            WHERE asset_id = $1 AND active
            ORDER BY created_at DESC
            "#,
        )
        .bind(asset_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn resolve_alert(&self, asset_id: i32, alert_type: AlertType) -> Result<bool> {
        // ---
        let result = sqlx::query(
            r#"
            UPDATE alerts SET active = FALSE, resolved_at = NOW()
            WHERE asset_id = $1 AND alert_type = $2 AND active
            "#,
        )
        .bind(asset_id)
        .bind(alert_type.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_sync_log(&self, entry: &NewSyncLog) -> Result<()> {
        // ---
        sqlx::query(
            r#"
            INSERT INTO sync_logs (
                total_records, processed_records, error_count, duration_ms, errors, created_at
            ) VALUES ($1, $2, $3, $4, $5, NOW())
            "#,
        )
        .bind(entry.total_records)
        .bind(entry.processed_records)
        .bind(entry.error_count)
        .bind(entry.duration_ms)
        .bind(&entry.errors)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

// ---

// The alert_type and severity columns are plain TEXT, decoded through the
// enum string forms rather than a DB enum type.
impl<'r> sqlx::FromRow<'r, PgRow> for Alert {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        // ---
        let alert_type: String = row.try_get("alert_type")?;
        let severity: String = row.try_get("severity")?;

        Ok(Alert {
            id: row.try_get("id")?,
            asset_id: row.try_get("asset_id")?,
            alert_type: alert_type
                .parse()
                .map_err(|e: anyhow::Error| sqlx::Error::ColumnDecode {
                    index: "alert_type".into(),
                    source: e.into(),
                })?,
            severity: severity
                .parse()
                .map_err(|e: anyhow::Error| sqlx::Error::ColumnDecode {
                    index: "severity".into(),
                    source: e.into(),
                })?,
            title: row.try_get("title")?,
            message: row.try_get("message")?,
            current_value: row.try_get("current_value")?,
            threshold_value: row.try_get("threshold_value")?,
            previous_value: row.try_get("previous_value")?,
            active: row.try_get("active")?,
            resolved_at: row.try_get("resolved_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}
