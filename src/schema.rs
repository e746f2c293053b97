//! Database schema management for `tankflow`.
//!
//! Ensures required tables and indexes exist before serving requests.
//! Applied once on startup from `main.rs`.

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Create or update the database schema (idempotent).
///
/// Creates the `locations`, `assets`, `readings`, `alerts` and `sync_logs`
/// tables together with their indexes. Safe to call on every startup; no-op
/// if objects already exist.
///
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    // Sites, keyed by the slug of their name
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS locations (
            id                SERIAL PRIMARY KEY,
            location_key      TEXT NOT NULL UNIQUE,
            name              TEXT NOT NULL,
            customer          TEXT,
            address           TEXT,
            city              TEXT,
            region            TEXT,
            postcode          TEXT,
            latitude          DOUBLE PRECISION,
            longitude         DOUBLE PRECISION,
            fill_percent      DOUBLE PRECISION,
            is_online         BOOLEAN NOT NULL DEFAULT FALSE,
            last_telemetry_at TIMESTAMPTZ,
            disabled          BOOLEAN NOT NULL DEFAULT FALSE
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Tank devices, keyed by the slug of their serial number
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS assets (
            id                SERIAL PRIMARY KEY,
            asset_key         TEXT NOT NULL UNIQUE,
            location_id       INTEGER NOT NULL REFERENCES locations (id),
            serial_number     TEXT NOT NULL,
            is_online         BOOLEAN NOT NULL DEFAULT FALSE,
            battery_voltage   DOUBLE PRECISION,
            raw_fill_percent  DOUBLE PRECISION,
            fill_percent      DOUBLE PRECISION,
            daily_consumption DOUBLE PRECISION,
            days_remaining    DOUBLE PRECISION,
            last_telemetry_at TIMESTAMPTZ,
            telemetry_epoch   BIGINT,
            capacity_liters   DOUBLE PRECISION,
            source_payload    JSONB
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Append-only history, one row per webhook record
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS readings (
            id                BIGSERIAL PRIMARY KEY,
            asset_id          INTEGER NOT NULL REFERENCES assets (id),
            recorded_at       TIMESTAMPTZ NOT NULL,
            fill_percent      DOUBLE PRECISION,
            raw_fill_percent  DOUBLE PRECISION,
            liters            DOUBLE PRECISION,
            battery_voltage   DOUBLE PRECISION,
            is_online         BOOLEAN NOT NULL DEFAULT FALSE,
            daily_consumption DOUBLE PRECISION,
            days_remaining    DOUBLE PRECISION
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Threshold breaches; the partial unique index below enforces at most
    // one active alert per asset and type
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS alerts (
            id              UUID PRIMARY KEY,
            asset_id        INTEGER NOT NULL REFERENCES assets (id),
            alert_type      TEXT NOT NULL,
            severity        TEXT NOT NULL,
            title           TEXT NOT NULL,
            message         TEXT NOT NULL,
            current_value   DOUBLE PRECISION NOT NULL,
            threshold_value DOUBLE PRECISION NOT NULL,
            previous_value  DOUBLE PRECISION,
            active          BOOLEAN NOT NULL DEFAULT TRUE,
            resolved_at     TIMESTAMPTZ,
            created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Audit trail of processed webhook batches
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_logs (
            id                SERIAL PRIMARY KEY,
            total_records     INTEGER NOT NULL,
            processed_records INTEGER NOT NULL,
            error_count       INTEGER NOT NULL,
            duration_ms       BIGINT NOT NULL,
            errors            TEXT[] NOT NULL DEFAULT '{}',
            created_at        TIMESTAMPTZ NOT NULL DEFAULT NOW()
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Basic indexes for common queries
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_readings_asset_time
            ON readings (asset_id, recorded_at);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS uniq_alerts_active
            ON alerts (asset_id, alert_type) WHERE active;
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
