//! In-memory backend for [`TelemetryStore`].
//!
//! Mirrors the PostgreSQL semantics (slug-keyed upserts, at most one active
//! alert per asset and type, newest-first refill events) over plain vectors
//! behind a mutex. Used by the test suite and for running the service
//! without a database.

use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::models::{
    Alert, AlertType, Asset, Location, NewAlert, NewAsset, NewLocation, NewReading, NewSyncLog,
    Reading,
};

use super::{RefillEvent, TelemetryStore, REFILL_RISE_PERCENT};

#[derive(Debug, Default)]
struct Inner {
    // ---
    locations: Vec<Location>,
    assets: Vec<Asset>,
    readings: Vec<Reading>,
    alerts: Vec<Alert>,
    sync_logs: Vec<NewSyncLog>,
    next_location_id: i32,
    next_asset_id: i32,
    next_reading_id: i64,
}

/// Store holding everything in process memory.
#[derive(Debug, Default)]
pub struct MemStore {
    // ---
    inner: Mutex<Inner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| anyhow!("store mutex poisoned"))
    }

    // ---
    // Introspection helpers for tests.

    pub fn location_count(&self) -> usize {
        self.inner.lock().map(|g| g.locations.len()).unwrap_or(0)
    }

    pub fn asset_count(&self) -> usize {
        self.inner.lock().map(|g| g.assets.len()).unwrap_or(0)
    }

    pub fn reading_count(&self) -> usize {
        self.inner.lock().map(|g| g.readings.len()).unwrap_or(0)
    }

    pub fn sync_log_count(&self) -> usize {
        self.inner.lock().map(|g| g.sync_logs.len()).unwrap_or(0)
    }

    pub fn last_sync_log(&self) -> Option<NewSyncLog> {
        self.inner.lock().ok().and_then(|g| g.sync_logs.last().cloned())
    }
}

#[async_trait]
impl TelemetryStore for MemStore {
    // ---

    async fn upsert_location(&self, location: &NewLocation) -> Result<Location> {
        // ---
        let mut inner = self.lock()?;

        if let Some(existing) = inner
            .locations
            .iter_mut()
            .find(|l| l.location_key == location.location_key)
        {
            existing.name = location.name.clone();
            existing.customer = location.customer.clone();
            existing.address = location.address.clone();
            existing.city = location.city.clone();
            existing.region = location.region.clone();
            existing.postcode = location.postcode.clone();
            existing.latitude = location.latitude;
            existing.longitude = location.longitude;
            // Last-known aggregate level survives deliveries without one
            existing.fill_percent = location.fill_percent.or(existing.fill_percent);
            existing.is_online = location.is_online;
            existing.last_telemetry_at = location.last_telemetry_at;
            existing.disabled = location.disabled;
            return Ok(existing.clone());
        }

        inner.next_location_id += 1;
        let row = Location {
            id: inner.next_location_id,
            location_key: location.location_key.clone(),
            name: location.name.clone(),
            customer: location.customer.clone(),
            address: location.address.clone(),
            city: location.city.clone(),
            region: location.region.clone(),
            postcode: location.postcode.clone(),
            latitude: location.latitude,
            longitude: location.longitude,
            fill_percent: location.fill_percent,
            is_online: location.is_online,
            last_telemetry_at: location.last_telemetry_at,
            disabled: location.disabled,
        };
        inner.locations.push(row.clone());
        Ok(row)
    }

    async fn upsert_asset(&self, asset: &NewAsset) -> Result<Asset> {
        // ---
        let mut inner = self.lock()?;

        if let Some(existing) = inner.assets.iter_mut().find(|a| a.asset_key == asset.asset_key) {
            existing.location_id = asset.location_id;
            existing.serial_number = asset.serial_number.clone();
            existing.is_online = asset.is_online;
            existing.battery_voltage = asset.battery_voltage;
            existing.raw_fill_percent = asset.raw_fill_percent;
            existing.fill_percent = asset.fill_percent;
            existing.daily_consumption = asset.daily_consumption;
            existing.days_remaining = asset.days_remaining;
            existing.last_telemetry_at = asset.last_telemetry_at;
            existing.telemetry_epoch = asset.telemetry_epoch;
            existing.capacity_liters = asset.capacity_liters.or(existing.capacity_liters);
            existing.source_payload = asset.source_payload.clone();
            return Ok(existing.clone());
        }

        inner.next_asset_id += 1;
        let row = Asset {
            id: inner.next_asset_id,
            asset_key: asset.asset_key.clone(),
            location_id: asset.location_id,
            serial_number: asset.serial_number.clone(),
            is_online: asset.is_online,
            battery_voltage: asset.battery_voltage,
            raw_fill_percent: asset.raw_fill_percent,
            fill_percent: asset.fill_percent,
            daily_consumption: asset.daily_consumption,
            days_remaining: asset.days_remaining,
            last_telemetry_at: asset.last_telemetry_at,
            telemetry_epoch: asset.telemetry_epoch,
            capacity_liters: asset.capacity_liters,
            source_payload: asset.source_payload.clone(),
        };
        inner.assets.push(row.clone());
        Ok(row)
    }

    async fn get_asset_by_key(&self, asset_key: &str) -> Result<Option<Asset>> {
        // ---
        let inner = self.lock()?;
        Ok(inner.assets.iter().find(|a| a.asset_key == asset_key).cloned())
    }

    async fn list_online_assets(&self) -> Result<Vec<Asset>> {
        // ---
        let inner = self.lock()?;

        let mut assets: Vec<Asset> = inner
            .assets
            .iter()
            .filter(|a| a.is_online)
            .filter(|a| {
                inner
                    .locations
                    .iter()
                    .find(|l| l.id == a.location_id)
                    .is_some_and(|l| !l.disabled)
            })
            .cloned()
            .collect();
        assets.sort_by(|a, b| a.asset_key.cmp(&b.asset_key));
        Ok(assets)
    }

    async fn insert_reading(&self, reading: &NewReading) -> Result<i64> {
        // ---
        let mut inner = self.lock()?;

        inner.next_reading_id += 1;
        let id = inner.next_reading_id;
        inner.readings.push(Reading {
            id,
            asset_id: reading.asset_id,
            recorded_at: reading.recorded_at,
            fill_percent: reading.fill_percent,
            raw_fill_percent: reading.raw_fill_percent,
            liters: reading.liters,
            battery_voltage: reading.battery_voltage,
            is_online: reading.is_online,
            daily_consumption: reading.daily_consumption,
            days_remaining: reading.days_remaining,
        });
        Ok(id)
    }

    async fn find_recent_readings(&self, asset_id: i32, hours: i64) -> Result<Vec<Reading>> {
        // ---
        let cutoff = Utc::now() - Duration::hours(hours);
        let inner = self.lock()?;

        let mut readings: Vec<Reading> = inner
            .readings
            .iter()
            .filter(|r| r.asset_id == asset_id && r.recorded_at >= cutoff)
            .cloned()
            .collect();
        readings.sort_by_key(|r| r.recorded_at);
        Ok(readings)
    }

    async fn detect_refill_events(
        &self,
        asset_id: i32,
        lookback_days: i64,
    ) -> Result<Vec<RefillEvent>> {
        // ---
        let cutoff = Utc::now() - Duration::days(lookback_days);
        let inner = self.lock()?;

        // Same rule as the SQL window: compare consecutive measured levels,
        // skipping readings without one.
        let mut measured: Vec<(chrono::DateTime<Utc>, f64)> = inner
            .readings
            .iter()
            .filter(|r| r.asset_id == asset_id && r.recorded_at >= cutoff)
            .filter_map(|r| r.fill_percent.map(|fill| (r.recorded_at, fill)))
            .collect();
        measured.sort_by_key(|(at, _)| *at);

        let mut events: Vec<RefillEvent> = measured
            .windows(2)
            .filter(|pair| pair[1].1 - pair[0].1 > REFILL_RISE_PERCENT)
            .map(|pair| RefillEvent {
                recorded_at: pair[1].0,
                fill_before: pair[0].1,
                fill_after: pair[1].1,
            })
            .collect();
        events.reverse();
        Ok(events)
    }

    async fn create_alert(&self, alert: &NewAlert) -> Result<bool> {
        // ---
        let mut inner = self.lock()?;

        let duplicate = inner
            .alerts
            .iter()
            .any(|a| a.asset_id == alert.asset_id && a.alert_type == alert.alert_type && a.active);
        if duplicate {
            return Ok(false);
        }

        inner.alerts.push(Alert {
            id: Uuid::new_v4(),
            asset_id: alert.asset_id,
            alert_type: alert.alert_type,
            severity: alert.severity,
            title: alert.title.clone(),
            message: alert.message.clone(),
            current_value: alert.current_value,
            threshold_value: alert.threshold_value,
            previous_value: alert.previous_value,
            active: true,
            resolved_at: None,
            created_at: Utc::now(),
        });
        Ok(true)
    }

    async fn find_active_alert(
        &self,
        asset_id: i32,
        alert_type: AlertType,
    ) -> Result<Option<Alert>> {
        // ---
        let inner = self.lock()?;
        Ok(inner
            .alerts
            .iter()
            .find(|a| a.asset_id == asset_id && a.alert_type == alert_type && a.active)
            .cloned())
    }

    async fn list_active_alerts(&self, asset_id: i32) -> Result<Vec<Alert>> {
        // ---
        let inner = self.lock()?;

        let mut alerts: Vec<Alert> = inner
            .alerts
            .iter()
            .filter(|a| a.asset_id == asset_id && a.active)
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(alerts)
    }

    async fn resolve_alert(&self, asset_id: i32, alert_type: AlertType) -> Result<bool> {
        // ---
        let mut inner = self.lock()?;

        match inner
            .alerts
            .iter_mut()
            .find(|a| a.asset_id == asset_id && a.alert_type == alert_type && a.active)
        {
            Some(alert) => {
                alert.active = false;
                alert.resolved_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_sync_log(&self, entry: &NewSyncLog) -> Result<()> {
        // ---
        let mut inner = self.lock()?;
        inner.sync_logs.push(entry.clone());
        Ok(())
    }
}
