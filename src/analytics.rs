//! Consumption analytics over historical readings.
//!
//! All analytics are computed on demand from the readings table; nothing is
//! pre-aggregated. The window/trend/efficiency math lives in pure functions
//! so it can be tested without a store; the async entry points
//! ([`tank_consumption`], [`fleet_summary`]) fetch readings and degrade to
//! zeros or nulls when a query fails, a partial dashboard being more useful
//! than an error page.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::models::{Asset, Reading};
use crate::store::TelemetryStore;

// ---

/// Days of history scanned for the most recent refill event.
pub const REFILL_LOOKBACK_DAYS: i64 = 30;

/// Consumption over one time window, in both units the dashboard shows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct WindowConsumption {
    // ---
    pub percent: f64,
    pub liters: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    #[default]
    Stable,
}

/// Per-asset analytics, served by `GET /analytics/consumption/{asset_key}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TankConsumptionData {
    // ---
    pub asset_key: String,
    pub consumption_24h: WindowConsumption,
    pub consumption_7d: WindowConsumption,
    /// `None` when fewer than two readings exist in the window, meaning
    /// insufficient data rather than zero consumption.
    pub consumption_30d: Option<WindowConsumption>,
    /// Liters consumed per calendar day over the last seven days, oldest
    /// first. Always seven entries.
    pub daily_liters_7d: Vec<f64>,
    pub trend: TrendDirection,
    pub efficiency_score: f64,
    pub last_refill: Option<DateTime<Utc>>,
    pub current_fill_percent: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopConsumer {
    // ---
    pub asset_key: String,
    pub serial_number: String,
    pub liters_24h: f64,
}

/// Fleet-wide roll-up, served by `GET /analytics/fleet`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetSummary {
    // ---
    pub asset_count: usize,
    pub total_consumption_24h: f64,
    pub total_consumption_7d: f64,
    pub total_consumption_30d: f64,
    pub top_consumer: Option<TopConsumer>,
    pub average_efficiency: f64,
    pub fleet_trend: TrendDirection,
}

// ---

/// Full analytics for one asset. Infallible: failed reading queries degrade
/// to empty windows with a logged warning.
pub async fn tank_consumption(store: &dyn TelemetryStore, asset: &Asset) -> TankConsumptionData {
    // ---
    let day = readings_or_empty(store, asset, 24).await;
    let week = readings_or_empty(store, asset, 7 * 24).await;
    let month = readings_or_empty(store, asset, 30 * 24).await;

    let consumption_24h = window_consumption(&day).unwrap_or_default();
    let consumption_7d = window_consumption(&week).unwrap_or_default();
    let consumption_30d = window_consumption(&month);

    let daily_liters_7d = daily_liters(&week, Utc::now().date_naive());
    let trend = classify_trend(&daily_liters_7d);
    let efficiency_score = efficiency_score(
        consumption_24h.liters,
        consumption_7d.liters / 7.0,
        asset.fill_percent,
    );

    let last_refill = match store.detect_refill_events(asset.id, REFILL_LOOKBACK_DAYS).await {
        Ok(events) => events.first().map(|event| event.recorded_at),
        Err(e) => {
            tracing::warn!("Refill lookup failed for {}: {}", asset.asset_key, e);
            None
        }
    };

    TankConsumptionData {
        asset_key: asset.asset_key.clone(),
        consumption_24h,
        consumption_7d,
        consumption_30d,
        daily_liters_7d,
        trend,
        efficiency_score,
        last_refill,
        current_fill_percent: asset.fill_percent,
    }
}

/// Roll the whole fleet up into one summary. Assets are processed
/// sequentially; a failing asset contributes zeros instead of aborting the
/// aggregation.
pub async fn fleet_summary(store: &dyn TelemetryStore) -> FleetSummary {
    // ---
    let assets = match store.list_online_assets().await {
        Ok(assets) => assets,
        Err(e) => {
            tracing::warn!("Online asset query failed: {}", e);
            return FleetSummary::default();
        }
    };

    let mut summary = FleetSummary {
        asset_count: assets.len(),
        ..FleetSummary::default()
    };
    let mut all_daily: Vec<f64> = Vec::new();
    let mut efficiency_sum = 0.0;
    let mut top_liters = 0.0;

    for asset in &assets {
        let data = tank_consumption(store, asset).await;

        summary.total_consumption_24h += data.consumption_24h.liters;
        summary.total_consumption_7d += data.consumption_7d.liters;
        summary.total_consumption_30d += data.consumption_30d.map_or(0.0, |w| w.liters);
        efficiency_sum += data.efficiency_score;

        // Strictly greater, so an all-idle fleet reports no top consumer
        if data.consumption_24h.liters > top_liters {
            top_liters = data.consumption_24h.liters;
            summary.top_consumer = Some(TopConsumer {
                asset_key: asset.asset_key.clone(),
                serial_number: asset.serial_number.clone(),
                liters_24h: data.consumption_24h.liters,
            });
        }

        all_daily.extend(data.daily_liters_7d);
    }

    if !assets.is_empty() {
        summary.average_efficiency = efficiency_sum / assets.len() as f64;
    }
    summary.fleet_trend = classify_trend(&all_daily);

    summary
}

async fn readings_or_empty(store: &dyn TelemetryStore, asset: &Asset, hours: i64) -> Vec<Reading> {
    // ---
    match store.find_recent_readings(asset.id, hours).await {
        Ok(readings) => readings,
        Err(e) => {
            tracing::warn!("Reading query failed for {} ({}h): {}", asset.asset_key, hours, e);
            Vec::new()
        }
    }
}

// ---

/// Consumption between the oldest and newest reading of a window, clamped to
/// zero so a refill never reads as negative consumption. `None` when fewer
/// than two readings exist. Expects readings ordered oldest first.
pub fn window_consumption(readings: &[Reading]) -> Option<WindowConsumption> {
    // ---
    if readings.len() < 2 {
        return None;
    }
    let (oldest, newest) = (&readings[0], &readings[readings.len() - 1]);

    let percent = match (oldest.fill_percent, newest.fill_percent) {
        (Some(old), Some(new)) => (old - new).max(0.0),
        _ => 0.0,
    };
    let liters = match (oldest.liters, newest.liters) {
        (Some(old), Some(new)) => (old - new).max(0.0),
        _ => 0.0,
    };

    Some(WindowConsumption { percent, liters })
}

/// Liters consumed per calendar day, oldest day first, always seven entries.
/// Days with fewer than two readings report zero. Expects readings ordered
/// oldest first.
pub fn daily_liters(readings: &[Reading], today: NaiveDate) -> Vec<f64> {
    // ---
    let mut buckets: Vec<Vec<&Reading>> = vec![Vec::new(); 7];
    for reading in readings {
        let age = (today - reading.recorded_at.date_naive()).num_days();
        if (0..7).contains(&age) {
            buckets[(6 - age) as usize].push(reading);
        }
    }

    buckets
        .iter()
        .map(|day| {
            if day.len() < 2 {
                return 0.0;
            }
            match (day[0].liters, day[day.len() - 1].liters) {
                (Some(old), Some(new)) => (old - new).max(0.0),
                _ => 0.0,
            }
        })
        .collect()
}

/// Compare the mean of the first half of a daily sequence with the mean of
/// the second half. More than ±10% change counts as a trend; fewer than
/// three values is always stable.
pub fn classify_trend(daily: &[f64]) -> TrendDirection {
    // ---
    if daily.len() < 3 {
        return TrendDirection::Stable;
    }

    let (first, second) = daily.split_at(daily.len() / 2);
    let first_mean = mean(first);
    let second_mean = mean(second);

    let denom = if first_mean == 0.0 { 1.0 } else { first_mean };
    let percent_change = (second_mean - first_mean) / denom * 100.0;

    if percent_change > 10.0 {
        TrendDirection::Increasing
    } else if percent_change < -10.0 {
        TrendDirection::Decreasing
    } else {
        TrendDirection::Stable
    }
}

/// Score in [0, 100]: how closely the last 24 hours track the 7-day average,
/// minus a penalty of two points per percent of fill below 25%.
pub fn efficiency_score(
    consumption_24h_liters: f64,
    daily_avg_liters: f64,
    fill_percent: Option<f64>,
) -> f64 {
    // ---
    let consistency = if daily_avg_liters == 0.0 {
        0.0
    } else {
        100.0 - (consumption_24h_liters - daily_avg_liters).abs() / daily_avg_liters * 100.0
    };

    let penalty = match fill_percent {
        Some(fill) if fill < 25.0 => (25.0 - fill) * 2.0,
        _ => 0.0,
    };

    (consistency - penalty).clamp(0.0, 100.0)
}

fn mean(values: &[f64]) -> f64 {
    // ---
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::{NewAsset, NewLocation, NewReading};
    use crate::store::MemStore;
    use chrono::Duration;

    fn reading_on(day: NaiveDate, hour: u32, fill: f64, liters: f64) -> Reading {
        // ---
        Reading {
            id: 0,
            asset_id: 1,
            recorded_at: day.and_hms_opt(hour, 0, 0).unwrap().and_utc(),
            fill_percent: Some(fill),
            raw_fill_percent: None,
            liters: Some(liters),
            battery_voltage: None,
            is_online: true,
            daily_consumption: None,
            days_remaining: None,
        }
    }

    #[test]
    fn trend_matches_reference_sequences() {
        // ---
        let falling = [100.0, 100.0, 100.0, 10.0, 10.0, 10.0, 10.0];
        assert_eq!(classify_trend(&falling), TrendDirection::Decreasing);

        let rising = [10.0, 10.0, 10.0, 100.0, 100.0, 100.0, 100.0];
        assert_eq!(classify_trend(&rising), TrendDirection::Increasing);

        let flat = [50.0; 7];
        assert_eq!(classify_trend(&flat), TrendDirection::Stable);
    }

    #[test]
    fn trend_needs_at_least_three_values() {
        // ---
        assert_eq!(classify_trend(&[]), TrendDirection::Stable);
        assert_eq!(classify_trend(&[100.0, 0.0]), TrendDirection::Stable);
    }

    #[test]
    fn trend_from_idle_divides_by_one() {
        // ---
        // A fleet waking up from zero: percent change is computed against 1
        let waking = [0.0, 0.0, 0.0, 5.0, 5.0, 5.0, 5.0];
        assert_eq!(classify_trend(&waking), TrendDirection::Increasing);
    }

    #[test]
    fn window_consumption_needs_two_readings() {
        // ---
        let day = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        assert_eq!(window_consumption(&[]), None);
        assert_eq!(window_consumption(&[reading_on(day, 8, 50.0, 2500.0)]), None);
    }

    #[test]
    fn window_consumption_clamps_refills_to_zero() {
        // ---
        let day = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        let refilled = [reading_on(day, 8, 20.0, 1000.0), reading_on(day, 20, 90.0, 4500.0)];

        let window = window_consumption(&refilled).unwrap();
        assert_eq!(window.percent, 0.0);
        assert_eq!(window.liters, 0.0);

        let consumed = [reading_on(day, 8, 60.0, 3000.0), reading_on(day, 20, 55.0, 2750.0)];
        let window = window_consumption(&consumed).unwrap();
        assert_eq!(window.percent, 5.0);
        assert_eq!(window.liters, 250.0);
    }

    #[test]
    fn daily_liters_buckets_by_calendar_day() {
        // ---
        let today = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        let yesterday = today.pred_opt().unwrap();
        let readings = [
            // Two readings yesterday: 120 L consumed
            reading_on(yesterday, 6, 60.0, 3000.0),
            reading_on(yesterday, 22, 57.6, 2880.0),
            // Only one reading today: bucket reports zero
            reading_on(today, 6, 57.0, 2850.0),
        ];

        let daily = daily_liters(&readings, today);
        assert_eq!(daily.len(), 7);
        assert_eq!(&daily[..5], &[0.0; 5]);
        assert!((daily[5] - 120.0).abs() < 1e-9);
        assert_eq!(daily[6], 0.0);
    }

    #[test]
    fn efficiency_rewards_consistency_and_penalizes_low_fill() {
        // ---
        // No 7-day history: no basis for a score
        assert_eq!(efficiency_score(10.0, 0.0, Some(80.0)), 0.0);

        // Perfectly consistent, healthy fill
        assert_eq!(efficiency_score(100.0, 100.0, Some(60.0)), 100.0);

        // Perfectly consistent but fill at 20%: 100 - (25-20)*2
        assert_eq!(efficiency_score(100.0, 100.0, Some(20.0)), 90.0);

        // Unknown fill attracts no penalty
        assert_eq!(efficiency_score(100.0, 100.0, None), 100.0);

        // Wildly inconsistent clamps at zero
        assert_eq!(efficiency_score(500.0, 100.0, Some(60.0)), 0.0);
    }

    // ---

    async fn seed_asset(store: &MemStore, key: &str) -> Asset {
        // ---
        let location = store
            .upsert_location(&NewLocation {
                location_key: "yard".to_string(),
                name: "Yard".to_string(),
                customer: None,
                address: None,
                city: None,
                region: None,
                postcode: None,
                latitude: None,
                longitude: None,
                fill_percent: Some(50.0),
                is_online: true,
                last_telemetry_at: Some(Utc::now()),
                disabled: false,
            })
            .await
            .unwrap();

        store
            .upsert_asset(&NewAsset {
                asset_key: key.to_string(),
                location_id: location.id,
                serial_number: key.to_uppercase(),
                is_online: true,
                battery_voltage: Some(3.6),
                raw_fill_percent: None,
                fill_percent: Some(50.0),
                daily_consumption: None,
                days_remaining: None,
                last_telemetry_at: Some(Utc::now()),
                telemetry_epoch: None,
                capacity_liters: Some(5000.0),
                source_payload: None,
            })
            .await
            .unwrap()
    }

    async fn record(store: &MemStore, asset_id: i32, hours_ago: i64, fill: f64, liters: f64) {
        // ---
        store
            .insert_reading(&NewReading {
                asset_id,
                recorded_at: Utc::now() - Duration::hours(hours_ago),
                fill_percent: Some(fill),
                raw_fill_percent: None,
                liters: Some(liters),
                battery_voltage: Some(3.6),
                is_online: true,
                daily_consumption: None,
                days_remaining: None,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn tank_consumption_degrades_to_zeros_without_history() {
        // ---
        let store = MemStore::new();
        let asset = seed_asset(&store, "t-1").await;

        let data = tank_consumption(&store, &asset).await;
        assert_eq!(data.consumption_24h, WindowConsumption::default());
        assert_eq!(data.consumption_7d, WindowConsumption::default());
        assert_eq!(data.consumption_30d, None);
        assert_eq!(data.daily_liters_7d, vec![0.0; 7]);
        assert_eq!(data.trend, TrendDirection::Stable);
        assert_eq!(data.efficiency_score, 0.0);
        assert_eq!(data.last_refill, None);
        assert_eq!(data.current_fill_percent, Some(50.0));
    }

    #[tokio::test]
    async fn tank_consumption_reports_windows_and_refill() {
        // ---
        let store = MemStore::new();
        let asset = seed_asset(&store, "t-1").await;

        // A refill five days ago, then steady consumption
        record(&store, asset.id, 5 * 24 + 2, 20.0, 1000.0).await;
        record(&store, asset.id, 5 * 24, 90.0, 4500.0).await;
        record(&store, asset.id, 20, 60.0, 3000.0).await;
        record(&store, asset.id, 2, 58.0, 2900.0).await;

        let data = tank_consumption(&store, &asset).await;
        assert_eq!(data.consumption_24h.liters, 100.0);
        assert_eq!(data.consumption_24h.percent, 2.0);
        // Window spans the refill: clamped, not negative
        assert_eq!(data.consumption_7d.liters, 0.0);
        assert!(data.last_refill.is_some());
    }

    #[tokio::test]
    async fn fleet_summary_tracks_totals_and_top_consumer() {
        // ---
        let store = MemStore::new();
        let modest = seed_asset(&store, "a-modest").await;
        let thirsty = seed_asset(&store, "b-thirsty").await;

        record(&store, modest.id, 3, 60.0, 3000.0).await;
        record(&store, modest.id, 1, 58.0, 2900.0).await;
        record(&store, thirsty.id, 3, 80.0, 4000.0).await;
        record(&store, thirsty.id, 1, 70.0, 3500.0).await;

        let summary = fleet_summary(&store).await;
        assert_eq!(summary.asset_count, 2);
        assert_eq!(summary.total_consumption_24h, 600.0);
        assert_eq!(summary.total_consumption_7d, 600.0);

        let top = summary.top_consumer.expect("fleet should have a top consumer");
        assert_eq!(top.asset_key, "b-thirsty");
        assert_eq!(top.liters_24h, 500.0);
    }

    #[tokio::test]
    async fn idle_fleet_reports_no_top_consumer() {
        // ---
        let store = MemStore::new();
        seed_asset(&store, "a-idle").await;
        seed_asset(&store, "b-idle").await;

        let summary = fleet_summary(&store).await;
        assert_eq!(summary.asset_count, 2);
        assert_eq!(summary.total_consumption_24h, 0.0);
        assert!(summary.top_consumer.is_none());
        assert_eq!(summary.fleet_trend, TrendDirection::Stable);
    }
}
