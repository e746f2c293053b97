//! Alert engine for the tank telemetry pipeline.
//!
//! Runs once per processed webhook record, after the asset row has been
//! refreshed. Rule evaluation is pure ([`rule_candidates`]); persistence and
//! deduplication go through the store, which refuses a second active alert
//! of the same type for the same asset. Store failures are logged and do not
//! fail the record that triggered the evaluation.

use crate::config::AlertThresholds;
use crate::models::{AlertSeverity, AlertType, Asset, NewAlert};
use crate::store::TelemetryStore;

// ---

/// Evaluate one asset against the alert rules and submit whatever fires.
///
/// `previous` is the asset row as it stood before this record was applied;
/// `None` on first sight of the device. Returns the number of alerts
/// actually created (suppressed duplicates do not count).
pub async fn evaluate_asset(
    store: &dyn TelemetryStore,
    thresholds: &AlertThresholds,
    asset: &Asset,
    previous: Option<&Asset>,
) -> usize {
    // ---
    // A device coming back online closes its open offline alert. Fuel and
    // battery alerts stay up until resolved explicitly.
    if let Some(prev) = previous {
        if !prev.is_online && asset.is_online {
            match store.resolve_alert(asset.id, AlertType::DeviceOffline).await {
                Ok(true) => {
                    tracing::info!(
                        "Device {} back online, offline alert resolved",
                        asset.serial_number
                    );
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        "Failed to resolve offline alert for {}: {}",
                        asset.serial_number,
                        e
                    );
                }
            }
        }
    }

    let mut created = 0;
    for candidate in rule_candidates(thresholds, asset, previous) {
        let alert_type = candidate.alert_type;
        match store.create_alert(&candidate).await {
            Ok(true) => {
                tracing::info!(
                    "{} {} alert raised for {}",
                    candidate.severity,
                    alert_type,
                    asset.serial_number
                );
                created += 1;
            }
            Ok(false) => {
                tracing::debug!(
                    "{} alert for {} suppressed, one is already active",
                    alert_type,
                    asset.serial_number
                );
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to record {} alert for {}: {}",
                    alert_type,
                    asset.serial_number,
                    e
                );
            }
        }
    }

    created
}

// ---

/// Apply the alert rules to one asset state. Pure; no storage involved.
///
/// Battery thresholds compare strictly (`<`), fuel thresholds inclusively
/// (`<=`). Fuel is judged on days remaining when the platform reports it,
/// on fill percent otherwise, never both. The offline rule fires only on an
/// online-to-offline transition, so it needs a previous state.
pub fn rule_candidates(
    thresholds: &AlertThresholds,
    asset: &Asset,
    previous: Option<&Asset>,
) -> Vec<NewAlert> {
    // ---
    let mut candidates = Vec::new();

    if let Some(volts) = asset.battery_voltage {
        if volts < thresholds.battery_critical_volts {
            candidates.push(NewAlert {
                asset_id: asset.id,
                alert_type: AlertType::LowBattery,
                severity: AlertSeverity::Critical,
                title: "Critical battery level".to_string(),
                message: format!(
                    "Battery on {} at {:.2} V is below the critical threshold of {:.2} V",
                    asset.serial_number, volts, thresholds.battery_critical_volts
                ),
                current_value: volts,
                threshold_value: thresholds.battery_critical_volts,
                previous_value: previous.and_then(|p| p.battery_voltage),
            });
        } else if volts < thresholds.battery_warning_volts {
            candidates.push(NewAlert {
                asset_id: asset.id,
                alert_type: AlertType::LowBattery,
                severity: AlertSeverity::Warning,
                title: "Low battery".to_string(),
                message: format!(
                    "Battery on {} at {:.2} V is below the warning threshold of {:.2} V",
                    asset.serial_number, volts, thresholds.battery_warning_volts
                ),
                current_value: volts,
                threshold_value: thresholds.battery_warning_volts,
                previous_value: previous.and_then(|p| p.battery_voltage),
            });
        }
    }

    if let Some(days) = asset.days_remaining {
        if days <= thresholds.fuel_days_critical {
            candidates.push(NewAlert {
                asset_id: asset.id,
                alert_type: AlertType::LowFuel,
                severity: AlertSeverity::Critical,
                title: "Critical fuel level".to_string(),
                message: format!(
                    "Fuel on {} down to {:.1} days remaining (threshold {:.0} days)",
                    asset.serial_number, days, thresholds.fuel_days_critical
                ),
                current_value: days,
                threshold_value: thresholds.fuel_days_critical,
                previous_value: previous.and_then(|p| p.days_remaining),
            });
        } else if days <= thresholds.fuel_days_warning {
            candidates.push(NewAlert {
                asset_id: asset.id,
                alert_type: AlertType::LowFuel,
                severity: AlertSeverity::Warning,
                title: "Low fuel level".to_string(),
                message: format!(
                    "Fuel on {} down to {:.1} days remaining (threshold {:.0} days)",
                    asset.serial_number, days, thresholds.fuel_days_warning
                ),
                current_value: days,
                threshold_value: thresholds.fuel_days_warning,
                previous_value: previous.and_then(|p| p.days_remaining),
            });
        }
    } else if let Some(fill) = asset.fill_percent {
        if fill <= thresholds.fuel_percent_critical {
            candidates.push(NewAlert {
                asset_id: asset.id,
                alert_type: AlertType::LowFuel,
                severity: AlertSeverity::Critical,
                title: "Critical fuel level".to_string(),
                message: format!(
                    "Fuel on {} at {:.1}% of capacity (threshold {:.0}%)",
                    asset.serial_number, fill, thresholds.fuel_percent_critical
                ),
                current_value: fill,
                threshold_value: thresholds.fuel_percent_critical,
                previous_value: previous.and_then(|p| p.fill_percent),
            });
        } else if fill <= thresholds.fuel_percent_warning {
            candidates.push(NewAlert {
                asset_id: asset.id,
                alert_type: AlertType::LowFuel,
                severity: AlertSeverity::Warning,
                title: "Low fuel level".to_string(),
                message: format!(
                    "Fuel on {} at {:.1}% of capacity (threshold {:.0}%)",
                    asset.serial_number, fill, thresholds.fuel_percent_warning
                ),
                current_value: fill,
                threshold_value: thresholds.fuel_percent_warning,
                previous_value: previous.and_then(|p| p.fill_percent),
            });
        }
    }

    if let Some(prev) = previous {
        if prev.is_online && !asset.is_online {
            // Online state encoded as 1.0 / 0.0 in the value columns
            candidates.push(NewAlert {
                asset_id: asset.id,
                alert_type: AlertType::DeviceOffline,
                severity: AlertSeverity::Warning,
                title: "Device offline".to_string(),
                message: format!("Device {} stopped reporting telemetry", asset.serial_number),
                current_value: 0.0,
                threshold_value: 1.0,
                previous_value: Some(1.0),
            });
        }
    }

    candidates
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::store::MemStore;
    use chrono::Utc;

    fn asset(battery: Option<f64>, days: Option<f64>, fill: Option<f64>, online: bool) -> Asset {
        // ---
        Asset {
            id: 1,
            asset_key: "tls-500-0042".to_string(),
            location_id: 1,
            serial_number: "TLS-500-0042".to_string(),
            is_online: online,
            battery_voltage: battery,
            raw_fill_percent: None,
            fill_percent: fill,
            daily_consumption: None,
            days_remaining: days,
            last_telemetry_at: Some(Utc::now()),
            telemetry_epoch: None,
            capacity_liters: Some(5000.0),
            source_payload: None,
        }
    }

    fn thresholds() -> AlertThresholds {
        AlertThresholds::default()
    }

    #[test]
    fn battery_rules_compare_strictly() {
        // ---
        let healthy = rule_candidates(&thresholds(), &asset(Some(3.3), None, None, true), None);
        assert!(healthy.is_empty());

        let warning = rule_candidates(&thresholds(), &asset(Some(3.29), None, None, true), None);
        assert_eq!(warning.len(), 1);
        assert_eq!(warning[0].alert_type, AlertType::LowBattery);
        assert_eq!(warning[0].severity, AlertSeverity::Warning);
        assert_eq!(warning[0].threshold_value, 3.3);

        let critical = rule_candidates(&thresholds(), &asset(Some(3.1), None, None, true), None);
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].severity, AlertSeverity::Critical);
        assert_eq!(critical[0].threshold_value, 3.2);
    }

    #[test]
    fn fuel_rules_compare_inclusively() {
        // ---
        let at_warning = rule_candidates(&thresholds(), &asset(None, Some(7.0), None, true), None);
        assert_eq!(at_warning.len(), 1);
        assert_eq!(at_warning[0].severity, AlertSeverity::Warning);

        let at_critical = rule_candidates(&thresholds(), &asset(None, Some(3.0), None, true), None);
        assert_eq!(at_critical.len(), 1);
        assert_eq!(at_critical[0].severity, AlertSeverity::Critical);

        let healthy = rule_candidates(&thresholds(), &asset(None, Some(7.1), None, true), None);
        assert!(healthy.is_empty());
    }

    #[test]
    fn days_remaining_wins_over_fill_percent() {
        // ---
        // Healthy days silence the fuel rule even with a low fill level
        let a = asset(None, Some(20.0), Some(5.0), true);
        assert!(rule_candidates(&thresholds(), &a, None).is_empty());

        // Without a days estimate the fill level decides
        let b = asset(None, None, Some(10.0), true);
        let candidates = rule_candidates(&thresholds(), &b, None);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].severity, AlertSeverity::Critical);
        assert_eq!(candidates[0].current_value, 10.0);

        let c = asset(None, None, Some(15.0), true);
        assert_eq!(rule_candidates(&thresholds(), &c, None)[0].severity, AlertSeverity::Warning);

        let d = asset(None, None, Some(15.1), true);
        assert!(rule_candidates(&thresholds(), &d, None).is_empty());
    }

    #[test]
    fn offline_fires_only_on_a_transition() {
        // ---
        let was_online = asset(None, None, None, true);
        let now_offline = asset(None, None, None, false);

        // First sight of an offline device is not a transition
        assert!(rule_candidates(&thresholds(), &now_offline, None).is_empty());

        // Still offline is not a transition either
        let sustained = rule_candidates(&thresholds(), &now_offline, Some(&now_offline));
        assert!(sustained.is_empty());

        let dropped = rule_candidates(&thresholds(), &now_offline, Some(&was_online));
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].alert_type, AlertType::DeviceOffline);
        assert_eq!(dropped[0].severity, AlertSeverity::Warning);
        assert_eq!(dropped[0].previous_value, Some(1.0));
    }

    #[test]
    fn independent_rules_can_fire_together() {
        // ---
        let was_online = asset(Some(3.6), Some(10.0), None, true);
        let bad = asset(Some(3.1), Some(2.0), None, false);

        let candidates = rule_candidates(&thresholds(), &bad, Some(&was_online));
        let types: Vec<AlertType> = candidates.iter().map(|c| c.alert_type).collect();
        assert_eq!(
            types,
            vec![AlertType::LowBattery, AlertType::LowFuel, AlertType::DeviceOffline]
        );
        // Previous readings travel with the candidates
        assert_eq!(candidates[0].previous_value, Some(3.6));
        assert_eq!(candidates[1].previous_value, Some(10.0));
    }

    #[tokio::test]
    async fn repeated_evaluations_do_not_stack_alerts() {
        // ---
        let store = MemStore::new();
        let bad = asset(Some(3.1), None, None, true);

        assert_eq!(evaluate_asset(&store, &thresholds(), &bad, None).await, 1);
        assert_eq!(evaluate_asset(&store, &thresholds(), &bad, None).await, 0);
        assert_eq!(store.list_active_alerts(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reconnect_resolves_the_offline_alert_only() {
        // ---
        let store = MemStore::new();
        let online_weak_battery = asset(Some(3.1), None, None, true);
        let offline = asset(Some(3.1), None, None, false);

        // Goes offline with a weak battery: two alerts
        let created =
            evaluate_asset(&store, &thresholds(), &offline, Some(&online_weak_battery)).await;
        assert_eq!(created, 2);

        // Comes back: the offline alert closes, the battery alert stays
        evaluate_asset(&store, &thresholds(), &online_weak_battery, Some(&offline)).await;
        let active = store.list_active_alerts(1).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].alert_type, AlertType::LowBattery);
        assert!(store
            .find_active_alert(1, AlertType::DeviceOffline)
            .await
            .unwrap()
            .is_none());
    }
}
