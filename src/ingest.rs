//! Webhook batch ingestion.
//!
//! One batch is a JSON array of device payloads. Records are processed
//! strictly in array order, each one isolated: a record that fails to decode
//! or persist is recorded as an error and the batch moves on. Per record the
//! pipeline runs upsert location, upsert asset, append reading, evaluate
//! alerts, in that order, then writes one audit row for the whole batch.

use std::time::Instant;

use anyhow::Result;
use serde_json::Value;

use crate::alerts;
use crate::config::AlertThresholds;
use crate::models::{site_label_of, DevicePayload, NewSyncLog};
use crate::store::TelemetryStore;

// ---

/// Cap on error messages carried into the sync log and the webhook response.
pub const ERROR_SAMPLE_LIMIT: usize = 5;

/// Outcome of one webhook batch.
#[derive(Debug)]
pub struct IngestOutcome {
    // ---
    pub total: usize,
    pub processed: usize,
    /// One message per failed record, in batch order.
    pub errors: Vec<String>,
    pub alerts_created: usize,
    pub duration_ms: i64,
}

// ---

/// Run one webhook batch to completion and record the audit row.
pub async fn process_batch(
    store: &dyn TelemetryStore,
    thresholds: &AlertThresholds,
    records: Vec<Value>,
) -> IngestOutcome {
    // ---
    let started = Instant::now();
    let total = records.len();
    let mut processed = 0;
    let mut errors = Vec::new();
    let mut alerts_created = 0;

    for record in &records {
        match process_record(store, thresholds, record).await {
            Ok(created) => {
                processed += 1;
                alerts_created += created;
            }
            Err(e) => {
                let label = site_label_of(record);
                tracing::warn!("Record for site '{}' failed: {}", label, e);
                errors.push(format!("site '{}': {}", label, e));
            }
        }
    }

    let duration_ms = started.elapsed().as_millis() as i64;
    tracing::info!(
        "Batch complete: {}/{} records processed in {} ms, {} alerts raised",
        processed,
        total,
        duration_ms,
        alerts_created
    );

    let entry = NewSyncLog {
        total_records: total as i32,
        processed_records: processed as i32,
        error_count: errors.len() as i32,
        duration_ms,
        errors: errors.iter().take(ERROR_SAMPLE_LIMIT).cloned().collect(),
    };
    if let Err(e) = store.record_sync_log(&entry).await {
        tracing::warn!("Failed to record sync log: {}", e);
    }

    IngestOutcome {
        total,
        processed,
        errors,
        alerts_created,
        duration_ms,
    }
}

/// Apply one raw record: decode, upsert site and device, append the reading,
/// evaluate alerts. Returns the number of alerts created.
async fn process_record(
    store: &dyn TelemetryStore,
    thresholds: &AlertThresholds,
    raw: &Value,
) -> Result<usize> {
    // ---
    let payload: DevicePayload = serde_json::from_value(raw.clone())?;

    // Both transforms run before the first write, so a bad record leaves no
    // partial state behind.
    let new_location = payload.to_location()?;
    let mut new_asset = payload.to_asset(raw.clone())?;

    let location = store.upsert_location(&new_location).await?;

    // The pre-upsert state drives the offline transition rule
    let previous = store.get_asset_by_key(&new_asset.asset_key).await?;

    new_asset.location_id = location.id;
    let asset = store.upsert_asset(&new_asset).await?;

    // A lost reading degrades history but the record still counts
    let reading = payload.to_reading(asset.id);
    if let Err(e) = store.insert_reading(&reading).await {
        tracing::warn!("Failed to store reading for {}: {}", asset.serial_number, e);
    }

    Ok(alerts::evaluate_asset(store, thresholds, &asset, previous.as_ref()).await)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::AlertType;
    use crate::store::MemStore;
    use serde_json::json;

    fn thresholds() -> AlertThresholds {
        AlertThresholds::default()
    }

    fn healthy_payload() -> Value {
        // ---
        json!({
            "siteName": "North Yard",
            "serialNumber": "TLS-500-0042",
            "batteryVoltage": 3.6,
            "fillPercent": 62.5,
            "capacityLitres": 5000,
            "daysRemaining": 14.0,
            "online": true,
            "lastTelemetry": "2026-03-01T10:00:00Z",
        })
    }

    #[tokio::test]
    async fn reingest_is_idempotent_for_entities_and_append_only_for_readings() {
        // ---
        let store = MemStore::new();

        let first = process_batch(&store, &thresholds(), vec![healthy_payload()]).await;
        let second = process_batch(&store, &thresholds(), vec![healthy_payload()]).await;

        assert_eq!(first.processed, 1);
        assert_eq!(second.processed, 1);
        assert_eq!(store.location_count(), 1);
        assert_eq!(store.asset_count(), 1);
        assert_eq!(store.reading_count(), 2);
    }

    #[tokio::test]
    async fn a_failing_record_does_not_abort_the_batch() {
        // ---
        let store = MemStore::new();
        let broken = json!({
            "siteName": "East Ridge",
            "batteryVoltage": 3.6,
        });

        let outcome = process_batch(&store, &thresholds(), vec![healthy_payload(), broken]).await;

        assert_eq!(outcome.total, 2);
        assert_eq!(outcome.processed, 1);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].contains("East Ridge"));
        assert!(outcome.errors[0].contains("serial"));

        // The valid record went all the way through
        assert_eq!(store.asset_count(), 1);
        assert_eq!(store.reading_count(), 1);
    }

    #[tokio::test]
    async fn undecodable_records_are_reported_with_a_fallback_label() {
        // ---
        let store = MemStore::new();

        let outcome = process_batch(&store, &thresholds(), vec![json!(42)]).await;

        assert_eq!(outcome.processed, 0);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].contains("unknown site"));
    }

    #[tokio::test]
    async fn assets_are_linked_to_their_upserted_location() {
        // ---
        let store = MemStore::new();

        process_batch(&store, &thresholds(), vec![healthy_payload()]).await;

        let asset = store.get_asset_by_key("tls-500-0042").await.unwrap().unwrap();
        assert_eq!(asset.location_id, 1);
        assert_eq!(asset.serial_number, "TLS-500-0042");
        assert!(asset.source_payload.is_some());
    }

    #[tokio::test]
    async fn breaches_raise_alerts_once() {
        // ---
        let store = MemStore::new();
        let mut weak = healthy_payload();
        weak["batteryVoltage"] = json!(3.1);

        let first = process_batch(&store, &thresholds(), vec![weak.clone()]).await;
        assert_eq!(first.alerts_created, 1);

        // The same breach on the next delivery is suppressed
        let second = process_batch(&store, &thresholds(), vec![weak]).await;
        assert_eq!(second.alerts_created, 0);

        let asset = store.get_asset_by_key("tls-500-0042").await.unwrap().unwrap();
        assert_eq!(store.list_active_alerts(asset.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn offline_alerts_fire_on_the_transition_only() {
        // ---
        let store = MemStore::new();
        let mut offline = healthy_payload();
        offline["online"] = json!(false);

        // First sight offline: no previous state, no transition
        process_batch(&store, &thresholds(), vec![offline.clone()]).await;
        let asset = store.get_asset_by_key("tls-500-0042").await.unwrap().unwrap();
        assert!(store
            .find_active_alert(asset.id, AlertType::DeviceOffline)
            .await
            .unwrap()
            .is_none());

        // Online, then offline again: that is the transition
        process_batch(&store, &thresholds(), vec![healthy_payload()]).await;
        let outcome = process_batch(&store, &thresholds(), vec![offline.clone()]).await;
        assert_eq!(outcome.alerts_created, 1);

        // Staying offline does not stack another one
        process_batch(&store, &thresholds(), vec![offline]).await;
        assert_eq!(store.list_active_alerts(asset.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn every_batch_writes_one_audit_row() {
        // ---
        let store = MemStore::new();
        let broken = json!({ "siteName": "East Ridge" });

        process_batch(&store, &thresholds(), vec![healthy_payload(), broken]).await;

        assert_eq!(store.sync_log_count(), 1);
        let entry = store.last_sync_log().unwrap();
        assert_eq!(entry.total_records, 2);
        assert_eq!(entry.processed_records, 1);
        assert_eq!(entry.error_count, 1);
        assert_eq!(entry.errors.len(), 1);
    }
}
