//! Domain models for the tank telemetry pipeline.
//!
//! `DevicePayload` is the canonical decoded form of one record from the
//! device platform's webhook. Every field except the identifying ones is
//! optional, and the deserializers are deliberately forgiving: firmware
//! revisions disagree on field names (covered by serde aliases) and on
//! whether numbers arrive as numbers or strings (covered by the `de_opt_*`
//! helpers, which map anything unparseable to `None` instead of failing the
//! record).

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---

/// Derive a stable identifier from a free-form name: lowercase, ASCII
/// alphanumerics kept, every other run of characters collapsed to a single
/// hyphen. Repeated deliveries naming the same site or serial therefore
/// resolve to the same row.
pub fn slugify(input: &str) -> String {
    // ---
    let mut slug = String::with_capacity(input.len());
    let mut pending_gap = false;

    for c in input.trim().to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            if pending_gap && !slug.is_empty() {
                slug.push('-');
            }
            pending_gap = false;
            slug.push(c);
        } else {
            pending_gap = true;
        }
    }

    slug
}

// ---

/// One raw record from the webhook body, decoded tolerantly.
#[derive(Debug, Default, Deserialize)]
pub struct DevicePayload {
    // ---
    #[serde(alias = "siteName", alias = "site", alias = "location", alias = "locationName")]
    pub site_name: Option<String>,

    #[serde(alias = "customerName", alias = "customer_name", alias = "tenant")]
    pub customer: Option<String>,

    #[serde(alias = "street", alias = "address1")]
    pub address: Option<String>,

    #[serde(alias = "suburb")]
    pub city: Option<String>,

    #[serde(alias = "state")]
    pub region: Option<String>,

    #[serde(alias = "zip", alias = "postalCode")]
    pub postcode: Option<String>,

    #[serde(default, alias = "lat", deserialize_with = "de_opt_f64")]
    pub latitude: Option<f64>,

    #[serde(default, alias = "lng", alias = "lon", deserialize_with = "de_opt_f64")]
    pub longitude: Option<f64>,

    #[serde(
        alias = "serial",
        alias = "serialNumber",
        alias = "deviceSerial",
        alias = "device_serial_number"
    )]
    pub device_serial: Option<String>,

    #[serde(
        default,
        alias = "battery",
        alias = "batteryVoltage",
        alias = "battery_volts",
        deserialize_with = "de_opt_f64"
    )]
    pub battery_voltage: Option<f64>,

    /// Calibrated fill level, percent of safe capacity.
    #[serde(
        default,
        alias = "fillPercent",
        alias = "fill_percentage",
        alias = "calibratedFillPercent",
        alias = "calibrated_fill_percent",
        deserialize_with = "de_opt_f64"
    )]
    pub fill_percent: Option<f64>,

    #[serde(
        default,
        alias = "rawFillPercent",
        alias = "raw_fill_percentage",
        deserialize_with = "de_opt_f64"
    )]
    pub raw_fill_percent: Option<f64>,

    #[serde(
        default,
        alias = "litres",
        alias = "currentLiters",
        alias = "current_litres",
        deserialize_with = "de_opt_f64"
    )]
    pub liters: Option<f64>,

    #[serde(
        default,
        alias = "capacity",
        alias = "capacityLitres",
        alias = "capacity_litres",
        deserialize_with = "de_opt_f64"
    )]
    pub capacity_liters: Option<f64>,

    /// Platform-estimated liters consumed per day.
    #[serde(
        default,
        alias = "dailyConsumption",
        alias = "daily_use",
        alias = "dailyUse",
        deserialize_with = "de_opt_f64"
    )]
    pub daily_consumption: Option<f64>,

    /// Platform-estimated days until the tank hits its minimum threshold.
    #[serde(
        default,
        alias = "daysRemaining",
        alias = "days_till_empty",
        alias = "daysTillEmpty",
        deserialize_with = "de_opt_f64"
    )]
    pub days_remaining: Option<f64>,

    #[serde(
        default,
        alias = "online",
        alias = "isOnline",
        alias = "connected",
        deserialize_with = "de_opt_bool"
    )]
    pub is_online: Option<bool>,

    #[serde(
        default,
        alias = "lastTelemetry",
        alias = "last_telemetry",
        alias = "timestamp",
        deserialize_with = "de_opt_datetime"
    )]
    pub telemetry_timestamp: Option<DateTime<Utc>>,

    /// Milliseconds since epoch; used when the human-readable timestamp is
    /// absent.
    #[serde(
        default,
        alias = "telemetryEpoch",
        alias = "epoch",
        alias = "lastTelemetryEpoch",
        deserialize_with = "de_opt_i64"
    )]
    pub telemetry_epoch: Option<i64>,

    #[serde(default, alias = "isDisabled", deserialize_with = "de_opt_bool")]
    pub disabled: Option<bool>,
}

impl DevicePayload {
    // ---

    /// Site identifier used in error reporting, even for records that fail
    /// later transform steps.
    pub fn site_label(&self) -> &str {
        // ---
        self.site_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("unknown site")
    }

    /// Best available sample time: the human-readable timestamp wins, the
    /// epoch field backs it up.
    pub fn telemetry_time(&self) -> Option<DateTime<Utc>> {
        // ---
        self.telemetry_timestamp
            .or_else(|| self.telemetry_epoch.and_then(DateTime::from_timestamp_millis))
    }

    /// Build the site record for this payload. Fails when no usable site
    /// name is present, since the slug is the upsert key.
    pub fn to_location(&self) -> Result<NewLocation> {
        // ---
        let name = self
            .site_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow!("missing site name"))?;

        let location_key = slugify(name);
        if location_key.is_empty() {
            bail!("site name '{name}' yields an empty identifier");
        }

        Ok(NewLocation {
            location_key,
            name: name.to_string(),
            customer: self.customer.clone(),
            address: self.address.clone(),
            city: self.city.clone(),
            region: self.region.clone(),
            postcode: self.postcode.clone(),
            latitude: self.latitude,
            longitude: self.longitude,
            fill_percent: self.fill_percent,
            is_online: self.is_online.unwrap_or(false),
            last_telemetry_at: self.telemetry_time(),
            disabled: self.disabled.unwrap_or(false),
        })
    }

    /// Build the device record. Fails when no usable serial number is
    /// present. `location_id` stays zero until the pipeline has upserted the
    /// owning site row.
    pub fn to_asset(&self, source_payload: Value) -> Result<NewAsset> {
        // ---
        let serial = self
            .device_serial
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow!("missing device serial number"))?;

        let asset_key = slugify(serial);
        if asset_key.is_empty() {
            bail!("device serial '{serial}' yields an empty identifier");
        }

        Ok(NewAsset {
            asset_key,
            location_id: 0,
            serial_number: serial.to_string(),
            is_online: self.is_online.unwrap_or(false),
            battery_voltage: self.battery_voltage,
            raw_fill_percent: self.raw_fill_percent,
            fill_percent: self.fill_percent,
            daily_consumption: self.daily_consumption,
            days_remaining: self.days_remaining,
            last_telemetry_at: self.telemetry_time(),
            telemetry_epoch: self.telemetry_epoch,
            capacity_liters: self.capacity_liters,
            source_payload: Some(source_payload),
        })
    }

    /// Build the historical sample for this payload. Liters fall back to
    /// `capacity × fill% / 100` when the payload reports no volume.
    pub fn to_reading(&self, asset_id: i32) -> NewReading {
        // ---
        let liters = self.liters.or_else(|| match (self.capacity_liters, self.fill_percent) {
            (Some(capacity), Some(fill)) => Some(capacity * fill / 100.0),
            _ => None,
        });

        NewReading {
            asset_id,
            recorded_at: self.telemetry_time().unwrap_or_else(Utc::now),
            fill_percent: self.fill_percent,
            raw_fill_percent: self.raw_fill_percent,
            liters,
            battery_voltage: self.battery_voltage,
            is_online: self.is_online.unwrap_or(false),
            daily_consumption: self.daily_consumption,
            days_remaining: self.days_remaining,
        }
    }
}

/// Site identifier for a record that never decoded into a `DevicePayload`.
pub fn site_label_of(raw: &Value) -> &str {
    // ---
    for key in ["site_name", "siteName", "site", "location", "locationName"] {
        if let Some(label) = raw.get(key).and_then(Value::as_str) {
            let label = label.trim();
            if !label.is_empty() {
                return label;
            }
        }
    }
    "unknown site"
}

// ---

/// A physical site, keyed by the slug of its name.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Location {
    // ---
    pub id: i32,
    pub location_key: String,
    pub name: String,
    pub customer: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub postcode: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub fill_percent: Option<f64>,
    pub is_online: bool,
    pub last_telemetry_at: Option<DateTime<Utc>>,
    pub disabled: bool,
}

/// Write form of [`Location`]; the store assigns the row id.
#[derive(Debug, Clone)]
pub struct NewLocation {
    // ---
    pub location_key: String,
    pub name: String,
    pub customer: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub postcode: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub fill_percent: Option<f64>,
    pub is_online: bool,
    pub last_telemetry_at: Option<DateTime<Utc>>,
    pub disabled: bool,
}

/// A monitored tank device, keyed by the slug of its serial number.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Asset {
    // ---
    pub id: i32,
    pub asset_key: String,
    pub location_id: i32,
    pub serial_number: String,
    pub is_online: bool,
    pub battery_voltage: Option<f64>,
    pub raw_fill_percent: Option<f64>,
    pub fill_percent: Option<f64>,
    pub daily_consumption: Option<f64>,
    pub days_remaining: Option<f64>,
    pub last_telemetry_at: Option<DateTime<Utc>>,
    pub telemetry_epoch: Option<i64>,
    pub capacity_liters: Option<f64>,
    #[serde(skip_serializing)]
    pub source_payload: Option<Value>,
}

/// Write form of [`Asset`].
#[derive(Debug, Clone)]
pub struct NewAsset {
    // ---
    pub asset_key: String,
    pub location_id: i32,
    pub serial_number: String,
    pub is_online: bool,
    pub battery_voltage: Option<f64>,
    pub raw_fill_percent: Option<f64>,
    pub fill_percent: Option<f64>,
    pub daily_consumption: Option<f64>,
    pub days_remaining: Option<f64>,
    pub last_telemetry_at: Option<DateTime<Utc>>,
    pub telemetry_epoch: Option<i64>,
    pub capacity_liters: Option<f64>,
    pub source_payload: Option<Value>,
}

/// One immutable historical sample. Append-only per asset.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Reading {
    // ---
    pub id: i64,
    pub asset_id: i32,
    pub recorded_at: DateTime<Utc>,
    pub fill_percent: Option<f64>,
    pub raw_fill_percent: Option<f64>,
    pub liters: Option<f64>,
    pub battery_voltage: Option<f64>,
    pub is_online: bool,
    pub daily_consumption: Option<f64>,
    pub days_remaining: Option<f64>,
}

/// Write form of [`Reading`].
#[derive(Debug, Clone)]
pub struct NewReading {
    // ---
    pub asset_id: i32,
    pub recorded_at: DateTime<Utc>,
    pub fill_percent: Option<f64>,
    pub raw_fill_percent: Option<f64>,
    pub liters: Option<f64>,
    pub battery_voltage: Option<f64>,
    pub is_online: bool,
    pub daily_consumption: Option<f64>,
    pub days_remaining: Option<f64>,
}

// ---

/// The threshold family an alert belongs to. At most one *active* alert per
/// (asset, type) exists at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertType {
    LowBattery,
    LowFuel,
    DeviceOffline,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LowBattery => "low-battery",
            Self::LowFuel => "low-fuel",
            Self::DeviceOffline => "device-offline",
        }
    }
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AlertType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "low-battery" => Ok(Self::LowBattery),
            "low-fuel" => Ok(Self::LowFuel),
            "device-offline" => Ok(Self::DeviceOffline),
            other => Err(anyhow!("unknown alert type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AlertSeverity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "warning" => Ok(Self::Warning),
            "critical" => Ok(Self::Critical),
            other => Err(anyhow!("unknown alert severity '{other}'")),
        }
    }
}

/// A threshold breach, active until resolved.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    // ---
    pub id: Uuid,
    pub asset_id: i32,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    pub current_value: f64,
    pub threshold_value: f64,
    pub previous_value: Option<f64>,
    pub active: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Write form of [`Alert`]; the store assigns id/created_at and the active
/// flag.
#[derive(Debug, Clone)]
pub struct NewAlert {
    // ---
    pub asset_id: i32,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    pub current_value: f64,
    pub threshold_value: f64,
    pub previous_value: Option<f64>,
}

/// Audit record for one processed webhook batch.
#[derive(Debug, Clone)]
pub struct NewSyncLog {
    // ---
    pub total_records: i32,
    pub processed_records: i32,
    pub error_count: i32,
    pub duration_ms: i64,
    /// First few error messages, enough for operational triage.
    pub errors: Vec<String>,
}

// ---

/// Accept a JSON number or a numeric string; anything else becomes `None`.
fn de_opt_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    // ---
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }))
}

/// Accept a JSON integer (or integral float/string); anything else becomes
/// `None`.
fn de_opt_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    // ---
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }))
}

/// Accept a JSON bool, 0/1 number, or one of the usual truthy/falsy strings.
fn de_opt_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    // ---
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Value::Bool(b) => Some(b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" | "online" | "on" => Some(true),
            "false" | "no" | "0" | "offline" | "off" => Some(false),
            _ => None,
        },
        _ => None,
    }))
}

/// Accept an RFC 3339 timestamp string, or the platform's older
/// `YYYY-MM-DD HH:MM:SS` (UTC) form.
fn de_opt_datetime<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    // ---
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Value::String(s) => parse_datetime(s.trim()),
        _ => None,
    }))
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    // ---
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn decode(value: Value) -> DevicePayload {
        // ---
        serde_json::from_value(value).expect("payload should decode")
    }

    #[test]
    fn slugify_normalizes_names() {
        // ---
        assert_eq!(slugify("ACME Fuels #3"), "acme-fuels-3");
        assert_eq!(slugify("  Tank--07  "), "tank-07");
        assert_eq!(slugify("TLS-500-0042"), "tls-500-0042");
        assert_eq!(slugify("///"), "");
        // Non-ASCII characters act as separators
        assert_eq!(slugify("Dépôt Nord"), "d-p-t-nord");
    }

    #[test]
    fn slugify_is_stable_across_redeliveries() {
        // ---
        let a = slugify("Riverside Depot");
        let b = slugify("riverside   DEPOT");
        assert_eq!(a, b);
        assert_eq!(a, "riverside-depot");
    }

    #[test]
    fn numeric_fields_accept_strings_and_garbage() {
        // ---
        let payload = decode(json!({
            "site_name": "Depot 1",
            "serial": "T-1",
            "battery_voltage": "3.28",
            "fillPercent": 62.5,
            "capacity": "not-a-number",
            "daysRemaining": true,
        }));

        assert_eq!(payload.battery_voltage, Some(3.28));
        assert_eq!(payload.fill_percent, Some(62.5));
        assert_eq!(payload.capacity_liters, None);
        assert_eq!(payload.days_remaining, None);
    }

    #[test]
    fn bool_and_epoch_fields_are_tolerant() {
        // ---
        let payload = decode(json!({
            "online": "Offline",
            "telemetryEpoch": "1760000000000",
        }));

        assert_eq!(payload.is_online, Some(false));
        assert_eq!(payload.telemetry_epoch, Some(1_760_000_000_000));
        assert!(payload.telemetry_time().is_some());
    }

    #[test]
    fn telemetry_timestamp_wins_over_epoch() {
        // ---
        let payload = decode(json!({
            "lastTelemetry": "2026-03-01T10:00:00Z",
            "telemetryEpoch": 1_700_000_000_000_i64,
        }));

        let expected = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        assert_eq!(payload.telemetry_time(), Some(expected));
    }

    #[test]
    fn space_separated_timestamps_parse() {
        // ---
        let payload = decode(json!({ "lastTelemetry": "2026-03-01 10:30:00" }));
        let expected = Utc.with_ymd_and_hms(2026, 3, 1, 10, 30, 0).unwrap();
        assert_eq!(payload.telemetry_timestamp, Some(expected));
    }

    #[test]
    fn to_location_requires_a_site_name() {
        // ---
        let missing = decode(json!({ "serial": "T-9" }));
        assert!(missing.to_location().is_err());

        let blank = decode(json!({ "site_name": "   ", "serial": "T-9" }));
        assert!(blank.to_location().is_err());

        let ok = decode(json!({ "siteName": "North Yard", "serial": "T-9" }));
        let location = ok.to_location().unwrap();
        assert_eq!(location.location_key, "north-yard");
        assert_eq!(location.name, "North Yard");
        assert!(!location.is_online);
    }

    #[test]
    fn to_asset_requires_a_serial_number() {
        // ---
        let payload = decode(json!({ "site_name": "North Yard" }));
        let err = payload.to_asset(json!({})).unwrap_err();
        assert!(err.to_string().contains("serial"));

        let payload = decode(json!({
            "site_name": "North Yard",
            "serialNumber": "TLS 500 0042",
            "battery": 3.1,
            "online": true,
        }));
        let asset = payload.to_asset(json!({"serialNumber": "TLS 500 0042"})).unwrap();
        assert_eq!(asset.asset_key, "tls-500-0042");
        assert_eq!(asset.serial_number, "TLS 500 0042");
        assert_eq!(asset.battery_voltage, Some(3.1));
        assert!(asset.is_online);
        assert!(asset.source_payload.is_some());
    }

    #[test]
    fn reading_derives_liters_from_capacity() {
        // ---
        let payload = decode(json!({
            "site_name": "North Yard",
            "serial": "T-1",
            "fillPercent": 40.0,
            "capacity": 5000.0,
        }));
        let reading = payload.to_reading(7);
        assert_eq!(reading.asset_id, 7);
        assert_eq!(reading.liters, Some(2000.0));

        // An explicit volume is never overridden by the derivation.
        let payload = decode(json!({
            "site_name": "North Yard",
            "serial": "T-1",
            "fillPercent": 40.0,
            "capacity": 5000.0,
            "liters": 1987.0,
        }));
        assert_eq!(payload.to_reading(7).liters, Some(1987.0));
    }

    #[test]
    fn site_label_survives_undecodable_records() {
        // ---
        assert_eq!(site_label_of(&json!({"siteName": "East Ridge"})), "East Ridge");
        assert_eq!(site_label_of(&json!({"siteName": "  "})), "unknown site");
        assert_eq!(site_label_of(&json!(42)), "unknown site");
    }

    #[test]
    fn alert_type_round_trips_through_strings() {
        // ---
        for (ty, s) in [
            (AlertType::LowBattery, "low-battery"),
            (AlertType::LowFuel, "low-fuel"),
            (AlertType::DeviceOffline, "device-offline"),
        ] {
            assert_eq!(ty.as_str(), s);
            assert_eq!(s.parse::<AlertType>().unwrap(), ty);
        }
        assert!("low_battery".parse::<AlertType>().is_err());
    }
}
