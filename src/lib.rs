//! Core library for the `tankflow` fuel-tank telemetry service.
//!
//! The pipeline is: authenticated webhook batches from the device platform
//! arrive at [`routes`], each record is transformed and upserted by
//! [`ingest`], the freshly written asset state is screened by [`alerts`],
//! and [`analytics`] derives consumption/trend/efficiency figures from the
//! append-only reading history on demand.
//!
//! Persistence sits behind the [`store::TelemetryStore`] trait so the HTTP
//! layer and both engines run identically against PostgreSQL
//! ([`store::PgStore`]) or the in-memory double ([`store::MemStore`]) used
//! by tests and local development.

pub mod alerts;
pub mod analytics;
pub mod config;
pub mod ingest;
pub mod models;
pub mod routes;
pub mod schema;
pub mod store;

pub use config::{AlertThresholds, Config};
pub use store::{DynStore, MemStore, PgStore, TelemetryStore};
