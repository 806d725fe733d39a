//! pgqmon-core — query-performance monitoring for PostgreSQL.
//!
//! Provides:
//! - `pipeline` — one monitoring pass: version probe, extension gating and
//!   the five collection stages (slow queries, wait events, blocking
//!   sessions, individual queries, execution plans)
//! - `catalog` — version-aware SQL templates
//! - `gate` — extension-based eligibility of metric families
//! - `params` — configuration validation and per-run parameters
//! - `executor` — database access boundary (postgres client, scripted mock)
//! - `ingest` — record-to-metric conversion and batched publishing
//! - `sink` — telemetry destinations (JSON payloads, in-memory)
//! - `models` — record shapes of every metric family
//! - `explain` — EXPLAIN (FORMAT JSON) flattening
//! - `limiter` — rate limit for plan capture
//! - `selfmetrics` — counters describing the collector itself
//! - `text`, `plan_id` — literal redaction and plan identifiers
//! - `context`, `error` — deadlines/cancellation and the error type

pub mod catalog;
pub mod context;
pub mod error;
pub mod executor;
pub mod explain;
pub mod gate;
pub mod ingest;
pub mod limiter;
pub mod models;
pub mod params;
pub mod pipeline;
pub mod plan_id;
pub mod selfmetrics;
pub mod sink;
pub mod text;
