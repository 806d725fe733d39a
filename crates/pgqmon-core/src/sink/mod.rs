//! Telemetry ingestion boundary.
//!
//! A [`TelemetrySink`] hands out entities, buffers [`MetricSet`]s and ships
//! everything buffered on [`publish`](TelemetrySink::publish). Implementations:
//! - [`JsonSink`]: one JSON document per publish, written to any `Write`.
//! - [`MemorySink`]: keeps published batches in memory (tests, embedding).

mod json;
mod memory;

pub use json::JsonSink;
pub use memory::MemorySink;

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::QpmError;

/// Entity type of every monitored PostgreSQL instance.
pub const INSTANCE_ENTITY_TYPE: &str = "pg-instance";

/// How a metric is reported downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Numeric sample.
    Gauge,
    /// Descriptive string.
    Attribute,
}

/// Borrowed field value taken from a record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    Int(i64),
    Float(f64),
    Text(&'a str),
    Bool(bool),
}

/// Converted metric value as it appears in the payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Gauge(f64),
    Attribute(String),
}

/// Telemetry identity of a monitored target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Entity {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
}

impl Entity {
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
        }
    }
}

/// One event: a named group of metrics attached to an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSet {
    event_type: String,
    entity: Entity,
    metrics: BTreeMap<String, MetricValue>,
}

impl MetricSet {
    pub fn new(event_type: &str, entity: Entity) -> Self {
        Self {
            event_type: event_type.to_string(),
            entity,
            metrics: BTreeMap::new(),
        }
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    pub fn metrics(&self) -> &BTreeMap<String, MetricValue> {
        &self.metrics
    }

    pub fn get(&self, name: &str) -> Option<&MetricValue> {
        self.metrics.get(name)
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Converts `value` according to `kind` and stores it under `name`.
    ///
    /// Gauges accept numbers, booleans (1/0) and numeric text; anything else
    /// is rejected and the set is left unchanged.
    pub fn set_metric(
        &mut self,
        name: &str,
        value: FieldValue<'_>,
        kind: ValueKind,
    ) -> Result<(), QpmError> {
        let converted = match kind {
            ValueKind::Gauge => MetricValue::Gauge(as_gauge(name, value)?),
            ValueKind::Attribute => MetricValue::Attribute(as_attribute(value)),
        };
        self.metrics.insert(name.to_string(), converted);
        Ok(())
    }
}

fn as_gauge(name: &str, value: FieldValue<'_>) -> Result<f64, QpmError> {
    match value {
        FieldValue::Int(v) => Ok(v as f64),
        FieldValue::Float(v) => Ok(v),
        FieldValue::Bool(v) => Ok(if v { 1.0 } else { 0.0 }),
        FieldValue::Text(s) => s.trim().parse::<f64>().map_err(|e| QpmError::Decode {
            column: name.to_string(),
            message: format!("gauge from {s:?}: {e}"),
        }),
    }
}

fn as_attribute(value: FieldValue<'_>) -> String {
    match value {
        FieldValue::Int(v) => v.to_string(),
        FieldValue::Float(v) => v.to_string(),
        FieldValue::Bool(v) => v.to_string(),
        FieldValue::Text(s) => s.to_string(),
    }
}

/// Destination for emitted telemetry.
///
/// Shared between pipeline runs, so every method takes `&self`.
pub trait TelemetrySink: Send + Sync {
    /// Returns the entity for `name`, creating it in the sink if needed.
    fn entity(&self, name: &str, entity_type: &str) -> Result<Entity, QpmError>;

    /// Buffers one metric set until the next publish.
    fn record(&self, set: MetricSet);

    /// Ships every buffered set. The buffer is cleared even on failure.
    fn publish(&self) -> Result<(), QpmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set() -> MetricSet {
        MetricSet::new("PostgresSlowQueries", Entity::new("db:5432", INSTANCE_ENTITY_TYPE))
    }

    #[test]
    fn gauge_conversions() {
        let mut s = set();
        s.set_metric("calls", FieldValue::Int(3), ValueKind::Gauge).unwrap();
        s.set_metric("avg", FieldValue::Text(" 1.25 "), ValueKind::Gauge).unwrap();
        s.set_metric("aware", FieldValue::Bool(true), ValueKind::Gauge).unwrap();
        assert_eq!(s.get("calls"), Some(&MetricValue::Gauge(3.0)));
        assert_eq!(s.get("avg"), Some(&MetricValue::Gauge(1.25)));
        assert_eq!(s.get("aware"), Some(&MetricValue::Gauge(1.0)));
    }

    #[test]
    fn non_numeric_gauge_is_rejected() {
        let mut s = set();
        let err = s
            .set_metric("avg", FieldValue::Text("fast"), ValueKind::Gauge)
            .unwrap_err();
        assert!(matches!(err, QpmError::Decode { .. }));
        assert!(s.is_empty());
    }

    #[test]
    fn attributes_are_stringified() {
        let mut s = set();
        s.set_metric("query_id", FieldValue::Int(-42), ValueKind::Attribute)
            .unwrap();
        s.set_metric("parallel", FieldValue::Bool(false), ValueKind::Attribute)
            .unwrap();
        assert_eq!(
            s.get("query_id"),
            Some(&MetricValue::Attribute("-42".to_string()))
        );
        assert_eq!(
            s.get("parallel"),
            Some(&MetricValue::Attribute("false".to_string()))
        );
    }
}
