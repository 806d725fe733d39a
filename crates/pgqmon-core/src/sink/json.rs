//! JSON payload sink.
//!
//! Each publish writes one line:
//!
//! ```text
//! {"name":"com.pgqmon.postgresql","protocol_version":"3","integration_version":"0.1.0",
//!  "data":[{"entity":{"name":"host:5432","type":"pg-instance"},
//!           "metrics":[{"event_type":"PostgresSlowQueries", ...}]}]}
//! ```
//!
//! Sets are grouped by entity in first-seen order.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Stdout, Write};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use super::{Entity, MetricSet, MetricValue, TelemetrySink};
use crate::error::QpmError;

pub const INTEGRATION_NAME: &str = "com.pgqmon.postgresql";
const PROTOCOL_VERSION: &str = "3";

#[derive(Serialize)]
struct Payload<'a> {
    name: &'static str,
    protocol_version: &'static str,
    integration_version: &'static str,
    data: Vec<EntityData<'a>>,
}

#[derive(Serialize)]
struct EntityData<'a> {
    entity: &'a Entity,
    metrics: Vec<EventJson<'a>>,
}

#[derive(Serialize)]
struct EventJson<'a> {
    event_type: &'a str,
    #[serde(flatten)]
    metrics: &'a BTreeMap<String, MetricValue>,
}

struct Inner<W> {
    writer: W,
    pending: Vec<MetricSet>,
}

/// Writes one JSON payload per publish.
pub struct JsonSink<W: Write + Send> {
    inner: Mutex<Inner<W>>,
}

impl JsonSink<Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl JsonSink<BufWriter<File>> {
    /// Appends payloads to `path`, creating the file if needed.
    pub fn create(path: &Path) -> Result<Self, QpmError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| QpmError::Publish(format!("{}: {e}", path.display())))?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write + Send> JsonSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: Mutex::new(Inner {
                writer,
                pending: Vec::new(),
            }),
        }
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.inner
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .writer
    }

    fn lock(&self) -> MutexGuard<'_, Inner<W>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn payload(sets: &[MetricSet]) -> Payload<'_> {
    let mut data: Vec<EntityData<'_>> = Vec::new();
    for set in sets {
        let event = EventJson {
            event_type: set.event_type(),
            metrics: set.metrics(),
        };
        match data.iter_mut().find(|d| d.entity == set.entity()) {
            Some(d) => d.metrics.push(event),
            None => data.push(EntityData {
                entity: set.entity(),
                metrics: vec![event],
            }),
        }
    }
    Payload {
        name: INTEGRATION_NAME,
        protocol_version: PROTOCOL_VERSION,
        integration_version: env!("CARGO_PKG_VERSION"),
        data,
    }
}

impl<W: Write + Send> TelemetrySink for JsonSink<W> {
    fn entity(&self, name: &str, entity_type: &str) -> Result<Entity, QpmError> {
        Ok(Entity::new(name, entity_type))
    }

    fn record(&self, set: MetricSet) {
        self.lock().pending.push(set);
    }

    fn publish(&self) -> Result<(), QpmError> {
        let mut inner = self.lock();
        let pending = std::mem::take(&mut inner.pending);
        if pending.is_empty() {
            return Ok(());
        }
        let line = serde_json::to_string(&payload(&pending))
            .map_err(|e| QpmError::Publish(e.to_string()))?;
        writeln!(inner.writer, "{line}")
            .and_then(|_| inner.writer.flush())
            .map_err(|e| QpmError::Publish(e.to_string()))
    }
}
