//! Record-to-metric serialization and batched publishing.
//!
//! ```text
//! &[R: Record] ──► SchemaCache::describe::<R>() ──► MetricSet per record
//!                                                    │
//!                     TelemetrySink::record ◄────────┘
//!                     TelemetrySink::publish every 600 sets + remainder
//! ```

mod entity;
mod record;
mod schema;

pub use entity::EntityRegistry;
pub use record::{FieldSpec, Record, ToFieldValue};
pub use schema::{FieldDescriptor, SchemaCache};

use std::sync::Arc;

use tracing::debug;

use crate::error::QpmError;
use crate::params::CommonParameters;
use crate::sink::{INSTANCE_ENTITY_TYPE, MetricSet, TelemetrySink};

/// Metric sets buffered before a publish is forced.
pub const PUBLISH_THRESHOLD: usize = 600;

/// Turns typed records into metric sets and publishes them in batches.
#[derive(Debug, Clone, Default)]
pub struct MetricIngestor {
    schemas: Arc<SchemaCache>,
    entities: Arc<EntityRegistry>,
}

impl MetricIngestor {
    /// Ingestor with private caches.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingestor sharing caches with other owners.
    pub fn with_registries(schemas: Arc<SchemaCache>, entities: Arc<EntityRegistry>) -> Self {
        Self { schemas, entities }
    }

    pub fn entities(&self) -> &Arc<EntityRegistry> {
        &self.entities
    }

    /// Emits one metric set per record under `event_type`.
    ///
    /// Unset fields are omitted and fields that fail conversion are logged
    /// and skipped. A publish failure aborts the call. Returns the number of
    /// metric sets emitted.
    pub fn ingest<R: Record>(
        &self,
        records: &[R],
        event_type: &str,
        sink: &dyn TelemetrySink,
        params: &CommonParameters,
    ) -> Result<usize, QpmError> {
        let descriptors = self.schemas.describe::<R>()?;
        if records.is_empty() {
            return Ok(0);
        }
        let entity =
            self.entities
                .get_or_create(&params.instance_key(), INSTANCE_ENTITY_TYPE, sink)?;

        let mut pending = 0;
        for record in records {
            let values = record.field_values();
            let mut set = MetricSet::new(event_type, entity.clone());
            for desc in descriptors.iter() {
                let Some(value) = values.get(desc.position).copied().flatten() else {
                    continue;
                };
                if let Err(e) = set.set_metric(desc.name, value, desc.kind) {
                    debug!(event_type, field = desc.name, error = %e, "skipping field");
                }
            }
            sink.record(set);
            pending += 1;

            if pending == PUBLISH_THRESHOLD {
                sink.publish()?;
                pending = 0;
            }
        }
        if pending > 0 {
            sink.publish()?;
        }
        debug!(event_type, count = records.len(), "ingested records");
        Ok(records.len())
    }
}
