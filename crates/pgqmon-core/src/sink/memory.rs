//! In-memory sink keeping every published batch.

use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{Entity, MetricSet, TelemetrySink};
use crate::error::QpmError;

#[derive(Debug, Default)]
struct State {
    pending: Vec<MetricSet>,
    batches: Vec<Vec<MetricSet>>,
    entities_created: usize,
    fail_publish: Option<String>,
}

#[derive(Debug, Default)]
pub struct MemorySink {
    state: Mutex<State>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent publish fail with `message`.
    pub fn fail_publishes(&self, message: &str) {
        self.lock().fail_publish = Some(message.to_string());
    }

    /// Published batches, oldest first.
    pub fn batches(&self) -> Vec<Vec<MetricSet>> {
        self.lock().batches.clone()
    }

    /// Sizes of published batches.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.lock().batches.iter().map(Vec::len).collect()
    }

    /// All published sets with the given event type.
    pub fn sets_for(&self, event_type: &str) -> Vec<MetricSet> {
        self.lock()
            .batches
            .iter()
            .flatten()
            .filter(|s| s.event_type() == event_type)
            .cloned()
            .collect()
    }

    /// Total number of published sets.
    pub fn published_len(&self) -> usize {
        self.lock().batches.iter().map(Vec::len).sum()
    }

    pub fn entities_created(&self) -> usize {
        self.lock().entities_created
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TelemetrySink for MemorySink {
    fn entity(&self, name: &str, entity_type: &str) -> Result<Entity, QpmError> {
        self.lock().entities_created += 1;
        Ok(Entity::new(name, entity_type))
    }

    fn record(&self, set: MetricSet) {
        self.lock().pending.push(set);
    }

    fn publish(&self) -> Result<(), QpmError> {
        let mut state = self.lock();
        let batch = std::mem::take(&mut state.pending);
        if let Some(message) = &state.fail_publish {
            return Err(QpmError::Publish(message.clone()));
        }
        if !batch.is_empty() {
            state.batches.push(batch);
        }
        Ok(())
    }
}
