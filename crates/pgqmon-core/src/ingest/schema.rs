//! Per-type field descriptor cache.

use std::any::{TypeId, type_name};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use super::record::Record;
use crate::error::QpmError;
use crate::sink::ValueKind;

/// One ingestible field of a record type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub kind: ValueKind,
    /// Index into [`Record::field_values`].
    pub position: usize,
}

/// Descriptors computed once per record type and shared afterwards.
#[derive(Debug, Default)]
pub struct SchemaCache {
    entries: RwLock<HashMap<TypeId, Arc<[FieldDescriptor]>>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the descriptors of `R`, computing them on first use.
    ///
    /// Concurrent first uses may both compute; the first insert wins.
    pub fn describe<R: Record>(&self) -> Result<Arc<[FieldDescriptor]>, QpmError> {
        let key = TypeId::of::<R>();
        if let Some(found) = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Ok(Arc::clone(found));
        }

        let built = build::<R>()?;
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        Ok(Arc::clone(entries.entry(key).or_insert(built)))
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn build<R: Record>() -> Result<Arc<[FieldDescriptor]>, QpmError> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for (position, spec) in R::schema().iter().enumerate() {
        let Some(kind) = spec.kind else { continue };
        if !seen.insert(spec.name) {
            return Err(QpmError::InvalidModelType(type_name::<R>()));
        }
        out.push(FieldDescriptor {
            name: spec.name,
            kind,
            position,
        });
    }
    if out.is_empty() {
        return Err(QpmError::InvalidModelType(type_name::<R>()));
    }
    Ok(out.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    crate::metric_record! {
        struct Good {
            a: Option<i64> => gauge("a"),
            hidden: Option<String> => skip,
            b: Option<String> => attribute("b"),
        }
    }

    crate::metric_record! {
        struct Duplicate {
            a: Option<i64> => gauge("same"),
            b: Option<i64> => gauge("same"),
        }
    }

    crate::metric_record! {
        struct AllSkipped {
            a: Option<i64> => skip,
        }
    }

    #[test]
    fn skipped_fields_keep_positions_of_the_rest() {
        let cache = SchemaCache::new();
        let desc = cache.describe::<Good>().unwrap();
        assert_eq!(desc.len(), 2);
        assert_eq!(desc[0].position, 0);
        assert_eq!(desc[1].name, "b");
        assert_eq!(desc[1].position, 2);
    }

    #[test]
    fn descriptors_are_cached_per_type() {
        let cache = SchemaCache::new();
        let first = cache.describe::<Good>().unwrap();
        let second = cache.describe::<Good>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn invalid_schemas_are_rejected_and_not_cached() {
        let cache = SchemaCache::new();
        assert!(matches!(
            cache.describe::<Duplicate>(),
            Err(QpmError::InvalidModelType(_))
        ));
        assert!(matches!(
            cache.describe::<AllSkipped>(),
            Err(QpmError::InvalidModelType(_))
        ));
        assert!(cache.is_empty());
    }
}
