//! # Identifier Reservation
//!
//! Namespace-scoped reservation of new SCTIDs.

use crate::{ConceptId, RepositoryError, sctid};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Reserves blocks of fresh identifiers.
pub trait IdentifierSource: Send + Sync {
    /// Reserve `count` identifiers in `namespace` and `partition`.
    ///
    /// Fails with [`RepositoryError::IdentifierAllocation`].
    fn reserve(
        &self,
        namespace: u32,
        partition: &str,
        count: usize,
    ) -> Result<Vec<ConceptId>, RepositoryError>;
}

/// Counter key: `(namespace, partition)`.
pub type CounterKey = (u32, String);

/// In-memory sequential reservation.
///
/// Clones share their counters.
#[derive(Debug, Clone, Default)]
pub struct SequentialIdentifierSource {
    counters: Arc<Mutex<BTreeMap<CounterKey, u64>>>,
}

impl SequentialIdentifierSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a source that continues from previously reserved item numbers.
    #[must_use]
    pub fn with_counters(counters: BTreeMap<CounterKey, u64>) -> Self {
        Self {
            counters: Arc::new(Mutex::new(counters)),
        }
    }

    /// Last reserved item number per namespace and partition.
    pub fn snapshot(&self) -> Result<BTreeMap<CounterKey, u64>, RepositoryError> {
        self.counters
            .lock()
            .map(|c| c.clone())
            .map_err(|_| RepositoryError::IdentifierAllocation("counter lock poisoned".into()))
    }
}

impl IdentifierSource for SequentialIdentifierSource {
    fn reserve(
        &self,
        namespace: u32,
        partition: &str,
        count: usize,
    ) -> Result<Vec<ConceptId>, RepositoryError> {
        let mut counters = self
            .counters
            .lock()
            .map_err(|_| RepositoryError::IdentifierAllocation("counter lock poisoned".into()))?;
        let last = counters
            .entry((namespace, partition.to_string()))
            .or_insert(0);

        let mut ids = Vec::with_capacity(count);
        let mut next = *last;
        for _ in 0..count {
            next = next.checked_add(1).ok_or_else(|| {
                RepositoryError::IdentifierAllocation(format!(
                    "namespace {namespace} partition {partition} is exhausted"
                ))
            })?;
            let id = sctid::build(next, namespace, partition)
                .map_err(|e| RepositoryError::IdentifierAllocation(e.to_string()))?;
            ids.push(id);
        }
        *last = next;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserves_consecutive_valid_identifiers() {
        let source = SequentialIdentifierSource::new();
        let ids = source.reserve(1_000_003, "16", 3).expect("reserve");
        assert_eq!(ids.len(), 3);
        assert_eq!(ids[0], ConceptId(11_000_003_162));
        assert!(ids.iter().all(|id| sctid::is_valid(*id)));

        let more = source.reserve(1_000_003, "16", 1).expect("reserve");
        assert!(!ids.contains(&more[0]));
    }

    #[test]
    fn clones_share_counters() {
        let source = SequentialIdentifierSource::new();
        let clone = source.clone();
        let a = source.reserve(1_000_003, "16", 1).expect("reserve");
        let b = clone.reserve(1_000_003, "16", 1).expect("reserve");
        assert_ne!(a, b);
        assert_eq!(
            source.snapshot().expect("snapshot").get(&(1_000_003, "16".to_string())),
            Some(&2)
        );
    }

    #[test]
    fn counters_are_per_namespace() {
        let source = SequentialIdentifierSource::new();
        let a = source.reserve(1_000_003, "16", 1).expect("reserve");
        let b = source.reserve(1_000_004, "16", 1).expect("reserve");
        assert_ne!(a, b);
    }

    #[test]
    fn bad_partition_is_an_allocation_error() {
        let source = SequentialIdentifierSource::new();
        assert!(matches!(
            source.reserve(1_000_003, "x", 1),
            Err(RepositoryError::IdentifierAllocation(_))
        ));
    }

    #[test]
    fn resumes_from_counters() {
        let mut counters = BTreeMap::new();
        counters.insert((1_000_003, "16".to_string()), 1);
        let source = SequentialIdentifierSource::with_counters(counters);
        let ids = source.reserve(1_000_003, "16", 1).expect("reserve");
        assert_eq!(ids[0], ConceptId(21_000_003_166));
    }
}
