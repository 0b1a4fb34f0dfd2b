//! Job registry collaborator interface.
//!
//! The registry owns canonical [`JobRecord`]s keyed by job id. The scheduler
//! consumes this interface but does not own the records: it looks a record up
//! and mutates `status`/`response` in place. [`InMemoryRegistry`] is the
//! default process-local implementation; alternative backends only need to
//! implement [`JobRegistry`].

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::CoreError;
use crate::job::JobRecord;
use crate::types::JobId;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Lookup-and-mutate access to job records.
pub trait JobRegistry: Send + Sync {
    /// Apply `mutate` to the record with the given id.
    ///
    /// Returns [`CoreError::NotFound`] if no such record exists; the closure
    /// is not invoked in that case.
    fn update(
        &self,
        id: JobId,
        mutate: &mut dyn FnMut(&mut JobRecord),
    ) -> Result<(), CoreError>;

    /// Snapshot of the record with the given id.
    fn get(&self, id: JobId) -> Option<JobRecord>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

/// Process-local registry backed by a mutex-guarded map.
#[derive(Default)]
pub struct InMemoryRegistry {
    records: Mutex<HashMap<JobId, JobRecord>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh record for `id`, replacing any previous one.
    pub fn insert(&self, record: JobRecord) {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.insert(record.id, record);
    }

    /// Remove the record for `id`, returning it if present.
    pub fn remove(&self, id: JobId) -> Option<JobRecord> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.remove(&id)
    }

    pub fn len(&self) -> usize {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl JobRegistry for InMemoryRegistry {
    fn update(
        &self,
        id: JobId,
        mutate: &mut dyn FnMut(&mut JobRecord),
    ) -> Result<(), CoreError> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let record = records.get_mut(&id).ok_or(CoreError::NotFound { id })?;
        mutate(record);
        record.updated_at = chrono::Utc::now();
        Ok(())
    }

    fn get(&self, id: JobId) -> Option<JobRecord> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.get(&id).cloned()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::STATUS_COMPLETED;
    use assert_matches::assert_matches;

    #[test]
    fn update_mutates_record_in_place() {
        let registry = InMemoryRegistry::new();
        registry.insert(JobRecord::new(1));

        registry
            .update(1, &mut |record| record.status = STATUS_COMPLETED)
            .unwrap();

        assert_eq!(registry.get(1).unwrap().status, STATUS_COMPLETED);
    }

    #[test]
    fn update_missing_record_is_not_found() {
        let registry = InMemoryRegistry::new();
        let result = registry.update(42, &mut |_| panic!("must not be called"));
        assert_matches!(result, Err(CoreError::NotFound { id: 42 }));
    }

    #[test]
    fn insert_replaces_existing_record() {
        let registry = InMemoryRegistry::new();
        registry.insert(JobRecord::new(1));
        let mut replacement = JobRecord::new(1);
        replacement.status = STATUS_COMPLETED;
        registry.insert(replacement);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(1).unwrap().status, STATUS_COMPLETED);
    }
}
