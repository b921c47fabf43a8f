use crate::error::StoreError;
use crate::models::feedback::{new_record_id, now_timestamp, FeedbackRecord, Submission};
use std::sync::Mutex;

/// Durable home for feedback records.
///
/// Records are append-only; the sync flag is the one mutable field and it only
/// ever moves from `false` to `true`.
pub trait FeedbackStore: Send + Sync {
    /// Assigns id, timestamp, status and sync flag, persists, and returns the record.
    fn append(&self, submission: Submission) -> Result<FeedbackRecord, StoreError>;

    /// Every record in insertion order.
    fn list_all(&self) -> Result<Vec<FeedbackRecord>, StoreError>;

    fn get(&self, id: &str) -> Result<Option<FeedbackRecord>, StoreError>;

    fn list_by_tester(&self, tester_name: &str) -> Result<Vec<FeedbackRecord>, StoreError> {
        Ok(self
            .list_all()?
            .into_iter()
            .filter(|record| record.tester_name == tester_name)
            .collect())
    }

    /// Unknown ids are ignored. Passing `false` never clears a flag already set.
    fn update_sync_flag(&self, id: &str, synced: bool) -> Result<(), StoreError>;

    /// Backend name for logging.
    fn name(&self) -> &'static str;
}

/// Process-local store. Contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<FeedbackRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FeedbackStore for MemoryStore {
    fn append(&self, submission: Submission) -> Result<FeedbackRecord, StoreError> {
        let record = FeedbackRecord::new(submission, new_record_id(), now_timestamp());
        let mut records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        records.push(record.clone());
        Ok(record)
    }

    fn list_all(&self) -> Result<Vec<FeedbackRecord>, StoreError> {
        let records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(records.clone())
    }

    fn get(&self, id: &str) -> Result<Option<FeedbackRecord>, StoreError> {
        let records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(records.iter().find(|record| record.id == id).cloned())
    }

    fn update_sync_flag(&self, id: &str, synced: bool) -> Result<(), StoreError> {
        let mut records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        if let Some(record) = records.iter_mut().find(|record| record.id == id) {
            record.sheets_synced |= synced;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
