use crate::commands::validate::validate_submission;
use crate::error::{PortalError, StoreError};
use crate::models::feedback::FeedbackRecord;
use crate::state::PortalState;
use crate::sync::MirrorOutcome;
use serde_json::Value;
use tokio::task::{spawn_blocking, JoinHandle};

/// A submission that has been durably stored.
///
/// `record` is the value as of the response; the mirror keeps running on
/// `sync` and may flip the stored sync flag afterwards.
pub struct Accepted {
    pub record: FeedbackRecord,
    pub sync: JoinHandle<MirrorOutcome>,
}

/// Validate, append, then hand the record to the mirror without waiting on it.
pub async fn submit_feedback(state: &PortalState, body: &[u8]) -> Result<Accepted, PortalError> {
    let input: Value = serde_json::from_slice(body)?;
    let submission = validate_submission(input)?;

    let store = state.store.clone();
    let record = spawn_blocking(move || store.append(submission))
        .await
        .map_err(StoreError::from)??;

    log::info!(
        "Stored {} feedback {} from {}",
        record.submission_type,
        record.id,
        record.tester_name
    );

    let sync = spawn_mirror(state, record.clone());
    Ok(Accepted { record, sync })
}

fn spawn_mirror(state: &PortalState, record: FeedbackRecord) -> JoinHandle<MirrorOutcome> {
    let store = state.store.clone();
    let mirror = state.mirror.clone();

    state.mirror_tasks.spawn(async move {
        let outcome = mirror.mirror(&record).await;
        if outcome != MirrorOutcome::Synced {
            return outcome;
        }

        let id = record.id.clone();
        match spawn_blocking(move || store.update_sync_flag(&id, true)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("Failed to record sync flag for feedback {}: {e}", record.id),
            Err(e) => log::warn!("Sync flag task for feedback {} failed: {e}", record.id),
        }
        outcome
    })
}

/// Lists records, optionally for one tester.
///
/// An unreadable store yields an empty list; the fault is logged, not returned.
pub async fn list_feedback(state: &PortalState, tester_name: Option<String>) -> Vec<FeedbackRecord> {
    let store = state.store.clone();
    let result = spawn_blocking(move || match tester_name {
        Some(name) => store.list_by_tester(&name),
        None => store.list_all(),
    })
    .await;

    match result {
        Ok(Ok(records)) => records,
        Ok(Err(e)) => {
            log::error!("Feedback store unreadable, returning empty list: {e}");
            Vec::new()
        }
        Err(e) => {
            log::error!("Feedback list task failed, returning empty list: {e}");
            Vec::new()
        }
    }
}

pub async fn get_feedback(state: &PortalState, id: String) -> Result<FeedbackRecord, PortalError> {
    let store = state.store.clone();
    let result = spawn_blocking(move || store.get(&id)).await;

    match result {
        Ok(Ok(Some(record))) => Ok(record),
        Ok(Ok(None)) => Err(PortalError::NotFound),
        Ok(Err(e)) => {
            log::error!("Feedback store unreadable during lookup: {e}");
            Err(PortalError::NotFound)
        }
        Err(e) => {
            log::error!("Feedback lookup task failed: {e}");
            Err(PortalError::NotFound)
        }
    }
}
