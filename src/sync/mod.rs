//! Best-effort replication of stored feedback into an external sheet.
//!
//! ```text
//! Mirror (trait)
//!     |
//!     +-- GoogleSheetsMirror
//!     |       Service-account JWT exchange, then values:append.
//!     |
//!     +-- NoopMirror
//!             Mirroring disabled.
//! ```
//!
//! A mirror never fails a submission. Every error is absorbed into a
//! [`MirrorOutcome`]; only `Synced` lets the caller set the record's sync flag.

pub mod sheets;

use crate::models::feedback::FeedbackRecord;
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub use sheets::{GoogleSheetsMirror, SheetsConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorOutcome {
    Synced,
    NotAttempted,
    Failed,
}

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("{0} is not set")]
    MissingConfig(&'static str),

    #[error("mirroring is disabled")]
    Disabled,

    #[error("invalid mirror configuration: {0}")]
    Config(String),

    #[error("invalid service account credential: {0}")]
    Credential(String),

    #[error("failed to sign token assertion: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{endpoint} returned HTTP {status}: {message}")]
    Status {
        endpoint: &'static str,
        status: u16,
        message: String,
    },
}

impl MirrorError {
    /// Missing configuration means "not attempted", not "failed".
    pub fn is_unavailable(&self) -> bool {
        matches!(self, MirrorError::MissingConfig(_) | MirrorError::Disabled)
    }
}

#[async_trait]
pub trait Mirror: Send + Sync {
    /// Replicates one record.
    async fn try_mirror(&self, record: &FeedbackRecord) -> Result<(), MirrorError>;

    /// Returns the mirror name for logging.
    fn name(&self) -> &'static str;

    /// Replicates one record, folding every error into an outcome.
    async fn mirror(&self, record: &FeedbackRecord) -> MirrorOutcome {
        match self.try_mirror(record).await {
            Ok(()) => {
                log::info!("Mirrored feedback {} via {}", record.id, self.name());
                MirrorOutcome::Synced
            }
            Err(e) if e.is_unavailable() => {
                log::info!("Skipping {} mirror for feedback {}: {e}", self.name(), record.id);
                MirrorOutcome::NotAttempted
            }
            Err(e) => {
                log::warn!("{} mirror failed for feedback {}: {e}", self.name(), record.id);
                MirrorOutcome::Failed
            }
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMirror;

#[async_trait]
impl Mirror for NoopMirror {
    async fn try_mirror(&self, _record: &FeedbackRecord) -> Result<(), MirrorError> {
        Err(MirrorError::Disabled)
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}
