use std::sync::Arc;
use std::time::Duration;

use tokio_util::task::TaskTracker;

use crate::commands::db::SqliteStore;
use crate::commands::settings::{load_sheets_config, PortalSettings, StorageBackend};
use crate::commands::store::{FeedbackStore, MemoryStore};
use crate::error::StoreError;
use crate::sync::{GoogleSheetsMirror, Mirror, MirrorError};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("failed to open feedback store: {0}")]
    Store(#[from] StoreError),

    #[error("failed to initialize mirror: {0}")]
    Mirror(#[from] MirrorError),
}

#[derive(Clone)]
pub struct PortalState {
    pub store: Arc<dyn FeedbackStore>,
    pub mirror: Arc<dyn Mirror>,
    /// In-flight mirror tasks, drained on shutdown.
    pub mirror_tasks: TaskTracker,
}

impl PortalState {
    pub fn new(store: Arc<dyn FeedbackStore>, mirror: Arc<dyn Mirror>) -> Self {
        Self {
            store,
            mirror,
            mirror_tasks: TaskTracker::new(),
        }
    }

    /// Closes the tracker and waits up to `limit` for running mirror tasks.
    ///
    /// Returns false if tasks were still running when the limit expired.
    pub async fn drain_mirrors(&self, limit: Duration) -> bool {
        self.mirror_tasks.close();
        let pending = self.mirror_tasks.len();
        if pending > 0 {
            log::info!("Waiting for {pending} mirror task(s) to finish");
        }

        match tokio::time::timeout(limit, self.mirror_tasks.wait()).await {
            Ok(()) => true,
            Err(_) => {
                log::warn!(
                    "{} mirror task(s) still running after {limit:?}; their sync flags stay false",
                    self.mirror_tasks.len()
                );
                false
            }
        }
    }

    pub fn from_settings(settings: &PortalSettings) -> Result<Self, StartupError> {
        let store: Arc<dyn FeedbackStore> = match settings.storage_backend {
            StorageBackend::Sqlite => Arc::new(SqliteStore::open(settings.database_path())?),
            StorageBackend::Memory => {
                log::warn!("Using in-memory storage; feedback will not survive a restart");
                Arc::new(MemoryStore::new())
            }
        };

        let mirror = GoogleSheetsMirror::new(load_sheets_config(settings))?;
        if !mirror.is_configured() {
            log::info!("Google Sheets mirror not configured; submissions will not be mirrored");
        }

        log::info!("Feedback store backend: {}", store.name());
        Ok(Self::new(store, Arc::new(mirror)))
    }
}
