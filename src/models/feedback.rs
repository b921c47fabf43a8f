use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const STATUS_NEW: &str = "New";

/// Keys the store assigns itself; a client can never supply them.
pub const STORE_ASSIGNED_FIELDS: [&str; 4] = ["id", "timestamp", "status", "sheets_synced"];

/// A submission that passed intake validation but has not been stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub tester_name: String,
    pub submission_type: String, // "Bug" | "Feedback" | "Progress" | "Feature Request" | anything non-empty
    pub title: String,
    pub description: String,
    pub severity: Option<String>,
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub id: String,
    pub tester_name: String,
    pub submission_type: String,
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    pub timestamp: String, // ISO-8601 UTC, millisecond precision
    pub status: String,
    pub sheets_synced: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FeedbackRecord {
    pub fn new(submission: Submission, id: String, timestamp: String) -> Self {
        Self {
            id,
            tester_name: submission.tester_name,
            submission_type: submission.submission_type,
            title: submission.title,
            description: submission.description,
            severity: submission.severity,
            timestamp,
            status: STATUS_NEW.to_string(),
            sheets_synced: false,
            extra: submission.extra,
        }
    }

    /// Row layout of the spreadsheet mirror (columns A through G).
    pub fn sheet_row(&self) -> Vec<String> {
        vec![
            self.tester_name.clone(),
            self.submission_type.clone(),
            self.title.clone(),
            self.description.clone(),
            self.severity.clone().unwrap_or_default(),
            self.timestamp.clone(),
            self.status.clone(),
        ]
    }
}

/// Generates a time-ordered unique record id.
pub fn new_record_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
