use axum::{
    extract::rejection::{BytesRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("storage task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("storage lock poisoned")]
    Poisoned,
}

#[derive(Error, Debug)]
pub enum PortalError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Feedback not found")]
    NotFound,

    #[error("Invalid query string: {0}")]
    InvalidQuery(#[from] QueryRejection),

    #[error("Malformed payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    #[error("Unreadable request body: {0}")]
    UnreadableBody(#[from] BytesRejection),

    #[error("Storage write failed: {0}")]
    StorageWrite(#[from] StoreError),
}

impl PortalError {
    pub fn status(&self) -> StatusCode {
        match self {
            PortalError::Validation(_) | PortalError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            PortalError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            PortalError::NotFound => StatusCode::NOT_FOUND,
            PortalError::MalformedPayload(_)
            | PortalError::UnreadableBody(_)
            | PortalError::StorageWrite(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to the client. Internal faults never leak details.
    pub fn public_message(&self) -> String {
        match self {
            PortalError::MalformedPayload(_)
            | PortalError::UnreadableBody(_)
            | PortalError::StorageWrite(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for PortalError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("Request failed: {self}");
        }

        (status, Json(json!({ "error": self.public_message() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_names_the_field() {
        let err = PortalError::from(ValidationError::MissingField("tester_name"));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.public_message(), "Missing required field: tester_name");
    }

    #[test]
    fn internal_faults_are_reported_generically() {
        let malformed = serde_json::from_str::<serde_json::Value>("{not json")
            .expect_err("invalid json");
        let err = PortalError::from(malformed);
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), "Internal server error");

        let err = PortalError::from(StoreError::Poisoned);
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), "Internal server error");
    }

    #[test]
    fn method_errors_are_surfaced_verbatim() {
        assert_eq!(PortalError::MethodNotAllowed.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(PortalError::MethodNotAllowed.public_message(), "Method not allowed");
        assert_eq!(PortalError::NotFound.public_message(), "Feedback not found");
    }
}
