use axum::{
    body::Bytes,
    extract::{
        rejection::{BytesRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::{
        header::{
            ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
            ACCESS_CONTROL_ALLOW_ORIGIN,
        },
        HeaderValue, StatusCode,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::commands::feedback::{get_feedback, list_feedback, submit_feedback};
use crate::error::PortalError;
use crate::models::feedback::FeedbackRecord;
use crate::state::PortalState;

pub const ALLOWED_METHODS: &str = "GET, POST, OPTIONS";
pub const ALLOWED_HEADERS: &str = "Content-Type";

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    tester_name: Option<String>,
}

pub fn router(state: PortalState) -> Router {
    Router::new()
        .route(
            "/feedback",
            get(list_handler)
                .post(submit_handler)
                .options(preflight_handler)
                .head(method_not_allowed)
                .fallback(method_not_allowed),
        )
        .route(
            "/feedback/{id}",
            get(get_handler)
                .options(preflight_handler)
                .head(method_not_allowed)
                .fallback(method_not_allowed),
        )
        .layer(SetResponseHeaderLayer::overriding(
            ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .with_state(state)
}

pub async fn submit_handler(
    State(state): State<PortalState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<impl IntoResponse, PortalError> {
    let accepted = submit_feedback(&state, &body?).await?;
    Ok((StatusCode::CREATED, Json(accepted.record)))
}

pub async fn list_handler(
    State(state): State<PortalState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Vec<FeedbackRecord>>, PortalError> {
    let Query(query) = query?;
    let tester_name = query.tester_name.filter(|name| !name.is_empty());
    Ok(Json(list_feedback(&state, tester_name).await))
}

pub async fn get_handler(
    State(state): State<PortalState>,
    id: Result<Path<String>, PathRejection>,
) -> Result<Json<FeedbackRecord>, PortalError> {
    // An id that does not decode cannot name a stored record.
    let Path(id) = id.map_err(|_| PortalError::NotFound)?;
    Ok(Json(get_feedback(&state, id).await?))
}

pub async fn preflight_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [
            (ACCESS_CONTROL_ALLOW_METHODS, ALLOWED_METHODS),
            (ACCESS_CONTROL_ALLOW_HEADERS, ALLOWED_HEADERS),
        ],
    )
}

pub async fn method_not_allowed() -> PortalError {
    PortalError::MethodNotAllowed
}
