//! Error taxonomy and the HTTP error envelope
//!
//! Every handler failure funnels through [`ApiError`]; the envelope on the
//! wire is always `{"errMsg": "<message>"}`. Upstream/store failures collapse
//! to a generic 500 externally while the full chain is logged.
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    // input
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("event type and impact mismatch")]
    TypeImpactMismatch,
    #[error("incident start_date should not be in the future")]
    IncidentFutureStart,
    #[error("incident creation must not carry an end_date")]
    IncidentEndDateOnCreate,
    #[error("maintenance end_date must be after start_date")]
    MaintenanceDateRange,
    #[error("maintenance start_date must be in the future")]
    MaintenanceStartNotFuture,
    #[error("maintenance requires a valid contact email")]
    MaintenanceContactEmail,
    #[error("maintenance requires a description")]
    MaintenanceDescription,
    #[error("updates can not be provided at creation")]
    UpdatesOnCreate,
    #[error("system events must be of type incident")]
    SystemCreationWrongType,
    #[error("event requires at least one component")]
    NoComponents,
    #[error("component {0} does not exist")]
    UnknownComponentId(i64),
    #[error("component requires exactly one each of the region, type and category attributes")]
    AttributeTriad,
    #[error("component already exists")]
    ComponentExists,
    #[error("component is covered by an active maintenance")]
    MaintenanceExists,

    // consistency
    #[error("status is not valid for an incident")]
    InvalidIncidentStatus,
    #[error("status is not valid for a maintenance")]
    InvalidMaintenanceStatus,
    #[error("status is not valid for an info event")]
    InvalidInfoStatus,
    #[error("closed incident accepts only the reopened or changed status")]
    ClosedIncidentStatus,
    #[error("impact change requires the impact changed status")]
    ImpactChangeStatus,
    #[error("incident impact can not be lowered to 0")]
    ImpactToZero,
    #[error("start_date of an open incident can not be changed")]
    OpenIncidentStartDate,
    #[error("extraction must keep at least one component on the source event")]
    ExtractAllComponents,
    #[error("component is not attached to this event")]
    ComponentNotAttached,
    #[error("an open incident with equal or higher impact already exists")]
    DuplicateImpact,

    // authorization
    #[error("authorization required")]
    Unauthorized,
    #[error("insufficient role for this operation")]
    Forbidden,

    // existence
    #[error("event not found")]
    EventNotFound,
    #[error("component not found")]
    ComponentNotFound,
    #[error("update not found")]
    UpdateNotFound,

    // upstream — surfaced as a bare 500, logged with the full chain
    #[error("internal server error")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// Map a persistence failure onto the API taxonomy. `NotFound` defaults
    /// to the event variant; handlers with a more specific target (updates,
    /// components) map it themselves.
    pub fn from_store(err: crate::db::StoreError) -> Self {
        match err {
            crate::db::StoreError::ComponentExists => ApiError::ComponentExists,
            crate::db::StoreError::NotFound => ApiError::EventNotFound,
            crate::db::StoreError::Database(e) => {
                ApiError::Internal(anyhow::Error::new(e).context("store failure"))
            }
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::EventNotFound | ApiError::ComponentNotFound | ApiError::UpdateNotFound => {
                StatusCode::NOT_FOUND
            }
            ApiError::DuplicateImpact => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(err: rusqlite::Error) -> Self {
        ApiError::Internal(anyhow::Error::new(err).context("store failure"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if let ApiError::Internal(ref chain) = self {
            tracing::error!("internal error: {:#}", chain);
        }
        (status, Json(json!({ "errMsg": self.to_string() }))).into_response()
    }
}
