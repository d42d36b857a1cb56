//! HTTP error mapping
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use oit_core::{OitError, VisitLock};
use oit_sequencer::SequenceError;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("NOT_FOUND/{0}")]
    NotFound(String),

    #[error("BAD_REQUEST/{0}")]
    BadRequest(String),

    #[error("LOCKED/visit {visit_id} is not scheduled for today")]
    Locked { visit_id: String, lock: VisitLock },

    #[error("{0}")]
    Unprocessable(String),

    #[error("{0}")]
    Conflict(String),

    #[error("UPSTREAM/{0}")]
    Upstream(String),

    #[error("INTERNAL/{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Locked { .. } => StatusCode::LOCKED,
            Self::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<SequenceError> for ApiError {
    fn from(err: SequenceError) -> Self {
        match err {
            SequenceError::Core(OitError::VisitLocked { visit_id, scheduled, today }) => Self::Locked {
                visit_id,
                lock: VisitLock::Locked { scheduled, today },
            },
            SequenceError::Capture(err) => Self::Unprocessable(err.to_string()),
            SequenceError::Cache(err) => Self::Internal(err.to_string()),
            other => Self::Conflict(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(error = %self, "request failed");
        }
        let body = match &self {
            Self::Locked { visit_id, lock } => json!({
                "error": self.to_string(),
                "visitId": visit_id,
                "lock": lock,
            }),
            _ => json!({ "error": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}
