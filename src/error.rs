use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Failures surfaced by the relay endpoints and the search path.
///
/// Every variant renders as `{"error": "<message>"}`; clients branch only on
/// the status code and the presence of the `error` field.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("{0}")]
    Validation(String),

    #[error("table {0:?} is not a known table")]
    InjectionRejected(String),

    #[error("only single read-only statements are allowed: {0}")]
    ReadOnlyViolation(String),

    #[error("data store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("{0}")]
    QueryExecution(String),

    #[error("query exceeded the {0:?} time limit")]
    Timeout(std::time::Duration),
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::Validation(_)
            | RelayError::InjectionRejected(_)
            | RelayError::ReadOnlyViolation(_) => StatusCode::BAD_REQUEST,
            RelayError::StoreUnavailable(_) | RelayError::QueryExecution(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            RelayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl From<sqlx::Error> for RelayError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                RelayError::StoreUnavailable(err.to_string())
            }
            sqlx::Error::Database(db_err) => RelayError::QueryExecution(db_err.message().to_string()),
            other => RelayError::QueryExecution(other.to_string()),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("request failed: {self}");
        } else {
            log::debug!("request rejected: {self}");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
