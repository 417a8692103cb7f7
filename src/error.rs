use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};
use thiserror::Error;

/// Request-level failures surfaced to callers. Persistence failures are never
/// mapped here; stores return `io::Result` and handlers log-and-continue.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Bad or missing token/session. Uniform message, cause never disclosed.
    #[error("unauthorized")]
    Unauthorized,

    /// Required provider credentials absent; lists every missing name.
    #[error("provider configuration incomplete")]
    Configuration { missing: Vec<&'static str> },

    /// Malformed request body; names the offending field.
    #[error("{0}")]
    Validation(String),

    /// The provider call failed; carries its error payload verbatim.
    #[error("upstream send failed")]
    Upstream {
        error: Value,
        status: Option<u16>,
    },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                json!({ "ok": false, "error": "unauthorized" }),
            ),
            ApiError::Configuration { missing } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({
                    "ok": false,
                    "error": "provider configuration incomplete",
                    "missing": missing
                }),
            ),
            ApiError::Validation(message) => (
                StatusCode::BAD_REQUEST,
                json!({ "ok": false, "error": message }),
            ),
            ApiError::Upstream { error, status } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "ok": false, "error": error, "status": status }),
            ),
        };
        (status, Json(body)).into_response()
    }
}
