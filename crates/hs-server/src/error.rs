//! Error-to-HTTP response conversion.
//!
//! Route handlers return `Result<T, AppError>`; any [`hs_core::Error`]
//! converts with `?`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Wrapper so we can implement `IntoResponse` for an external type.
#[derive(Debug)]
pub struct AppError {
    inner: hs_core::Error,
}

impl AppError {
    pub fn new(inner: hs_core::Error) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &hs_core::Error {
        &self.inner
    }
}

impl From<hs_core::Error> for AppError {
    fn from(e: hs_core::Error) -> Self {
        Self::new(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.inner.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            tracing::error!(
                status = %status,
                error = %self.inner,
                "Server error in API handler"
            );
        }

        let code = match &self.inner {
            hs_core::Error::NotFound { .. } => "not_found",
            hs_core::Error::BadRequest(_) => "bad_request",
            hs_core::Error::Unavailable(_) => "unavailable",
            hs_core::Error::Io { .. } => "io_error",
            hs_core::Error::Tool { .. } => "tool_error",
            hs_core::Error::Probe(_) => "probe_error",
            hs_core::Error::Config(_) => "config_error",
            hs_core::Error::Internal(_) => "internal_error",
        };

        let body = json!({
            "error": self.inner.to_string(),
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_produces_404() {
        let response = AppError::new(hs_core::Error::not_found("resource", "abc")).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn bad_request_produces_400() {
        let response = AppError::new(hs_core::Error::bad_request("nope")).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn unavailable_produces_503() {
        let response = AppError::new(hs_core::Error::Unavailable("later".into())).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
