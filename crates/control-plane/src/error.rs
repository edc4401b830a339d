use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

/// Marker prefixed to error bodies that originate from a downstream
/// Docker/Kubernetes/agent API rather than from this service.
pub const UPSTREAM_ERROR_PREFIX: &str = "upstream error: ";

/// Application error type for HTTP handlers.
///
/// Carries the status and the client-facing message; the underlying cause is
/// logged by the middleware layer and never leaks into the response body.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub details: Option<String>,
}

pub type ApiResult<T> = std::result::Result<T, AppError>;

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", msg)
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", msg)
    }

    /// The stable denial body used by the authorising proxy. Restricted
    /// single-resource reads answer with this whether the resource is missing
    /// or forbidden, so callers cannot probe for existence.
    pub fn access_denied() -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            "forbidden",
            "access denied to resource",
        )
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", msg)
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "conflict", msg)
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", msg)
    }

    pub fn too_many_requests(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, "rate_limited", msg)
    }

    /// Mirror a downstream API failure, keeping its status code.
    pub fn upstream(status: StatusCode, msg: impl Into<String>) -> Self {
        Self::new(
            status,
            "upstream",
            format!("{UPSTREAM_ERROR_PREFIX}{}", msg.into()),
        )
    }

    pub fn internal(msg: &str) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg)
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = match &self.details {
            Some(details) => json!({"message": self.message, "details": details}),
            None => json!({"message": self.message}),
        };
        (self.status, axum::Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        error!(?err, "internal error");
        AppError::internal("internal server error")
    }
}

impl From<crate::store::StoreError> for AppError {
    fn from(err: crate::store::StoreError) -> Self {
        match err {
            crate::store::StoreError::NotFound => AppError::not_found("object not found"),
            crate::store::StoreError::Conflict(msg) => AppError::conflict(msg),
            other => {
                error!(err = %other, "datastore error");
                AppError::internal("internal server error")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_denied_body_is_stable() {
        let err = AppError::access_denied();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
        assert_eq!(err.message, "access denied to resource");
    }

    #[test]
    fn upstream_errors_carry_the_marker() {
        let err = AppError::upstream(StatusCode::BAD_GATEWAY, "connection reset");
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
        assert!(err.message.starts_with(UPSTREAM_ERROR_PREFIX));
    }
}
