use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use orchestrator_core::errors::{ApplicationError, InterfaceError};
use uuid::Uuid;

/// Wraps a domain/application failure with a request-scoped correlation id,
/// matching `_error`'s `req_<10 hex chars>` shape in the reference handler.
pub struct ApiError {
    interface: InterfaceError,
}

impl ApiError {
    fn from_application(error: ApplicationError) -> Self {
        let correlation_id = format!("req_{}", &Uuid::new_v4().simple().to_string()[..10]);
        Self { interface: error.into_interface(correlation_id) }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::from_application(ApplicationError::Forbidden(message.into()))
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::from_application(ApplicationError::Unauthorized(message.into()))
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::from_application(ApplicationError::Validation(message.into()))
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        Self::from_application(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.interface.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = serde_json::json!({
            "error": {
                "code": self.interface.code(),
                "message": self.interface.message(),
                "request_id": self.interface.correlation_id(),
            }
        });
        (status, Json(body)).into_response()
    }
}
