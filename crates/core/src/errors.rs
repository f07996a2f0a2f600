use thiserror::Error;

use crate::flows::FlowTransitionError;

/// Pure state-machine precondition violations, per spec.md §4.5 / §4.3.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Service-level errors produced by the core's handlers and pipeline logic.
/// Variants map close to 1:1 onto the error code vocabulary in spec.md §6/§7
/// so the HTTP layer can translate them without re-deriving intent.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("task not found: {0}")]
    TaskNotFound(String),
    #[error("approval item not found: {0}")]
    ApprovalNotFound(String),
    #[error("invalid task state: {0}")]
    InvalidTaskState(String),
    #[error("invalid approval state: {0}")]
    InvalidApprovalState(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("{code}: {message}")]
    Mapped { code: &'static str, message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn code(&self) -> &'static str {
        let Self::Mapped { code, .. } = self;
        code
    }

    pub fn message(&self) -> &str {
        let Self::Mapped { message, .. } = self;
        message
    }

    pub fn correlation_id(&self) -> &str {
        let Self::Mapped { correlation_id, .. } = self;
        correlation_id
    }

    /// HTTP status code per spec.md §6's error table.
    pub fn http_status(&self) -> u16 {
        match self.code() {
            "UNAUTHORIZED" => 401,
            "FORBIDDEN" => 403,
            "TASK_NOT_FOUND" | "APPROVAL_NOT_FOUND" => 404,
            "INVALID_TASK_STATE" | "INVALID_APPROVAL_STATE" => 409,
            "INVALID_REQUEST" => 400,
            _ => 500,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let (code, message): (&'static str, String) = match self {
            ApplicationError::Domain(DomainError::FlowTransition(err)) => {
                ("INVALID_TASK_STATE", err.to_string())
            }
            ApplicationError::Domain(DomainError::InvariantViolation(message)) => {
                ("INVALID_REQUEST", message)
            }
            ApplicationError::Validation(message) => ("INVALID_REQUEST", message),
            ApplicationError::Forbidden(message) => ("FORBIDDEN", message),
            ApplicationError::Unauthorized(message) => ("UNAUTHORIZED", message),
            ApplicationError::TaskNotFound(message) => ("TASK_NOT_FOUND", message),
            ApplicationError::ApprovalNotFound(message) => ("APPROVAL_NOT_FOUND", message),
            ApplicationError::InvalidTaskState(message) => ("INVALID_TASK_STATE", message),
            ApplicationError::InvalidApprovalState(message) => ("INVALID_APPROVAL_STATE", message),
            ApplicationError::Persistence(message) => ("HTTP_ERROR", message),
            ApplicationError::Configuration(message) => ("HTTP_ERROR", message),
        };
        InterfaceError::Mapped { code, message, correlation_id }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::ApplicationError;

    #[test]
    fn validation_error_maps_to_invalid_request() {
        let interface =
            ApplicationError::Validation("missing required field".to_owned()).into_interface("req-1");

        assert_eq!(interface.code(), "INVALID_REQUEST");
        assert_eq!(interface.http_status(), 400);
        assert_eq!(interface.correlation_id(), "req-1");
    }

    #[test]
    fn forbidden_error_maps_to_403() {
        let interface = ApplicationError::Forbidden("role not allowed".to_owned()).into_interface("req-2");
        assert_eq!(interface.code(), "FORBIDDEN");
        assert_eq!(interface.http_status(), 403);
    }

    #[test]
    fn task_not_found_maps_to_404() {
        let interface =
            ApplicationError::TaskNotFound("task_xyz".to_owned()).into_interface("req-3");
        assert_eq!(interface.code(), "TASK_NOT_FOUND");
        assert_eq!(interface.http_status(), 404);
    }

    #[test]
    fn invalid_approval_state_maps_to_409() {
        let interface =
            ApplicationError::InvalidApprovalState("already resolved".to_owned()).into_interface("req-4");
        assert_eq!(interface.code(), "INVALID_APPROVAL_STATE");
        assert_eq!(interface.http_status(), 409);
    }

    #[test]
    fn persistence_error_maps_to_internal() {
        let interface =
            ApplicationError::Persistence("database lock timeout".to_owned()).into_interface("req-5");
        assert_eq!(interface.http_status(), 500);
    }
}
