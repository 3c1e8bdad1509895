use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Map, Value as JsonValue};
use std::fmt::Display;

/// Stable error kinds surfaced to API clients as `error.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    Unauthorized,
    Forbidden,
    NotFound,
    ServiceUnavailable,
    GatewayError,
    Timeout,
    ConfigurationError,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::GatewayError => "gateway_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ConfigurationError => "configuration_error",
            ErrorKind::Internal => "internal",
        }
    }

    pub fn status_code(self) -> StatusCode {
        match self {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::GatewayError => StatusCode::BAD_GATEWAY,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::ConfigurationError => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug)]
pub struct AppError {
    pub kind: ErrorKind,
    pub message: String,
    pub details: Option<JsonValue>,
    pub gateway: Option<String>,
    pub operation: Option<String>,
}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
            gateway: None,
            operation: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn validation_with_details(message: impl Into<String>, details: JsonValue) -> Self {
        let mut err = Self::new(ErrorKind::Validation, message);
        err.details = Some(details);
        err
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServiceUnavailable, message)
    }

    pub fn gateway(
        gateway: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let mut err = Self::new(ErrorKind::GatewayError, message);
        err.gateway = Some(gateway.into());
        err.operation = Some(operation.into());
        err
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConfigurationError, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn envelope(&self) -> JsonValue {
        let mut body = Map::new();
        body.insert("status".to_string(), json!(self.kind.as_str()));
        body.insert("message".to_string(), json!(self.message));
        if let Some(details) = &self.details {
            body.insert("details".to_string(), details.clone());
        }
        if let Some(gateway) = &self.gateway {
            body.insert("gateway".to_string(), json!(gateway));
        }
        if let Some(operation) = &self.operation {
            body.insert("operation".to_string(), json!(operation));
        }
        json!({ "error": JsonValue::Object(body) })
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.kind == ErrorKind::Internal {
            tracing::error!(error = %self.message, "internal error");
        }
        (self.kind.status_code(), Json(self.envelope())).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = %err, "internal error");
        AppError::internal("Internal server error")
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Success envelope used by every route: `{"data": ...}`.
pub fn data_envelope(data: JsonValue) -> JsonValue {
    json!({ "data": data })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_expected_status_codes() {
        assert_eq!(ErrorKind::Validation.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorKind::Conflict.status_code(), StatusCode::CONFLICT);
        assert_eq!(ErrorKind::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorKind::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorKind::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ErrorKind::ServiceUnavailable.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(ErrorKind::GatewayError.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(ErrorKind::Timeout.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            ErrorKind::ConfigurationError.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn envelope_carries_status_and_details() {
        let err = AppError::validation_with_details(
            "Rule validation failed",
            json!({"start": "must be HH:MM"}),
        );
        let body = err.envelope();
        assert_eq!(body["error"]["status"], "validation");
        assert_eq!(body["error"]["message"], "Rule validation failed");
        assert_eq!(body["error"]["details"]["start"], "must be HH:MM");
    }

    #[test]
    fn gateway_envelope_includes_gateway_and_operation() {
        let err = AppError::gateway("zwavejs", "set_value", "driver not ready");
        let body = err.envelope();
        assert_eq!(body["error"]["status"], "gateway_error");
        assert_eq!(body["error"]["gateway"], "zwavejs");
        assert_eq!(body["error"]["operation"], "set_value");
    }
}
