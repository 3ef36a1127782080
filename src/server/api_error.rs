//! Error responses for the activation API.
//!
//! Every failure is returned as
//!
//! ```json
//! { "ok": false, "error": "already_activated_on_another_pc", "message": "..." }
//! ```
//!
//! `error` is a stable snake_case code that clients branch on; `message` is
//! for people.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::errors::LicenseError;

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // === Request Errors (400) ===
    /// A required field is missing or blank
    MissingFields,
    /// A field value is unusable
    InvalidField,

    // === Payment Errors ===
    /// Gateway did not recognise the reference
    VerificationFailed,
    /// Gateway knows the reference but it was not paid
    PaymentNotSuccessful,
    /// Gateway unreachable or answered nonsense
    GatewayError,

    // === Binding / Token Errors ===
    /// License is bound to a different machine
    AlreadyActivatedOnAnotherPc,
    /// Token is malformed, forged or expired
    BadToken,
    /// Token payload does not match the presented key and machine
    Mismatch,
    /// License missing or not active
    InvalidLicense,

    // === Server Errors (5xx) ===
    InternalError,
}

impl ErrorCode {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::MissingFields
            | ErrorCode::InvalidField
            | ErrorCode::VerificationFailed
            | ErrorCode::PaymentNotSuccessful => StatusCode::BAD_REQUEST,

            ErrorCode::BadToken | ErrorCode::Mismatch => StatusCode::UNAUTHORIZED,

            ErrorCode::AlreadyActivatedOnAnotherPc | ErrorCode::InvalidLicense => {
                StatusCode::FORBIDDEN
            }

            ErrorCode::GatewayError => StatusCode::BAD_GATEWAY,

            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::MissingFields => "Required fields are missing",
            ErrorCode::InvalidField => "A field value is invalid",
            ErrorCode::VerificationFailed => "Payment reference could not be verified",
            ErrorCode::PaymentNotSuccessful => "Payment was not successful",
            ErrorCode::GatewayError => "Payment service is unavailable, try again shortly",
            ErrorCode::AlreadyActivatedOnAnotherPc => {
                "This license is already activated on another computer"
            }
            ErrorCode::BadToken => "Activation token is invalid or expired",
            ErrorCode::Mismatch => "Activation token does not match this license and machine",
            ErrorCode::InvalidLicense => "License is not valid",
            ErrorCode::InternalError => "An unexpected error occurred",
        }
    }
}

/// Failure body returned by every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// Always false
    pub ok: bool,
    #[serde(rename = "error")]
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    /// Error with the code's default message.
    pub fn new(code: ErrorCode) -> Self {
        Self::with_message(code, code.default_message())
    }

    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            code,
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    pub fn missing_fields(fields: &[&str]) -> Self {
        Self::with_message(
            ErrorCode::MissingFields,
            format!("Missing required fields: {}", fields.join(", ")),
        )
    }

    pub fn invalid_field(field: &str, reason: &str) -> Self {
        Self::with_message(
            ErrorCode::InvalidField,
            format!("Invalid value for '{}': {}", field, reason),
        )
    }

    pub fn internal_error() -> Self {
        Self::new(ErrorCode::InternalError)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(self)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

/// Internal failures become generic 5xx responses. Details go to the log,
/// not to the caller.
impl From<LicenseError> for ApiError {
    fn from(err: LicenseError) -> Self {
        match err {
            LicenseError::Transport { kind, message } => {
                error!(kind = %kind, "payment gateway failure: {message}");
                ApiError::new(ErrorCode::GatewayError)
            }
            LicenseError::InvalidInput(msg) => ApiError::with_message(ErrorCode::InvalidField, msg),
            other => {
                error!("internal error: {other}");
                ApiError::internal_error()
            }
        }
    }
}
