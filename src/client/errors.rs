//! Client-side view of the activation server's error responses.
//!
//! Every failure body from the server has the shape
//! `{"ok": false, "error": "<snake_case code>", "message": "..."}`.
//! Codes this client does not know decode as [`ClientErrorCode::Unknown`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes returned by the activation server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientErrorCode {
    // === Request Errors ===
    /// A required field was missing or blank
    MissingFields,
    /// A field was present but unusable (e.g. too long)
    InvalidField,

    // === Payment Errors ===
    /// The gateway did not recognise the reference
    VerificationFailed,
    /// The gateway knows the reference but it was not paid
    PaymentNotSuccessful,
    /// The gateway could not be reached
    GatewayError,

    // === Binding Errors ===
    /// The license is bound to a different machine
    AlreadyActivatedOnAnotherPc,

    // === Token Errors ===
    /// Activation token is malformed, forged or expired
    BadToken,
    /// Token payload does not match the presented key/machine
    Mismatch,
    /// License missing or no longer active
    InvalidLicense,

    // === Server Errors ===
    InternalError,

    /// Unknown error code (forward compatibility)
    #[serde(other)]
    Unknown,
}

impl ClientErrorCode {
    /// Returns a default human-readable message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ClientErrorCode::MissingFields => "Email, payment reference and machine id are required",
            ClientErrorCode::InvalidField => "A field value is invalid",
            ClientErrorCode::VerificationFailed => "Payment reference could not be verified",
            ClientErrorCode::PaymentNotSuccessful => "Payment was not successful",
            ClientErrorCode::GatewayError => "Payment service is unavailable, try again shortly",
            ClientErrorCode::AlreadyActivatedOnAnotherPc => {
                "This license is already activated on another computer"
            }
            ClientErrorCode::BadToken => "Activation token is invalid or expired",
            ClientErrorCode::Mismatch => "Activation token does not match this license",
            ClientErrorCode::InvalidLicense => "License is not valid",
            ClientErrorCode::InternalError => "Internal server error",
            ClientErrorCode::Unknown => "Unknown error",
        }
    }
}

impl fmt::Display for ClientErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.default_message())
    }
}

/// Failure body as sent by the server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerErrorResponse {
    #[serde(default)]
    pub ok: bool,
    pub error: ClientErrorCode,
    #[serde(default)]
    pub message: Option<String>,
}

/// A non-2xx answer from the activation server.
#[derive(Debug, Clone)]
pub struct ClientApiError {
    /// HTTP status the server answered with
    pub status: u16,
    /// Machine-readable error code
    pub code: ClientErrorCode,
    /// Human-readable error message from server
    pub message: String,
}

impl ClientApiError {
    pub fn new(status: u16, code: ClientErrorCode, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    /// Decode an error body, tolerating bodies that are not JSON at all
    /// (proxies and load balancers produce those).
    pub fn from_body(status: u16, body: &str) -> Self {
        match serde_json::from_str::<ServerErrorResponse>(body) {
            Ok(resp) => Self::from_response(status, resp),
            Err(_) => {
                let code = if status >= 500 {
                    ClientErrorCode::InternalError
                } else {
                    ClientErrorCode::Unknown
                };
                let snippet: String = body.trim().chars().take(200).collect();
                let message = if snippet.is_empty() {
                    format!("HTTP {status}")
                } else {
                    format!("HTTP {status}: {snippet}")
                };
                Self::new(status, code, message)
            }
        }
    }

    fn from_response(status: u16, resp: ServerErrorResponse) -> Self {
        let message = resp
            .message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| resp.error.default_message().to_string());
        Self::new(status, resp.error, message)
    }

    /// 401/403 answers mean the server no longer honours the stored activation.
    pub fn is_rejection(&self) -> bool {
        self.status == 401 || self.status == 403
    }
}

impl fmt::Display for ClientApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ClientApiError {}
