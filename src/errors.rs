//! Crate-wide error type.
//!
//! Every client operation returns `LicenseResult<T>`; nothing thrown by the
//! transport or the filesystem crosses the library boundary in any other shape.
//! `LicenseError::kind()` gives the presentation layer a stable category to
//! branch on without inspecting transport internals.

use std::fmt;

use thiserror::Error;

use crate::client::errors::{ClientApiError, ClientErrorCode};

/// Result alias used across the crate.
pub type LicenseResult<T> = Result<T, LicenseError>;

/// Transport failure categories surfaced to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Connect or read deadline elapsed.
    Timeout,
    /// TLS handshake or certificate validation failed.
    Certificate,
    /// A configured proxy refused or failed the connection.
    Proxy,
    /// TCP connection could not be established.
    Connection,
    /// Anything else reqwest reports (body decoding, redirects, ...).
    Other,
}

impl TransportErrorKind {
    /// Short actionable guidance shown after the error message.
    pub fn guidance(&self) -> &'static str {
        match self {
            TransportErrorKind::Timeout => {
                "The license server took too long to respond. Check network/AV/firewall and try again."
            }
            TransportErrorKind::Certificate => {
                "Secure connection failed. If you are behind a corporate proxy, set GOCBT_CA_BUNDLE to your CA file."
            }
            TransportErrorKind::Proxy => {
                "Proxy error. Check the HTTPS_PROXY/HTTP_PROXY environment variables."
            }
            TransportErrorKind::Connection => {
                "Could not reach the license server. Check your internet connection."
            }
            TransportErrorKind::Other => "Unexpected network error.",
        }
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Certificate => "certificate",
            TransportErrorKind::Proxy => "proxy",
            TransportErrorKind::Connection => "connection",
            TransportErrorKind::Other => "other",
        };
        write!(f, "{}", s)
    }
}

/// Coarse failure taxonomy for callers that only need to pick a UI path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    InputValidation,
    NotActivated,
    MachineMismatch,
    PaymentVerification,
    DeviceConflict,
    TokenIntegrity,
    Transport(TransportErrorKind),
    Server,
    Storage,
    Busy,
    Config,
}

#[derive(Debug, Error)]
pub enum LicenseError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("This computer is not activated.")]
    NotActivated,

    #[error("The saved activation belongs to a different machine fingerprint.")]
    MachineMismatch,

    #[error("Another license operation is already in progress.")]
    Busy,

    #[error("{message} {}", kind.guidance())]
    Transport {
        kind: TransportErrorKind,
        message: String,
    },

    #[error("{0}")]
    Rejected(ClientApiError),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Storage error: {0}")]
    StorageError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl LicenseError {
    /// Build a transport error of the given kind.
    pub fn transport(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        LicenseError::Transport {
            kind,
            message: message.into(),
        }
    }

    /// Category used by the presentation layer.
    pub fn kind(&self) -> FailureKind {
        match self {
            LicenseError::InvalidInput(_) => FailureKind::InputValidation,
            LicenseError::NotActivated => FailureKind::NotActivated,
            LicenseError::MachineMismatch => FailureKind::MachineMismatch,
            LicenseError::Busy => FailureKind::Busy,
            LicenseError::Transport { kind, .. } => FailureKind::Transport(*kind),
            LicenseError::Rejected(e) => match e.code {
                ClientErrorCode::MissingFields | ClientErrorCode::InvalidField => {
                    FailureKind::InputValidation
                }
                ClientErrorCode::VerificationFailed | ClientErrorCode::PaymentNotSuccessful => {
                    FailureKind::PaymentVerification
                }
                ClientErrorCode::AlreadyActivatedOnAnotherPc => FailureKind::DeviceConflict,
                ClientErrorCode::BadToken
                | ClientErrorCode::Mismatch
                | ClientErrorCode::InvalidLicense => FailureKind::TokenIntegrity,
                ClientErrorCode::GatewayError
                | ClientErrorCode::InternalError
                | ClientErrorCode::Unknown => FailureKind::Server,
            },
            LicenseError::ServerError(_) => FailureKind::Server,
            LicenseError::StorageError(_) => FailureKind::Storage,
            LicenseError::ConfigError(_) => FailureKind::Config,
        }
    }

    /// True for failures the offline policy may paper over with cached state.
    pub fn is_availability_failure(&self) -> bool {
        match self {
            LicenseError::Transport { .. } => true,
            LicenseError::Rejected(e) => e.status >= 500,
            LicenseError::ServerError(_) => true,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for LicenseError {
    fn from(err: reqwest::Error) -> Self {
        crate::client::transport::normalize_transport_error(&err)
    }
}
