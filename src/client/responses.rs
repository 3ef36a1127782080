//! Response and result types for the license client.
//!
//! The `Server*` types mirror the JSON the activation server returns; the
//! remaining types are what [`crate::client::license::LicenseClient`] hands
//! back to the caller.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::client::storage::LocalState;

/// Where the client stands with respect to activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationStatus {
    /// No usable local state.
    Unactivated,
    /// Local state exists and belongs to this machine.
    Activated,
    /// Local state exists but was written for another machine fingerprint.
    MachineMismatch,
}

impl fmt::Display for ActivationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActivationStatus::Unactivated => "unactivated",
            ActivationStatus::Activated => "activated",
            ActivationStatus::MachineMismatch => "machine_mismatch",
        };
        write!(f, "{}", s)
    }
}

/// Result of a successful activation.
#[derive(Debug, Clone, Serialize)]
pub struct ActivationResult {
    pub license_key: String,
    pub activation_token: String,
    pub machine_id: String,
    /// Product SKU the server bound the license to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
}

impl From<&LocalState> for ActivationResult {
    fn from(state: &LocalState) -> Self {
        Self {
            license_key: state.license_key.clone(),
            activation_token: state.activation_token.clone(),
            machine_id: state.machine_id.clone(),
            product: state.product.clone(),
        }
    }
}

/// Result of a successful entitlement check.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    /// True when the answer came from cached state rather than the server.
    pub offline: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub licensed_to: Option<String>,
    /// Why the server was not consulted, when `offline` is true.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Result of a deactivation. Local state is always gone afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct DeactivateResult {
    /// Whether the server answered the deactivation call successfully.
    pub server_acknowledged: bool,
}

// === Request bodies ===

/// Client details attached to activation requests for support diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RequestMetadata {
    pub client_version: String,
    pub os: String,
    pub arch: String,
}

impl RequestMetadata {
    pub fn current() -> Self {
        Self {
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ActivateRequestBody<'a> {
    pub email: &'a str,
    pub reference: &'a str,
    pub machine_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_key: Option<&'a str>,
    pub metadata: RequestMetadata,
}

/// Body for both `/check` and `/deactivate`.
#[derive(Debug, Serialize)]
pub(crate) struct TokenRequestBody<'a> {
    pub license_key: &'a str,
    pub machine_id: &'a str,
    pub activation_token: &'a str,
}

// === Server Response Parsing ===

#[derive(Debug, Deserialize)]
pub(crate) struct ServerActivateResponse {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub license_key: Option<String>,
    #[serde(default)]
    pub activation_token: Option<String>,
    #[serde(default)]
    pub product: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ServerCheckResponse {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub product: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ServerHealthResponse {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub version: Option<String>,
}
