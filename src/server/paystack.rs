//! Payment gateway (Paystack) verification.
//!
//! `verify_transaction` asks the gateway whether a payment reference was paid.
//! The three gateway answers the activation flow cares about are modelled by
//! [`PaymentVerification`]; everything else (unreachable host, non-JSON body,
//! 5xx) is a transport error and surfaces as `gateway_error`.

use reqwest::{Client, Url};
use ring::hmac;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::client::transport::normalize_transport_error;
use crate::config::ServerConfig;
use crate::errors::{LicenseError, LicenseResult, TransportErrorKind};

/// Header carrying the webhook HMAC.
pub const SIGNATURE_HEADER: &str = "x-paystack-signature";

const GATEWAY_TIMEOUT: Duration = Duration::from_secs(20);

/// Outcome of a verification the gateway actually answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentVerification {
    /// Paid. `email` is the customer email the gateway recorded, if any.
    Successful { email: Option<String> },
    /// The gateway knows the transaction but it is not paid (abandoned, failed, ...).
    NotSuccessful { status: String },
    /// The gateway refused the lookup (`status: false`), e.g. unknown reference.
    Rejected { message: String },
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    #[serde(default)]
    status: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<TransactionData>,
}

#[derive(Debug, Deserialize)]
struct TransactionData {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    customer: Option<Customer>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Customer {
    #[serde(default)]
    pub email: Option<String>,
}

/// A webhook delivery. Only the fields used for license creation are read.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    #[serde(default)]
    pub data: Option<WebhookData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookData {
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub customer: Option<Customer>,
}

#[derive(Debug, Clone)]
pub struct PaystackClient {
    http: Client,
    api_base: String,
    secret_key: String,
}

impl PaystackClient {
    pub fn new(config: &ServerConfig) -> LicenseResult<Self> {
        let http = Client::builder()
            .timeout(GATEWAY_TIMEOUT)
            .user_agent(format!("gocbt-license-server/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| LicenseError::ConfigError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            api_base: config.paystack_api_base.trim_end_matches('/').to_string(),
            secret_key: config.paystack_secret_key.clone(),
        })
    }

    fn verify_url(&self, reference: &str) -> LicenseResult<Url> {
        let mut url = Url::parse(&self.api_base).map_err(|e| {
            LicenseError::ConfigError(format!("invalid gateway base {}: {e}", self.api_base))
        })?;
        url.path_segments_mut()
            .map_err(|_| {
                LicenseError::ConfigError(format!("invalid gateway base {}", self.api_base))
            })?
            .pop_if_empty()
            .push("transaction")
            .push("verify")
            .push(reference);
        Ok(url)
    }

    /// Ask the gateway about `reference`.
    pub async fn verify_transaction(&self, reference: &str) -> LicenseResult<PaymentVerification> {
        let url = self.verify_url(reference)?;
        debug!(reference = %reference, "verifying transaction with gateway");

        let resp = self
            .http
            .get(url)
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| {
                warn!(reference = %reference, "gateway request failed: {e}");
                normalize_transport_error(&e)
            })?;

        let status = resp.status();
        if status.is_server_error() {
            warn!(reference = %reference, status = %status, "gateway server error");
            return Err(LicenseError::transport(
                TransportErrorKind::Other,
                format!("payment gateway answered HTTP {status}"),
            ));
        }

        let body = resp.text().await?;
        let parsed: VerifyResponse = serde_json::from_str(&body).map_err(|e| {
            warn!(reference = %reference, status = %status, "unreadable gateway response: {e}");
            LicenseError::transport(
                TransportErrorKind::Other,
                "payment gateway returned an unreadable response",
            )
        })?;

        Ok(classify(parsed))
    }
}

fn classify(resp: VerifyResponse) -> PaymentVerification {
    if !resp.status {
        return PaymentVerification::Rejected {
            message: resp
                .message
                .unwrap_or_else(|| "verification failed".to_string()),
        };
    }
    let data = resp.data.unwrap_or(TransactionData {
        status: None,
        customer: None,
    });
    match data.status.as_deref() {
        Some("success") => PaymentVerification::Successful {
            email: data.customer.and_then(|c| c.email),
        },
        other => PaymentVerification::NotSuccessful {
            status: other.unwrap_or("unknown").to_string(),
        },
    }
}

/// Check a webhook's `x-paystack-signature`: hex HMAC-SHA512 of the raw body
/// keyed with the gateway secret. Comparison is constant-time.
pub fn verify_webhook_signature(secret: &str, body: &[u8], header: &str) -> bool {
    let header = header.trim();
    if secret.is_empty() || header.is_empty() {
        return false;
    }
    let Ok(expected) = hex::decode(header) else {
        return false;
    };
    let key = hmac::Key::new(hmac::HMAC_SHA512, secret.as_bytes());
    hmac::verify(&key, body, &expected).is_ok()
}

/// Produce the signature the gateway would send for `body`.
pub fn sign_webhook_body(secret: &str, body: &[u8]) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA512, secret.as_bytes());
    hex::encode(hmac::sign(&key, body).as_ref())
}
