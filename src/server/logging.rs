//! Request logging and license audit events.
//!
//! Every request runs inside a `request` span carrying a request id. The id
//! is taken from an incoming `X-Request-Id` header when it looks sane,
//! otherwise generated, and echoed back on the response.

use axum::{
    body::Body,
    extract::Request,
    http::{HeaderValue, Response},
    middleware::Next,
};
use std::time::Instant;
use tracing::{info, info_span, warn, Instrument};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Header name for the request ID.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

const MAX_REQUEST_ID_LEN: usize = 64;

/// Audit events emitted by the activation endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LicenseEvent {
    /// A license row was recorded for a payment
    Created,
    /// Activation returned a token
    Activated,
    /// An unbound license was bound to a machine
    Bound,
    /// Activation refused because the license is bound elsewhere
    Conflict,
    /// Check succeeded
    Checked,
    /// Check refused
    CheckFailed,
    /// Deactivation requested
    Deactivated,
    /// Gateway webhook processed
    Webhook,
}

impl std::fmt::Display for LicenseEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LicenseEvent::Created => "created",
            LicenseEvent::Activated => "activated",
            LicenseEvent::Bound => "bound",
            LicenseEvent::Conflict => "conflict",
            LicenseEvent::Checked => "checked",
            LicenseEvent::CheckFailed => "check_failed",
            LicenseEvent::Deactivated => "deactivated",
            LicenseEvent::Webhook => "webhook",
        };
        write!(f, "{}", s)
    }
}

/// Shorten a license key for logs.
pub fn mask_key(license_key: &str) -> String {
    match license_key.char_indices().nth(8) {
        Some((idx, _)) => format!("{}…", &license_key[..idx]),
        None => license_key.to_string(),
    }
}

/// Log a license audit event.
///
/// `subject` is the license key or, before one exists, the payment reference.
pub fn log_license_event(event: LicenseEvent, subject: &str, details: Option<&str>) {
    let span = info_span!(
        "license_event",
        event = %event,
        subject = %mask_key(subject),
    );
    let _enter = span.enter();

    match (event, details) {
        (LicenseEvent::Conflict | LicenseEvent::CheckFailed, Some(d)) => {
            warn!(reason = %d, "License event occurred")
        }
        (LicenseEvent::Conflict | LicenseEvent::CheckFailed, None) => {
            warn!("License event occurred")
        }
        (_, Some(d)) => info!(details = %d, "License event occurred"),
        (_, None) => info!("License event occurred"),
    }
}

/// Generate a new unique request ID.
pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

fn incoming_request_id(request: &Request) -> Option<String> {
    let value = request.headers().get(REQUEST_ID_HEADER)?.to_str().ok()?;
    let ok = !value.is_empty()
        && value.len() <= MAX_REQUEST_ID_LEN
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    ok.then(|| value.to_string())
}

/// Logs method, path, status and duration for each request and sets the
/// `X-Request-Id` response header.
pub async fn request_logging_middleware(request: Request, next: Next) -> Response<Body> {
    let request_id = incoming_request_id(&request).unwrap_or_else(generate_request_id);
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let span = info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        path = %path,
    );

    let start = Instant::now();
    let response = next.run(request).instrument(span.clone()).await;
    let status = response.status();

    let _enter = span.enter();
    if status.is_server_error() {
        warn!(
            status = %status.as_u16(),
            duration_ms = %start.elapsed().as_millis(),
            "Request failed"
        );
    } else {
        info!(
            status = %status.as_u16(),
            duration_ms = %start.elapsed().as_millis(),
            "Request completed"
        );
    }

    let (mut parts, body) = response.into_parts();
    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        parts.headers.insert(REQUEST_ID_HEADER, header_value);
    }
    Response::from_parts(parts, body)
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `level` applies to this crate and
/// `warn` to dependencies.
pub fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,gocbt_license={level},gocbt_license_server={level}"
        ))
    });
    // A second install (tests) is not an error worth surfacing.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_is_valid_uuid() {
        let id = generate_request_id();
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn incoming_request_id_is_sanitized() {
        let with = |v: &str| {
            axum::http::Request::builder()
                .header(REQUEST_ID_HEADER, v)
                .body(Body::empty())
                .unwrap()
        };
        assert_eq!(
            incoming_request_id(&with("abc-123_X")),
            Some("abc-123_X".to_string())
        );
        assert_eq!(incoming_request_id(&with("has space")), None);
        assert_eq!(incoming_request_id(&with(&"a".repeat(65))), None);

        let without = axum::http::Request::builder()
            .body(Body::empty())
            .unwrap();
        assert_eq!(incoming_request_id(&without), None);
    }

    #[test]
    fn keys_are_masked() {
        assert_eq!(mask_key("0123456789abcdef"), "01234567…");
        assert_eq!(mask_key("short"), "short");
    }

    #[test]
    fn event_names() {
        assert_eq!(LicenseEvent::CheckFailed.to_string(), "check_failed");
        assert_eq!(LicenseEvent::Webhook.to_string(), "webhook");
    }
}
