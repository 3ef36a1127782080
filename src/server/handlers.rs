use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::errors::LicenseResult;
use crate::server::api_error::{ApiError, ErrorCode};
use crate::server::database::{Database, License, NewLicense};
use crate::server::logging::{log_license_event, LicenseEvent};
use crate::server::paystack::{
    verify_webhook_signature, PaymentVerification, PaystackClient, WebhookEvent, SIGNATURE_HEADER,
};
use crate::server::signer::{derive_license_key, token_payload, TokenSigner};
use crate::server::validation::{
    missing_fields, trimmed, validate_length, validate_machine_id, validate_printable,
    MAX_EMAIL_LEN, MAX_LICENSE_KEY_LEN, MAX_REFERENCE_LEN, MAX_TOKEN_LEN,
};

/// Shared application state for handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub signer: TokenSigner,
    pub paystack: PaystackClient,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(db: Arc<Database>, config: ServerConfig) -> LicenseResult<Self> {
        Ok(Self {
            signer: TokenSigner::new(&config.app_secret, config.token_max_age_secs),
            paystack: PaystackClient::new(&config)?,
            db,
            config: Arc::new(config),
        })
    }
}

// === Request / Response types ===

/// Body of `POST /api/license/activate`. Fields are optional so that absent
/// and blank values both produce `missing_fields`.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ActivateRequest {
    pub email: Option<String>,
    pub reference: Option<String>,
    pub machine_id: Option<String>,
    /// Key the client held before, if any. Informational.
    pub license_key: Option<String>,
    /// Client version / OS details. Informational.
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActivateResponse {
    pub ok: bool,
    pub license_key: String,
    pub activation_token: String,
    pub product: String,
}

/// Body of `POST /api/license/check` and `POST /api/license/deactivate`.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct TokenRequest {
    pub license_key: Option<String>,
    pub machine_id: Option<String>,
    pub activation_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckResponse {
    pub ok: bool,
    pub product: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeactivateResponse {
    pub ok: bool,
    /// Machine bindings are permanent; always false.
    pub released: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub product: String,
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IndexResponse {
    pub ok: bool,
    pub msg: String,
    pub product: String,
}

/// Unparseable bodies are treated like empty ones.
fn body_or_default<T: Default>(payload: Result<Json<T>, JsonRejection>) -> T {
    match payload {
        Ok(Json(body)) => body,
        Err(rejection) => {
            debug!("unreadable request body: {rejection}");
            T::default()
        }
    }
}

// === Activation ===

/// Activate a machine against a paid reference.
///
/// The first activation for a reference creates the license bound to the
/// requesting machine. Repeating it from the same machine returns the same
/// key. Any other machine is refused and the stored binding is left alone.
pub async fn activate_handler(
    State(state): State<AppState>,
    payload: Result<Json<ActivateRequest>, JsonRejection>,
) -> Result<Json<ActivateResponse>, ApiError> {
    let req = body_or_default(payload);

    let (Some(email), Some(reference), Some(machine_id)) = (
        trimmed(req.email.as_deref()),
        trimmed(req.reference.as_deref()),
        trimmed(req.machine_id.as_deref()),
    ) else {
        return Err(ApiError::missing_fields(&missing_fields(&[
            ("email", req.email.as_deref()),
            ("reference", req.reference.as_deref()),
            ("machine_id", req.machine_id.as_deref()),
        ])));
    };
    let email = email.to_lowercase();

    validate_length(&email, "email", MAX_EMAIL_LEN)?;
    validate_printable(&email, "email")?;
    validate_length(reference, "reference", MAX_REFERENCE_LEN)?;
    validate_printable(reference, "reference")?;
    validate_machine_id(machine_id, "machine_id")?;

    info!(reference = %reference, "activation requested");
    if let Some(previous) = trimmed(req.license_key.as_deref()) {
        debug!(reference = %reference, "client previously held key {previous}");
    }

    match state.paystack.verify_transaction(reference).await? {
        PaymentVerification::Successful { email: paid_by } => {
            if let Some(paid_by) = paid_by {
                if !paid_by.trim().eq_ignore_ascii_case(&email) {
                    warn!(reference = %reference, "activation email differs from payer email");
                }
            }
        }
        PaymentVerification::NotSuccessful { status } => {
            info!(reference = %reference, status = %status, "payment not successful");
            return Err(ApiError::with_message(
                ErrorCode::PaymentNotSuccessful,
                format!("Payment status is '{status}'"),
            ));
        }
        PaymentVerification::Rejected { message } => {
            info!(reference = %reference, "gateway rejected verification: {message}");
            return Err(ApiError::new(ErrorCode::VerificationFailed));
        }
    }

    let license = match state.db.get_by_reference(reference).await? {
        Some(existing) => existing,
        None => create_license(&state, &email, reference, Some(machine_id)).await?,
    };

    if license.bound_elsewhere(machine_id) {
        return Err(second_machine_conflict(&license));
    }
    if !license.is_active() {
        log_license_event(
            LicenseEvent::CheckFailed,
            &license.license_key,
            Some(license.status.as_str()),
        );
        return Err(ApiError::new(ErrorCode::InvalidLicense));
    }

    let license = if license.machine_id.is_none() {
        if state.db.bind_machine_if_unbound(reference, machine_id).await? {
            log_license_event(LicenseEvent::Bound, &license.license_key, Some(machine_id));
        }
        let current = state
            .db
            .get_by_reference(reference)
            .await?
            .ok_or_else(ApiError::internal_error)?;
        // another machine won the bind
        if current.bound_elsewhere(machine_id) {
            return Err(second_machine_conflict(&current));
        }
        current
    } else {
        license
    };

    let activation_token = state
        .signer
        .sign(&token_payload(&license.license_key, machine_id));
    log_license_event(LicenseEvent::Activated, &license.license_key, None);

    Ok(Json(ActivateResponse {
        ok: true,
        license_key: license.license_key,
        activation_token,
        product: license.product_code,
    }))
}

/// Record a license for `reference`, or return the row a concurrent request
/// already stored.
async fn create_license(
    state: &AppState,
    email: &str,
    reference: &str,
    machine_id: Option<&str>,
) -> LicenseResult<License> {
    let product_code = state.config.product_code.as_str();
    let license_key = derive_license_key(email, reference, product_code, &state.config.app_secret);
    let (license, created) = state
        .db
        .insert_if_absent(&NewLicense {
            email,
            license_key: &license_key,
            product_code,
            paid_reference: reference,
            machine_id,
        })
        .await?;
    if created {
        log_license_event(LicenseEvent::Created, &license.license_key, machine_id);
    }
    Ok(license)
}

fn second_machine_conflict(license: &License) -> ApiError {
    log_license_event(
        LicenseEvent::Conflict,
        &license.license_key,
        Some("activation from a second machine"),
    );
    ApiError::new(ErrorCode::AlreadyActivatedOnAnotherPc)
}

// === Check / Deactivate ===

/// Validate a token request and return the license it refers to.
///
/// Shared by `/check` and `/deactivate`.
async fn verify_token_request(state: &AppState, req: &TokenRequest) -> Result<License, ApiError> {
    let (Some(license_key), Some(machine_id), Some(token)) = (
        trimmed(req.license_key.as_deref()),
        trimmed(req.machine_id.as_deref()),
        trimmed(req.activation_token.as_deref()),
    ) else {
        return Err(ApiError::missing_fields(&missing_fields(&[
            ("license_key", req.license_key.as_deref()),
            ("machine_id", req.machine_id.as_deref()),
            ("activation_token", req.activation_token.as_deref()),
        ])));
    };

    validate_length(license_key, "license_key", MAX_LICENSE_KEY_LEN)?;
    validate_machine_id(machine_id, "machine_id")?;
    validate_length(token, "activation_token", MAX_TOKEN_LEN)?;

    let payload = state.signer.unsign(token).map_err(|e| {
        log_license_event(
            LicenseEvent::CheckFailed,
            license_key,
            Some(e.to_string().as_str()),
        );
        ApiError::new(ErrorCode::BadToken)
    })?;

    let matches = payload
        .split_once('|')
        .is_some_and(|(key, machine)| key == license_key && machine == machine_id);
    if !matches {
        log_license_event(
            LicenseEvent::CheckFailed,
            license_key,
            Some("token does not match key and machine"),
        );
        return Err(ApiError::new(ErrorCode::Mismatch));
    }

    let license = match state.db.get_by_key(license_key).await? {
        Some(license) if license.is_active() => license,
        _ => {
            log_license_event(
                LicenseEvent::CheckFailed,
                license_key,
                Some("license missing or inactive"),
            );
            return Err(ApiError::new(ErrorCode::InvalidLicense));
        }
    };

    if license.machine_id.as_deref() != Some(machine_id) {
        log_license_event(
            LicenseEvent::CheckFailed,
            license_key,
            Some("license bound to another machine"),
        );
        return Err(ApiError::new(ErrorCode::AlreadyActivatedOnAnotherPc));
    }

    Ok(license)
}

/// Confirm that a token is still honoured for this machine.
pub async fn check_handler(
    State(state): State<AppState>,
    payload: Result<Json<TokenRequest>, JsonRejection>,
) -> Result<Json<CheckResponse>, ApiError> {
    let req = body_or_default(payload);
    let license = verify_token_request(&state, &req).await?;
    log_license_event(LicenseEvent::Checked, &license.license_key, None);

    Ok(Json(CheckResponse {
        ok: true,
        product: license.product_code,
    }))
}

/// Acknowledge a deactivation. The machine binding is kept.
pub async fn deactivate_handler(
    State(state): State<AppState>,
    payload: Result<Json<TokenRequest>, JsonRejection>,
) -> Result<Json<DeactivateResponse>, ApiError> {
    let req = body_or_default(payload);
    let license = verify_token_request(&state, &req).await?;
    log_license_event(
        LicenseEvent::Deactivated,
        &license.license_key,
        Some("binding retained"),
    );

    Ok(Json(DeactivateResponse {
        ok: true,
        released: false,
    }))
}

// === Webhook ===

/// Payment gateway webhook.
///
/// Only the signature decides the status code. A signed `charge.success`
/// records an unbound license for the reference; anything that goes wrong
/// after the signature check is logged and still answered 200.
pub async fn webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if !verify_webhook_signature(&state.config.paystack_secret_key, &body, signature) {
        warn!("webhook rejected: invalid signature");
        return (StatusCode::BAD_REQUEST, "invalid signature").into_response();
    }

    let event: WebhookEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!("signed webhook with unreadable body: {e}");
            return (StatusCode::OK, "ok").into_response();
        }
    };

    if event.event != "charge.success" {
        debug!(event = %event.event, "ignoring webhook event");
        return (StatusCode::OK, "ok").into_response();
    }

    let data = event.data.unwrap_or_default();
    let reference = trimmed(data.reference.as_deref());
    let email = trimmed(data.customer.as_ref().and_then(|c| c.email.as_deref()))
        .map(str::to_lowercase);
    let paid = data.status.as_deref().map_or(true, |s| s == "success");

    match (reference, email) {
        (Some(reference), Some(email)) if paid => {
            let valid = validate_length(reference, "reference", MAX_REFERENCE_LEN)
                .and_then(|_| validate_length(&email, "email", MAX_EMAIL_LEN));
            if let Err(e) = valid {
                warn!("webhook payload rejected: {e}");
            } else {
                match create_license(&state, &email, reference, None).await {
                    Ok(license) => log_license_event(
                        LicenseEvent::Webhook,
                        &license.license_key,
                        Some(event.event.as_str()),
                    ),
                    Err(e) => warn!(reference = %reference, "webhook license creation failed: {e}"),
                }
            }
        }
        _ => warn!("charge.success webhook without a usable reference and email"),
    }

    (StatusCode::OK, "ok").into_response()
}

// === Health ===

pub async fn healthz_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        product: state.config.product_code.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn index_handler(State(state): State<AppState>) -> Json<IndexResponse> {
    Json(IndexResponse {
        ok: true,
        msg: "GO CBT license server running".to_string(),
        product: state.config.product_code.clone(),
    })
}
