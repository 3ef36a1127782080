use chrono::Utc;
use log::{debug, info, warn};
use std::path::Path;
use tokio::sync::Mutex;

use crate::client::errors::{ClientApiError, ClientErrorCode};
use crate::client::responses::{
    ActivateRequestBody, ActivationResult, ActivationStatus, CheckResult, DeactivateResult,
    RequestMetadata, ServerActivateResponse, ServerCheckResponse, TokenRequestBody,
};
use crate::client::storage::{LocalState, LocalStore};
use crate::client::transport::{HttpReply, Transport};
use crate::config::ClientConfig;
use crate::errors::{LicenseError, LicenseResult};
use crate::hardware::get_machine_fingerprint;

pub const ACTIVATE_PATH: &str = "/api/license/activate";
pub const CHECK_PATH: &str = "/api/license/check";
pub const DEACTIVATE_PATH: &str = "/api/license/deactivate";

/// Activation client for one machine.
///
/// Holds the transport, the local state store and this machine's id. Only
/// one operation runs at a time; a call made while another is in flight
/// fails immediately with [`LicenseError::Busy`].
#[derive(Debug)]
pub struct LicenseClient {
    config: ClientConfig,
    transport: Transport,
    store: LocalStore,
    machine_id: String,
    in_flight: Mutex<()>,
}

impl LicenseClient {
    /// Client for the running machine, storing state beside the executable
    /// (or in `config.state_dir`).
    pub fn new(config: ClientConfig) -> LicenseResult<Self> {
        let store = LocalStore::beside_executable(config.state_dir.as_deref().map(Path::new));
        let machine_id = get_machine_fingerprint().id;
        Self::with_parts(config, store, machine_id)
    }

    /// Client with an explicit store and machine id.
    pub fn with_parts(
        config: ClientConfig,
        store: LocalStore,
        machine_id: impl Into<String>,
    ) -> LicenseResult<Self> {
        let machine_id = machine_id.into();
        if machine_id.trim().is_empty() {
            return Err(LicenseError::InvalidInput(
                "machine id cannot be empty".to_string(),
            ));
        }
        let transport = Transport::new(&config)?;
        Ok(Self {
            config,
            transport,
            store,
            machine_id,
            in_flight: Mutex::new(()),
        })
    }

    pub fn machine_id(&self) -> &str {
        &self.machine_id
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Where this machine stands, from local state alone.
    pub async fn status(&self) -> ActivationStatus {
        match self.store.load().await {
            None => ActivationStatus::Unactivated,
            Some(state) if state.owner_fingerprint() != self.machine_id => {
                ActivationStatus::MachineMismatch
            }
            Some(_) => ActivationStatus::Activated,
        }
    }

    /// Activate this machine against a payment reference.
    ///
    /// `machine_id` overrides the fingerprint for this call. Local state is
    /// written only after the server confirms; on any failure the previous
    /// state (if any) is left as it was.
    pub async fn activate(
        &self,
        reference: &str,
        email: &str,
        machine_id: Option<&str>,
    ) -> LicenseResult<ActivationResult> {
        let _guard = self.in_flight.try_lock().map_err(|_| LicenseError::Busy)?;

        let reference = reference.trim();
        let email = email.trim();
        let machine_id = machine_id.map(str::trim).unwrap_or(&self.machine_id);
        if reference.is_empty() {
            return Err(LicenseError::InvalidInput(
                "payment reference is required".to_string(),
            ));
        }
        if email.is_empty() {
            return Err(LicenseError::InvalidInput("email is required".to_string()));
        }
        if machine_id.is_empty() {
            return Err(LicenseError::InvalidInput(
                "machine id is required".to_string(),
            ));
        }

        let previous = self.store.load().await;
        let body = ActivateRequestBody {
            email,
            reference,
            machine_id,
            license_key: previous.as_ref().map(|s| s.license_key.as_str()),
            metadata: RequestMetadata::current(),
        };

        self.transport.prewarm().await;
        info!("activating reference {reference} for {email}");
        let reply = self.transport.post_json(ACTIVATE_PATH, &body).await?;
        if !reply.is_success() {
            return Err(self.rejection(ACTIVATE_PATH, &reply).await);
        }

        let parsed: ServerActivateResponse = serde_json::from_str(&reply.body).map_err(|e| {
            LicenseError::ServerError(format!("unreadable activation response: {e}"))
        })?;
        let (license_key, activation_token) =
            match (parsed.ok, parsed.license_key, parsed.activation_token) {
                (true, Some(key), Some(token)) if !key.is_empty() && !token.is_empty() => {
                    (key, token)
                }
                _ => {
                    return Err(LicenseError::ServerError(
                        "activation response is missing the license key or token".to_string(),
                    ))
                }
            };

        let state = LocalState {
            license_key,
            activation_token,
            machine_id: machine_id.to_string(),
            fingerprint: Some(self.machine_id.clone()),
            licensed_to: Some(email.to_string()),
            activated_at: Some(Utc::now().to_rfc3339()),
            product: parsed.product,
        };
        self.store.save(&state).await?;
        info!("activation saved to {}", self.store.path().display());

        Ok(ActivationResult::from(&state))
    }

    /// Is this machine entitled to run?
    ///
    /// Cached state is trusted when `offline_ok` is set and online
    /// revalidation is off. Otherwise the server is asked; when it cannot be
    /// reached, answers 5xx or sends an unreadable body (a captive portal
    /// page, say) the cached state is accepted if `offline_ok`.
    /// A 401/403 answer means the server disowned the activation and the
    /// local state is cleared.
    pub async fn check(&self) -> LicenseResult<CheckResult> {
        let _guard = self.in_flight.try_lock().map_err(|_| LicenseError::Busy)?;

        let state = self.store.load().await.ok_or(LicenseError::NotActivated)?;
        if state.owner_fingerprint() != self.machine_id {
            warn!("saved activation was made on a different machine");
            return Err(LicenseError::MachineMismatch);
        }

        if self.config.offline_ok && !self.config.revalidate_online {
            debug!("accepting cached activation without contacting the server");
            return Ok(offline_result(&state, None));
        }

        let body = TokenRequestBody {
            license_key: &state.license_key,
            machine_id: &state.machine_id,
            activation_token: &state.activation_token,
        };

        let error = match self.transport.post_json(CHECK_PATH, &body).await {
            Ok(reply) if reply.is_success() => {
                match serde_json::from_str::<ServerCheckResponse>(&reply.body) {
                    Ok(resp) if resp.ok => {
                        return Ok(CheckResult {
                            offline: false,
                            product: resp.product.or_else(|| state.product.clone()),
                            licensed_to: state.licensed_to.clone(),
                            warning: None,
                        })
                    }
                    _ => LicenseError::ServerError("unreadable check response".to_string()),
                }
            }
            Ok(reply) => self.rejection(CHECK_PATH, &reply).await,
            Err(e) => e,
        };

        match error {
            LicenseError::Rejected(api) if api.is_rejection() => {
                warn!("server rejected the saved activation: {}", api.message);
                self.store.clear().await?;
                Err(LicenseError::Rejected(api))
            }
            e if e.is_availability_failure() && self.config.offline_ok => {
                warn!("license server unavailable, using cached activation: {e}");
                Ok(offline_result(&state, Some(e.to_string())))
            }
            e => Err(e),
        }
    }

    /// Release this machine. The server is told on a best-effort basis;
    /// local state is removed regardless.
    pub async fn deactivate(&self) -> LicenseResult<DeactivateResult> {
        let _guard = self.in_flight.try_lock().map_err(|_| LicenseError::Busy)?;

        let mut server_acknowledged = false;
        if let Some(state) = self.store.load().await {
            let body = TokenRequestBody {
                license_key: &state.license_key,
                machine_id: &state.machine_id,
                activation_token: &state.activation_token,
            };
            match self.transport.post_json(DEACTIVATE_PATH, &body).await {
                Ok(reply) if reply.is_success() => server_acknowledged = true,
                Ok(reply) => warn!(
                    "deactivate answered HTTP {}: {}",
                    reply.status,
                    ClientApiError::from_body(reply.status, &reply.body)
                ),
                Err(e) => warn!("deactivate request failed: {e}"),
            }
        }

        self.store.clear().await?;
        info!("local activation cleared");
        Ok(DeactivateResult {
            server_acknowledged,
        })
    }

    /// Wipe local state without contacting the server.
    pub async fn clear(&self) -> LicenseResult<()> {
        let _guard = self.in_flight.try_lock().map_err(|_| LicenseError::Busy)?;
        self.store.clear().await
    }

    /// Turn a non-2xx reply into an error; 404 gets health diagnostics.
    async fn rejection(&self, path: &str, reply: &HttpReply) -> LicenseError {
        if reply.status == 404 {
            let url = self.transport.url(path);
            let (ok, info) = self.transport.health_info().await;
            return LicenseError::Rejected(ClientApiError::new(
                404,
                ClientErrorCode::Unknown,
                format!("{url} returned 404. healthz ok={ok} info={info}"),
            ));
        }
        LicenseError::Rejected(ClientApiError::from_body(reply.status, &reply.body))
    }
}

fn offline_result(state: &LocalState, warning: Option<String>) -> CheckResult {
    CheckResult {
        offline: true,
        product: state.product.clone(),
        licensed_to: state.licensed_to.clone(),
        warning,
    }
}
