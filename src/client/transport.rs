//! HTTP transport to the activation service.
//!
//! One `reqwest::Client` is built per [`Transport`] with explicit connect and
//! read timeouts. Requests are retried on connection errors, timeouts and
//! the statuses in [`RETRY_STATUSES`], sleeping `backoff_factor * 2^(n-1)`
//! seconds before retry `n`. Both GET and POST are retried; every payload the
//! client sends is idempotent on the server.
//!
//! TLS trust is chosen in this order:
//! 1. `insecure_ssl` disables validation (logged loudly)
//! 2. `ca_bundle`, when the file exists, replaces the built-in roots
//! 3. `cacert.pem` shipped beside the executable replaces the built-in roots
//! 4. The built-in webpki roots

use reqwest::{Certificate, Client, StatusCode};
use serde::Serialize;
use std::error::Error as StdError;
use std::path::PathBuf;
use std::time::Duration;

use crate::client::responses::ServerHealthResponse;
use crate::config::ClientConfig;
use crate::errors::{LicenseError, LicenseResult, TransportErrorKind};

/// Statuses treated as transient.
pub const RETRY_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Upper bound on a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

const PREWARM_TIMEOUT: Duration = Duration::from_secs(5);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Bundle file looked up beside the executable.
const BUNDLED_CA_FILE: &str = "cacert.pem";

/// Status and raw body of a completed HTTP exchange.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone)]
pub struct Transport {
    client: Client,
    base_url: String,
    retries: u32,
    backoff_factor: f64,
}

impl Transport {
    pub fn new(config: &ClientConfig) -> LicenseResult<Self> {
        config.validate()?;
        let mut builder = Client::builder()
            .connect_timeout(timeout_from_secs("connect_timeout_secs", config.connect_timeout_secs)?)
            .read_timeout(timeout_from_secs("read_timeout_secs", config.read_timeout_secs)?)
            .user_agent(format!("gocbt-license/{}", env!("CARGO_PKG_VERSION")));

        if config.insecure_ssl {
            log::warn!("TLS certificate validation is DISABLED (GOCBT_INSECURE_SSL)");
            builder = builder.danger_accept_invalid_certs(true);
        } else if let Some(bundle) = trust_bundle(config.ca_bundle.as_deref()) {
            log::debug!("using CA bundle {}", bundle.display());
            let pem = std::fs::read(&bundle).map_err(|e| {
                LicenseError::ConfigError(format!(
                    "could not read CA bundle {}: {e}",
                    bundle.display()
                ))
            })?;
            let certs = Certificate::from_pem_bundle(&pem).map_err(|e| {
                LicenseError::ConfigError(format!(
                    "invalid CA bundle {}: {e}",
                    bundle.display()
                ))
            })?;
            builder = builder.tls_built_in_root_certs(false);
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }

        let client = builder
            .build()
            .map_err(|e| LicenseError::ConfigError(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.server_url.trim_end_matches('/').to_string(),
            retries: config.retries,
            backoff_factor: config.backoff_factor,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// POST a JSON body with retries.
    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> LicenseResult<HttpReply> {
        let url = self.url(path);
        self.send_with_retry(|| self.client.post(&url).json(body))
            .await
    }

    /// GET with retries.
    pub async fn get(&self, path: &str) -> LicenseResult<HttpReply> {
        let url = self.url(path);
        self.send_with_retry(|| self.client.get(&url)).await
    }

    async fn send_with_retry<F>(&self, build: F) -> LicenseResult<HttpReply>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut attempt: u32 = 0;
        loop {
            let can_retry = attempt < self.retries;
            match build().send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if can_retry && is_retry_status(status) {
                        attempt += 1;
                        log::debug!("HTTP {status}, retry {attempt}/{}", self.retries);
                        tokio::time::sleep(backoff_delay(self.backoff_factor, attempt)).await;
                        continue;
                    }
                    let body = resp.text().await?;
                    return Ok(HttpReply {
                        status: status.as_u16(),
                        body,
                    });
                }
                Err(e) if can_retry && is_transient(&e) => {
                    attempt += 1;
                    log::debug!("{e}, retry {attempt}/{}", self.retries);
                    tokio::time::sleep(backoff_delay(self.backoff_factor, attempt)).await;
                }
                Err(e) => return Err(normalize_transport_error(&e)),
            }
        }
    }

    /// Wake a sleeping host before the real call. Errors are ignored.
    pub async fn prewarm(&self) {
        let url = self.url("/healthz");
        match self
            .client
            .get(&url)
            .timeout(PREWARM_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) => log::debug!("prewarm {url}: HTTP {}", resp.status()),
            Err(e) => log::debug!("prewarm {url} failed: {e}"),
        }
    }

    /// Probe `/healthz` once; `(ok, info)` for diagnostics.
    pub async fn health_info(&self) -> (bool, String) {
        let url = self.url("/healthz");
        match self
            .client
            .get(&url)
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) => {
                let status = resp.status();
                let parsed = resp.json::<ServerHealthResponse>().await.ok();
                let ok = status.is_success() && parsed.as_ref().map(|h| h.ok).unwrap_or(false);
                let info = match parsed.and_then(|h| h.version) {
                    Some(v) => format!("{} version={v}", status.as_u16()),
                    None => status.as_u16().to_string(),
                };
                (ok, info)
            }
            Err(e) => (false, normalize_transport_error(&e).to_string()),
        }
    }
}

fn timeout_from_secs(name: &str, secs: f64) -> LicenseResult<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|e| LicenseError::ConfigError(format!("invalid {name} {secs}: {e}")))
}

/// Sleep before retry `n` (1-based).
pub fn backoff_delay(factor: f64, retry: u32) -> Duration {
    if retry == 0 || factor.is_nan() || factor <= 0.0 {
        return Duration::ZERO;
    }
    let exp = 2f64.powi(retry.saturating_sub(1).min(16) as i32);
    let secs = factor * exp;
    if secs >= MAX_BACKOFF.as_secs_f64() {
        MAX_BACKOFF
    } else {
        Duration::from_secs_f64(secs)
    }
}

fn is_retry_status(status: StatusCode) -> bool {
    RETRY_STATUSES.contains(&status.as_u16())
}

fn is_transient(err: &reqwest::Error) -> bool {
    if err.is_timeout() {
        return true;
    }
    if err.is_connect() {
        // A broken certificate chain will not fix itself.
        return !matches!(classify(err), TransportErrorKind::Certificate);
    }
    err.is_request()
}

fn trust_bundle(custom: Option<&str>) -> Option<PathBuf> {
    if let Some(path) = custom {
        let path = PathBuf::from(path);
        if path.is_file() {
            return Some(path);
        }
        log::warn!("CA bundle {} does not exist, ignoring", path.display());
    }
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(BUNDLED_CA_FILE)))
        .filter(|p| p.is_file())
}

fn error_chain_text(err: &reqwest::Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        text.push_str(": ");
        text.push_str(&inner.to_string());
        source = inner.source();
    }
    text.to_lowercase()
}

fn classify(err: &reqwest::Error) -> TransportErrorKind {
    if err.is_timeout() {
        return TransportErrorKind::Timeout;
    }
    let chain = error_chain_text(err);
    if chain.contains("certificate") || chain.contains("tls") || chain.contains("handshake") {
        TransportErrorKind::Certificate
    } else if chain.contains("proxy") {
        TransportErrorKind::Proxy
    } else if err.is_connect() {
        TransportErrorKind::Connection
    } else {
        TransportErrorKind::Other
    }
}

/// Map a reqwest failure onto the crate's transport taxonomy.
pub fn normalize_transport_error(err: &reqwest::Error) -> LicenseError {
    let kind = classify(err);
    let target = err
        .url()
        .map(|u| format!(" ({})", u.as_str()))
        .unwrap_or_default();
    let message = match kind {
        TransportErrorKind::Timeout => format!("Request to the license server timed out{target}."),
        TransportErrorKind::Certificate => format!("TLS error{target}: {err}."),
        TransportErrorKind::Proxy => format!("Proxy error{target}: {err}."),
        TransportErrorKind::Connection => format!("Connection error{target}."),
        TransportErrorKind::Other => format!("Network error{target}: {err}."),
    };
    LicenseError::transport(kind, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(0.8, 0), Duration::ZERO);
        assert_eq!(backoff_delay(0.8, 1), Duration::from_secs_f64(0.8));
        assert_eq!(backoff_delay(0.8, 2), Duration::from_secs_f64(1.6));
        assert_eq!(backoff_delay(0.8, 3), Duration::from_secs_f64(3.2));
        assert_eq!(backoff_delay(0.8, 10), MAX_BACKOFF);
        assert_eq!(backoff_delay(0.0, 3), Duration::ZERO);
    }

    #[test]
    fn backoff_tolerates_odd_factors() {
        assert_eq!(backoff_delay(f64::NAN, 1), Duration::ZERO);
        assert_eq!(backoff_delay(-1.0, 2), Duration::ZERO);
        assert_eq!(backoff_delay(f64::INFINITY, 1), MAX_BACKOFF);
    }

    #[test]
    fn non_finite_timeouts_are_config_errors() {
        let config = ClientConfig {
            read_timeout_secs: f64::NAN,
            ..ClientConfig::for_server("http://127.0.0.1:1")
        };
        assert!(matches!(
            Transport::new(&config),
            Err(LicenseError::ConfigError(_))
        ));

        let config = ClientConfig {
            connect_timeout_secs: 1e300,
            ..ClientConfig::for_server("http://127.0.0.1:1")
        };
        assert!(matches!(
            Transport::new(&config),
            Err(LicenseError::ConfigError(_))
        ));
    }

    #[test]
    fn url_joins_cleanly() {
        let transport = Transport::new(&ClientConfig::for_server("http://127.0.0.1:1/")).unwrap();
        assert_eq!(transport.base_url(), "http://127.0.0.1:1");
        assert_eq!(transport.url("/healthz"), "http://127.0.0.1:1/healthz");
        assert_eq!(
            transport.url("api/license/check"),
            "http://127.0.0.1:1/api/license/check"
        );
    }

    #[test]
    fn missing_ca_bundle_is_ignored() {
        let config = ClientConfig {
            ca_bundle: Some("/definitely/not/here.pem".to_string()),
            ..ClientConfig::for_server("https://example.invalid")
        };
        assert!(Transport::new(&config).is_ok());
    }

    #[tokio::test]
    async fn refused_connection_is_classified() {
        // Grab a free port, then close it so nothing is listening.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = ClientConfig {
            retries: 1,
            backoff_factor: 0.0,
            ..ClientConfig::for_server(format!("http://{addr}"))
        };
        let transport = Transport::new(&config).unwrap();
        let err = transport.get("/healthz").await.unwrap_err();
        match err {
            LicenseError::Transport { kind, .. } => {
                assert_eq!(kind, TransportErrorKind::Connection)
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // Pre-warm swallows the same failure.
        transport.prewarm().await;
        let (ok, info) = transport.health_info().await;
        assert!(!ok);
        assert!(!info.is_empty());
    }
}
