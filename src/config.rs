//! Configuration for the license client and the activation server.
//!
//! Both sides load with the same precedence:
//! 1. Environment variables (highest priority)
//! 2. An optional TOML file (`gocbt_client.toml` / `gocbt_server.toml`)
//! 3. Default values (lowest priority)
//!
//! The result is an explicit struct handed to whoever needs it; there is no
//! process-wide singleton.
//!
//! # Client environment variables
//! - `GOCBT_SERVER` - Base URL of the activation service
//! - `GOCBT_CONNECT_TIMEOUT` / `GOCBT_READ_TIMEOUT` - Timeouts in seconds
//! - `GOCBT_RETRIES` - Additional attempts on transient failures
//! - `GOCBT_BACKOFF` - Backoff factor in seconds
//! - `GOCBT_OFFLINE_OK` - Accept cached activation when the server is unreachable
//! - `GOCBT_REVALIDATE_ONLINE` - Always ask the server on `check()`
//! - `GOCBT_CA_BUNDLE` (or `SSL_CERT_FILE`) - PEM bundle replacing built-in roots
//! - `GOCBT_INSECURE_SSL` - Disable certificate validation (debug only)
//! - `GOCBT_STATE_DIR` - Directory holding `license_state.json`
//!
//! # Server environment variables
//! - `APP_SECRET`, `PAYSTACK_SECRET_KEY`, `PAYSTACK_API_BASE`
//! - `DATABASE_URL`, `PRODUCT_CODE`, `MAX_DEVICES`, `TOKEN_MAX_AGE_SECS`
//! - `HOST`, `PORT`, `LOG_LEVEL`

use config::Config;
use serde::Deserialize;
use std::env;

use crate::errors::{LicenseError, LicenseResult};

/// Default activation service.
pub const DEFAULT_SERVER_URL: &str = "https://go-cbt-license.onrender.com";

/// Default product SKU.
pub const DEFAULT_PRODUCT_CODE: &str = "gocbt-desktop";

/// Secret used when `APP_SECRET` is unset. Only fit for local development.
pub const DEV_APP_SECRET: &str = "dev-secret-change-me";

/// One year.
pub const DEFAULT_TOKEN_MAX_AGE_SECS: u64 = 365 * 24 * 60 * 60;

fn config_err(e: config::ConfigError) -> LicenseError {
    LicenseError::ConfigError(e.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse::<T>().ok())
}

/// Accepts the usual spellings of a boolean flag (`1`, `true`, `yes`, `on`).
fn env_flag(name: &str) -> Option<bool> {
    env::var(name)
        .ok()
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn env_non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

// ============================================================================
// Client
// ============================================================================

/// Settings for [`crate::client::license::LicenseClient`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the activation service (no trailing slash).
    pub server_url: String,
    /// TCP/TLS connect timeout in seconds.
    pub connect_timeout_secs: f64,
    /// Response read timeout in seconds. Generous because the hosted
    /// service may be cold-starting.
    pub read_timeout_secs: f64,
    /// Additional attempts after the first on transient failures.
    pub retries: u32,
    /// Sleep `backoff_factor * 2^(n-1)` seconds before retry `n`.
    pub backoff_factor: f64,
    /// Accept the cached activation when the server cannot be reached.
    pub offline_ok: bool,
    /// Ask the server on every `check()` even when cached state is usable.
    pub revalidate_online: bool,
    /// PEM bundle that replaces the built-in trust roots.
    pub ca_bundle: Option<String>,
    /// Skip certificate validation entirely.
    pub insecure_ssl: bool,
    /// Directory holding the state file; defaults to the executable's directory.
    pub state_dir: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            connect_timeout_secs: 10.0,
            read_timeout_secs: 60.0,
            retries: 4,
            backoff_factor: 0.8,
            offline_ok: true,
            revalidate_online: false,
            ca_bundle: None,
            insecure_ssl: false,
            state_dir: None,
        }
    }
}

impl ClientConfig {
    /// Load from `gocbt_client.toml` (optional) and `GOCBT_*` variables.
    pub fn load() -> LicenseResult<Self> {
        Self::load_from("gocbt_client")
    }

    /// Same as [`ClientConfig::load`] with an explicit file stem.
    pub fn load_from(file: &str) -> LicenseResult<Self> {
        let d = ClientConfig::default();
        let builder = Config::builder()
            .set_default("server_url", d.server_url)
            .map_err(config_err)?
            .set_default("connect_timeout_secs", d.connect_timeout_secs)
            .map_err(config_err)?
            .set_default("read_timeout_secs", d.read_timeout_secs)
            .map_err(config_err)?
            .set_default("retries", d.retries as i64)
            .map_err(config_err)?
            .set_default("backoff_factor", d.backoff_factor)
            .map_err(config_err)?
            .set_default("offline_ok", d.offline_ok)
            .map_err(config_err)?
            .set_default("revalidate_online", d.revalidate_online)
            .map_err(config_err)?
            .set_default("insecure_ssl", d.insecure_ssl)
            .map_err(config_err)?
            .add_source(config::File::with_name(file).required(false))
            .set_override_option("server_url", env_non_empty("GOCBT_SERVER"))
            .map_err(config_err)?
            .set_override_option(
                "connect_timeout_secs",
                env_parse::<f64>("GOCBT_CONNECT_TIMEOUT"),
            )
            .map_err(config_err)?
            .set_override_option("read_timeout_secs", env_parse::<f64>("GOCBT_READ_TIMEOUT"))
            .map_err(config_err)?
            .set_override_option("retries", env_parse::<i64>("GOCBT_RETRIES"))
            .map_err(config_err)?
            .set_override_option("backoff_factor", env_parse::<f64>("GOCBT_BACKOFF"))
            .map_err(config_err)?
            .set_override_option("offline_ok", env_flag("GOCBT_OFFLINE_OK"))
            .map_err(config_err)?
            .set_override_option("revalidate_online", env_flag("GOCBT_REVALIDATE_ONLINE"))
            .map_err(config_err)?
            .set_override_option(
                "ca_bundle",
                env_non_empty("GOCBT_CA_BUNDLE").or_else(|| env_non_empty("SSL_CERT_FILE")),
            )
            .map_err(config_err)?
            .set_override_option("insecure_ssl", env_flag("GOCBT_INSECURE_SSL"))
            .map_err(config_err)?
            .set_override_option("state_dir", env_non_empty("GOCBT_STATE_DIR"))
            .map_err(config_err)?;

        let settings = builder
            .build()
            .map_err(|e| LicenseError::ConfigError(format!("failed to build config: {e}")))?;

        let mut cfg: ClientConfig = settings.try_deserialize().map_err(|e| {
            LicenseError::ConfigError(format!("failed to deserialize config: {e}"))
        })?;
        cfg.server_url = cfg.server_url.trim().trim_end_matches('/').to_string();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Convenience for tests and embedders: defaults pointed at `server_url`.
    pub fn for_server(server_url: impl Into<String>) -> Self {
        let url: String = server_url.into();
        Self {
            server_url: url.trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> LicenseResult<()> {
        if !(self.server_url.starts_with("http://") || self.server_url.starts_with("https://")) {
            return Err(LicenseError::ConfigError(format!(
                "server_url must start with http:// or https://, got '{}'",
                self.server_url
            )));
        }
        for (name, secs) in [
            ("connect_timeout_secs", self.connect_timeout_secs),
            ("read_timeout_secs", self.read_timeout_secs),
        ] {
            if !secs.is_finite() || secs <= 0.0 {
                return Err(LicenseError::ConfigError(format!(
                    "{name} must be a finite number greater than 0, got {secs}"
                )));
            }
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 0.0 {
            return Err(LicenseError::ConfigError(format!(
                "backoff_factor must be a finite number of at least 0, got {}",
                self.backoff_factor
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Server
// ============================================================================

/// Settings for the activation server.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Secret used for license key derivation and token signing
    pub app_secret: String,
    /// Payment gateway secret key (bearer token and webhook HMAC key)
    pub paystack_secret_key: String,
    /// Payment gateway API base URL
    pub paystack_api_base: String,
    /// Registry connection URL
    pub database_url: String,
    /// Product SKU stamped on new licenses
    pub product_code: String,
    /// Devices per license. Only 1 is supported.
    pub max_devices: u32,
    /// Maximum activation token age in seconds
    pub token_max_age_secs: u64,
    /// Log level: trace, debug, info, warn, error
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            app_secret: DEV_APP_SECRET.to_string(),
            paystack_secret_key: String::new(),
            paystack_api_base: "https://api.paystack.co".to_string(),
            database_url: "sqlite://gocbt_license.db?mode=rwc".to_string(),
            product_code: DEFAULT_PRODUCT_CODE.to_string(),
            max_devices: 1,
            token_max_age_secs: DEFAULT_TOKEN_MAX_AGE_SECS,
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load from `gocbt_server.toml` (optional) and the environment.
    pub fn load() -> LicenseResult<Self> {
        Self::load_from("gocbt_server")
    }

    pub fn load_from(file: &str) -> LicenseResult<Self> {
        let d = ServerConfig::default();
        let builder = Config::builder()
            .set_default("host", d.host)
            .map_err(config_err)?
            .set_default("port", d.port as i64)
            .map_err(config_err)?
            .set_default("app_secret", d.app_secret)
            .map_err(config_err)?
            .set_default("paystack_secret_key", d.paystack_secret_key)
            .map_err(config_err)?
            .set_default("paystack_api_base", d.paystack_api_base)
            .map_err(config_err)?
            .set_default("database_url", d.database_url)
            .map_err(config_err)?
            .set_default("product_code", d.product_code)
            .map_err(config_err)?
            .set_default("max_devices", d.max_devices as i64)
            .map_err(config_err)?
            .set_default("token_max_age_secs", d.token_max_age_secs as i64)
            .map_err(config_err)?
            .set_default("log_level", d.log_level)
            .map_err(config_err)?
            .add_source(config::File::with_name(file).required(false))
            .set_override_option("host", env_non_empty("HOST"))
            .map_err(config_err)?
            .set_override_option("port", env_parse::<i64>("PORT"))
            .map_err(config_err)?
            .set_override_option("app_secret", env_non_empty("APP_SECRET"))
            .map_err(config_err)?
            .set_override_option("paystack_secret_key", env_non_empty("PAYSTACK_SECRET_KEY"))
            .map_err(config_err)?
            .set_override_option("paystack_api_base", env_non_empty("PAYSTACK_API_BASE"))
            .map_err(config_err)?
            .set_override_option("database_url", env_non_empty("DATABASE_URL"))
            .map_err(config_err)?
            .set_override_option("product_code", env_non_empty("PRODUCT_CODE"))
            .map_err(config_err)?
            .set_override_option("max_devices", env_parse::<i64>("MAX_DEVICES"))
            .map_err(config_err)?
            .set_override_option("token_max_age_secs", env_parse::<i64>("TOKEN_MAX_AGE_SECS"))
            .map_err(config_err)?
            .set_override_option("log_level", env_non_empty("LOG_LEVEL"))
            .map_err(config_err)?;

        let settings = builder
            .build()
            .map_err(|e| LicenseError::ConfigError(format!("failed to build config: {e}")))?;

        let mut cfg: ServerConfig = settings.try_deserialize().map_err(|e| {
            LicenseError::ConfigError(format!("failed to deserialize config: {e}"))
        })?;
        cfg.database_url = normalize_database_url(&cfg.database_url);
        cfg.paystack_api_base = cfg.paystack_api_base.trim_end_matches('/').to_string();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate the configuration. Soft problems are logged and corrected.
    pub fn validate(&mut self) -> LicenseResult<()> {
        if self.port == 0 {
            return Err(LicenseError::ConfigError(
                "port must be greater than 0".to_string(),
            ));
        }
        if self.token_max_age_secs == 0 {
            return Err(LicenseError::ConfigError(
                "token_max_age_secs must be greater than 0".to_string(),
            ));
        }
        if self.product_code.trim().is_empty() {
            return Err(LicenseError::ConfigError(
                "product_code cannot be empty".to_string(),
            ));
        }
        if self.app_secret.is_empty() {
            return Err(LicenseError::ConfigError(
                "app_secret cannot be empty".to_string(),
            ));
        }
        if self.app_secret == DEV_APP_SECRET {
            tracing::warn!("APP_SECRET is not set; using the development secret");
        }
        if self.paystack_secret_key.is_empty() {
            tracing::warn!("PAYSTACK_SECRET_KEY is not set; payment verification will fail");
        }
        if self.max_devices != 1 {
            tracing::warn!(
                max_devices = self.max_devices,
                "only single-device licenses are supported; treating MAX_DEVICES as 1"
            );
            self.max_devices = 1;
        }
        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(LicenseError::ConfigError(format!(
                    "log_level must be one of: trace, debug, info, warn, error. Got '{other}'"
                )));
            }
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Hosting providers hand out `postgres://` URLs; normalise the scheme.
pub fn normalize_database_url(url: &str) -> String {
    match url.strip_prefix("postgres://") {
        Some(rest) => format!("postgresql://{rest}"),
        None => url.to_string(),
    }
}
