//! GO CBT license activation.
//!
//! Two halves share this crate:
//!
//! - the client library (`client`, `hardware`): fingerprints the machine,
//!   activates it against a payment reference, and keeps the resulting
//!   token on disk so later checks can run offline;
//! - the activation server (`server`): verifies payments with the gateway,
//!   binds each paid license to one machine and signs activation tokens.
//!
//! # Features
//!
//! - `server` - Activation server (handlers, registry). Enabled by default.
//! - `sqlite` - SQLite registry backend. Enabled by default.
//! - `postgres` - PostgreSQL registry backend.
//!
//! ```toml
//! # Client only
//! gocbt-license = { path = "...", default-features = false }
//! ```

pub mod config;
pub mod errors;
pub mod hardware;

pub mod client {
    pub mod errors;
    pub mod license;
    pub mod responses;
    pub mod storage;
    pub mod transport;

    pub use license::LicenseClient;
}

#[cfg(feature = "server")]
#[path = "server/mod.rs"]
pub mod server;
