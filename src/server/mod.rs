//! Activation server.
//!
//! - `database`   → license registry over SQLite/Postgres
//! - `handlers`   → Axum handlers for the activation API
//! - `routes`     → router builder
//! - `paystack`   → payment verification and webhook signatures
//! - `signer`     → activation tokens and license key derivation
//! - `api_error`  → wire error codes
//! - `logging`    → request middleware and audit events
//! - `validation` → request field checks

pub mod api_error;
pub mod database;
pub mod handlers;
pub mod logging;
pub mod paystack;
pub mod routes;
pub mod signer;
pub mod validation;

pub use api_error::{ApiError, ErrorCode};
pub use database::{Database, License};
pub use handlers::AppState;
pub use routes::build_router;
pub use signer::{TokenError, TokenSigner};
