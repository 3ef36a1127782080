use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::server::handlers::{
    activate_handler, check_handler, deactivate_handler, healthz_handler, index_handler,
    webhook_handler, AppState,
};
use crate::server::logging::request_logging_middleware;

pub const ACTIVATE_ROUTE: &str = "/api/license/activate";
pub const CHECK_ROUTE: &str = "/api/license/check";
pub const DEACTIVATE_ROUTE: &str = "/api/license/deactivate";
pub const WEBHOOK_ROUTE: &str = "/paystack/webhook";

/// Build the activation server router.
///
/// # Routes
///
/// - `GET /` - Service banner
/// - `GET /healthz` - Liveness probe
/// - `POST /api/license/activate` - Activate a machine with a payment reference
/// - `POST /api/license/check` - Confirm an activation token
/// - `POST /api/license/deactivate` - Acknowledge a deactivation
/// - `POST /paystack/webhook` - Payment gateway notifications
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/healthz", get(healthz_handler))
        .route(ACTIVATE_ROUTE, post(activate_handler))
        .route(CHECK_ROUTE, post(check_handler))
        .route(DEACTIVATE_ROUTE, post(deactivate_handler))
        .route(WEBHOOK_ROUTE, post(webhook_handler))
        .layer(middleware::from_fn(request_logging_middleware))
        .with_state(state)
}
