//! Shared fixtures: in-memory registry, mock payment gateway, test server.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::Path,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tokio::net::TcpListener;

use gocbt_license::config::ServerConfig;
use gocbt_license::server::database::Database;
use gocbt_license::server::{build_router, AppState};

pub const TEST_SECRET: &str = "test-app-secret";
pub const TEST_GATEWAY_KEY: &str = "sk_test_gocbt";
pub const TEST_PRODUCT: &str = "gocbt-desktop";
pub const PAYER_EMAIL: &str = "a@b.com";

/// In-memory SQLite registry with the schema applied.
///
/// The raw pool is returned too so tests can poke rows directly.
pub async fn setup_in_memory_db() -> (Arc<Database>, SqlitePool) {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("db connect failed");

    let db = Arc::new(Database::SQLite(pool.clone()));
    db.migrate().await.expect("migrate failed");
    (db, pool)
}

/// Gateway stand-in for `GET /transaction/verify/:reference`.
///
/// - `ref_abandoned*` → known but not paid
/// - `ref_unknown*`   → `status: false`
/// - `ref_down*`      → 503
/// - `ref_garbled*`   → 200 with a non-JSON body
/// - anything else    → paid by [`PAYER_EMAIL`]
async fn mock_verify(Path(reference): Path<String>, headers: HeaderMap) -> Response {
    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {TEST_GATEWAY_KEY}"));
    if !authorized {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "status": false, "message": "Invalid key" })),
        )
            .into_response();
    }

    if reference.starts_with("ref_abandoned") {
        Json(json!({
            "status": true,
            "message": "Verification successful",
            "data": { "status": "abandoned", "reference": reference }
        }))
        .into_response()
    } else if reference.starts_with("ref_unknown") {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "status": false, "message": "Transaction reference not found" })),
        )
            .into_response()
    } else if reference.starts_with("ref_down") {
        (StatusCode::SERVICE_UNAVAILABLE, "upstream unavailable").into_response()
    } else if reference.starts_with("ref_garbled") {
        (StatusCode::OK, "<html>maintenance</html>").into_response()
    } else {
        Json(json!({
            "status": true,
            "message": "Verification successful",
            "data": {
                "status": "success",
                "reference": reference,
                "customer": { "email": PAYER_EMAIL }
            }
        }))
        .into_response()
    }
}

/// Serve `router` on an ephemeral local port and return its base URL.
pub async fn serve(router: Router) -> String {
    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .expect("failed to bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, router.into_make_service())
            .await
            .expect("server failed");
    });

    format!("http://{}", addr)
}

pub async fn spawn_mock_gateway() -> String {
    serve(Router::new().route("/transaction/verify/:reference", get(mock_verify))).await
}

pub fn test_config(gateway_base: &str) -> ServerConfig {
    ServerConfig {
        app_secret: TEST_SECRET.to_string(),
        paystack_secret_key: TEST_GATEWAY_KEY.to_string(),
        paystack_api_base: gateway_base.to_string(),
        database_url: "sqlite::memory:".to_string(),
        product_code: TEST_PRODUCT.to_string(),
        ..ServerConfig::default()
    }
}

pub struct TestServer {
    pub url: String,
    pub db: Arc<Database>,
    pub pool: SqlitePool,
}

/// Activation server backed by an in-memory registry and the mock gateway.
pub async fn spawn_test_server() -> TestServer {
    let gateway = spawn_mock_gateway().await;
    spawn_test_server_with(test_config(&gateway)).await
}

pub async fn spawn_test_server_with(config: ServerConfig) -> TestServer {
    let (db, pool) = setup_in_memory_db().await;
    let state = AppState::new(db.clone(), config).expect("state");
    let url = serve(build_router(state)).await;
    TestServer { url, db, pool }
}

/// An address nothing listens on.
pub async fn dead_url() -> String {
    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .expect("failed to bind");
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}
