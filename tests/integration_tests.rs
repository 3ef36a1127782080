//! HTTP-level tests of the activation server.

#![cfg(all(feature = "server", feature = "sqlite"))]

mod common;

use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

use common::{
    dead_url, spawn_test_server, spawn_test_server_with, test_config, TestServer, TEST_GATEWAY_KEY,
    TEST_PRODUCT, TEST_SECRET,
};
use gocbt_license::server::logging::REQUEST_ID_HEADER;
use gocbt_license::server::paystack::sign_webhook_body;
use gocbt_license::server::signer::{derive_license_key, token_payload, TokenSigner};

async fn post(url: &str, body: Value) -> (StatusCode, Value) {
    let resp = Client::new()
        .post(url)
        .json(&body)
        .send()
        .await
        .expect("request failed");
    let status = resp.status();
    let body = resp.json().await.expect("parse json failed");
    (status, body)
}

async fn activate(server: &TestServer, reference: &str, email: &str, machine: &str) -> (StatusCode, Value) {
    post(
        &format!("{}/api/license/activate", server.url),
        json!({ "email": email, "reference": reference, "machine_id": machine }),
    )
    .await
}

async fn check(server: &TestServer, key: &str, machine: &str, token: &str) -> (StatusCode, Value) {
    post(
        &format!("{}/api/license/check", server.url),
        json!({ "license_key": key, "machine_id": machine, "activation_token": token }),
    )
    .await
}

fn key_and_token(body: &Value) -> (String, String) {
    (
        body["license_key"].as_str().unwrap().to_string(),
        body["activation_token"].as_str().unwrap().to_string(),
    )
}

#[tokio::test]
async fn root_and_healthz() {
    let server = spawn_test_server().await;
    let client = Client::new();

    let root: Value = client
        .get(&server.url)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(root["ok"], true);
    assert_eq!(root["msg"], "GO CBT license server running");
    assert_eq!(root["product"], TEST_PRODUCT);

    let resp = client
        .get(format!("{}/healthz", server.url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().contains_key(REQUEST_ID_HEADER));
    let health: Value = resp.json().await.unwrap();
    assert_eq!(health["ok"], true);
    assert_eq!(health["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn activation_is_idempotent_for_the_same_machine() {
    let server = spawn_test_server().await;

    let (status, first) = activate(&server, "ref_123", " A@B.com ", "m1").await;
    assert_eq!(status, StatusCode::OK, "{first}");
    assert_eq!(first["ok"], true);
    assert_eq!(first["product"], TEST_PRODUCT);

    let (key, token) = key_and_token(&first);
    assert_eq!(
        key,
        derive_license_key("a@b.com", "ref_123", TEST_PRODUCT, TEST_SECRET)
    );
    assert!(token.starts_with(&format!("{key}|m1.")));

    let (status, second) = activate(&server, "ref_123", "a@b.com", "m1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["license_key"], key.as_str());

    let stored = server.db.get_by_reference("ref_123").await.unwrap().unwrap();
    assert_eq!(stored.email, "a@b.com");
    assert_eq!(stored.machine_id.as_deref(), Some("m1"));
}

#[tokio::test]
async fn second_machine_is_refused_without_overwriting_binding() {
    let server = spawn_test_server().await;

    let (status, _) = activate(&server, "ref_123", "a@b.com", "m1").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = activate(&server, "ref_123", "a@b.com", "m2").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["ok"], false);
    assert_eq!(body["error"], "already_activated_on_another_pc");

    let stored = server.db.get_by_reference("ref_123").await.unwrap().unwrap();
    assert_eq!(stored.machine_id.as_deref(), Some("m1"));
}

#[tokio::test]
async fn missing_and_invalid_fields() {
    let server = spawn_test_server().await;

    let (status, body) = activate(&server, "ref_123", "   ", "m1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "missing_fields");
    assert!(body["message"].as_str().unwrap().contains("email"));

    let (status, body) = post(
        &format!("{}/api/license/activate", server.url),
        json!({ "reference": "ref_123" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "missing_fields");

    // Not JSON at all.
    let resp = Client::new()
        .post(format!("{}/api/license/check", server.url))
        .body("license_key=x")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "missing_fields");

    let long_reference = "r".repeat(129);
    let (status, body) = activate(&server, &long_reference, "a@b.com", "m1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_field");

    let (status, body) = activate(&server, "ref_123", "a@b.com", "m|1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_field");
}

#[tokio::test]
async fn payment_problems_are_reported() {
    let server = spawn_test_server().await;

    let (status, body) = activate(&server, "ref_abandoned_1", "a@b.com", "m1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "payment_not_successful");

    let (status, body) = activate(&server, "ref_unknown_1", "a@b.com", "m1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "verification_failed");

    let (status, body) = activate(&server, "ref_down_1", "a@b.com", "m1").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "gateway_error");

    let (status, body) = activate(&server, "ref_garbled_1", "a@b.com", "m1").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "gateway_error");

    for reference in ["ref_abandoned_1", "ref_unknown_1", "ref_down_1", "ref_garbled_1"] {
        assert!(server.db.get_by_reference(reference).await.unwrap().is_none());
    }
}

#[tokio::test]
async fn unreachable_gateway_is_a_gateway_error() {
    let server = spawn_test_server_with(test_config(&dead_url().await)).await;

    let (status, body) = activate(&server, "ref_123", "a@b.com", "m1").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "gateway_error");
    assert!(!body["message"].as_str().unwrap().contains("127.0.0.1"));
}

#[tokio::test]
async fn check_accepts_a_fresh_activation() {
    let server = spawn_test_server().await;
    let (_, body) = activate(&server, "ref_123", "a@b.com", "m1").await;
    let (key, token) = key_and_token(&body);

    let (status, body) = check(&server, &key, "m1", &token).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body, json!({ "ok": true, "product": TEST_PRODUCT }));
}

#[tokio::test]
async fn check_rejects_bad_tokens() {
    let server = spawn_test_server().await;
    let (_, body) = activate(&server, "ref_123", "a@b.com", "m1").await;
    let (key, token) = key_and_token(&body);

    // forged payload
    let forged = token.replacen("|m1.", "|m2.", 1);
    let (status, body) = check(&server, &key, "m2", &forged).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "bad_token");

    // genuine token presented for another machine
    let (status, body) = check(&server, &key, "m2", &token).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "mismatch");

    // token signed with another secret
    let foreign = TokenSigner::new("someone-else", 3600).sign(&token_payload(&key, "m1"));
    let (status, body) = check(&server, &key, "m1", &foreign).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "bad_token");

    // expired
    let issued = u64::try_from(Utc::now().timestamp()).unwrap() - 400 * 24 * 60 * 60;
    let stale = TokenSigner::new(TEST_SECRET, 1).sign_at(&token_payload(&key, "m1"), issued);
    let (status, body) = check(&server, &key, "m1", &stale).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "bad_token");

    let (status, body) = check(&server, &key, "m1", "").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "missing_fields");
}

#[tokio::test]
async fn check_honours_registry_state() {
    let server = spawn_test_server().await;
    let (_, body) = activate(&server, "ref_123", "a@b.com", "m1").await;
    let (key, token) = key_and_token(&body);

    // Binding moved in the registry: the still-valid token is refused.
    sqlx::query("UPDATE licenses SET machine_id = 'm9' WHERE license_key = ?")
        .bind(&key)
        .execute(&server.pool)
        .await
        .unwrap();
    let (status, body) = check(&server, &key, "m1", &token).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "already_activated_on_another_pc");

    sqlx::query("UPDATE licenses SET machine_id = 'm1', status = 'revoked' WHERE license_key = ?")
        .bind(&key)
        .execute(&server.pool)
        .await
        .unwrap();
    let (status, body) = check(&server, &key, "m1", &token).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "invalid_license");

    // A revoked license cannot be re-activated either.
    let (status, body) = activate(&server, "ref_123", "a@b.com", "m1").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "invalid_license");

    sqlx::query("DELETE FROM licenses")
        .execute(&server.pool)
        .await
        .unwrap();
    let (status, body) = check(&server, &key, "m1", &token).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "invalid_license");
}

#[tokio::test]
async fn deactivate_keeps_the_binding() {
    let server = spawn_test_server().await;
    let (_, body) = activate(&server, "ref_123", "a@b.com", "m1").await;
    let (key, token) = key_and_token(&body);

    let (status, body) = post(
        &format!("{}/api/license/deactivate", server.url),
        json!({ "license_key": key, "machine_id": "m1", "activation_token": token }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "ok": true, "released": false }));

    let (status, _) = check(&server, &key, "m1", &token).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = activate(&server, "ref_123", "a@b.com", "m2").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

async fn post_webhook(server: &TestServer, body: &[u8], signature: Option<&str>) -> (StatusCode, String) {
    let mut req = Client::new()
        .post(format!("{}/paystack/webhook", server.url))
        .header("content-type", "application/json")
        .body(body.to_vec());
    if let Some(sig) = signature {
        req = req.header("x-paystack-signature", sig);
    }
    let resp = req.send().await.unwrap();
    (resp.status(), resp.text().await.unwrap())
}

#[tokio::test]
async fn webhook_signature_is_enforced() {
    let server = spawn_test_server().await;
    let body = br#"{"event":"charge.success","data":{"reference":"ref_wh","customer":{"email":"a@b.com"}}}"#;

    let (status, text) = post_webhook(&server, body, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(text, "invalid signature");

    let wrong = sign_webhook_body("not-the-key", body);
    let (status, text) = post_webhook(&server, body, Some(&wrong)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(text, "invalid signature");

    assert!(server.db.get_by_reference("ref_wh").await.unwrap().is_none());
}

#[tokio::test]
async fn webhook_creates_an_unbound_license_that_activation_binds() {
    let server = spawn_test_server().await;
    let body = br#"{"event":"charge.success","data":{"reference":"ref_wh","status":"success","customer":{"email":"A@B.com"}}}"#;
    let sig = sign_webhook_body(TEST_GATEWAY_KEY, body);

    let (status, text) = post_webhook(&server, body, Some(&sig)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "ok");

    let row = server.db.get_by_reference("ref_wh").await.unwrap().unwrap();
    assert_eq!(row.email, "a@b.com");
    assert!(row.machine_id.is_none());

    // redelivery is harmless
    let (status, _) = post_webhook(&server, body, Some(&sig)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = activate(&server, "ref_wh", "a@b.com", "m1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["license_key"], row.license_key.as_str());

    let bound = server.db.get_by_reference("ref_wh").await.unwrap().unwrap();
    assert_eq!(bound.machine_id.as_deref(), Some("m1"));
}

#[tokio::test]
async fn revoked_unbound_license_stays_unbound() {
    let server = spawn_test_server().await;
    let body = br#"{"event":"charge.success","data":{"reference":"ref_wh","customer":{"email":"a@b.com"}}}"#;
    let (status, _) = post_webhook(&server, body, Some(&sign_webhook_body(TEST_GATEWAY_KEY, body))).await;
    assert_eq!(status, StatusCode::OK);

    sqlx::query("UPDATE licenses SET status = 'revoked' WHERE paid_reference = 'ref_wh'")
        .execute(&server.pool)
        .await
        .unwrap();

    let (status, body) = activate(&server, "ref_wh", "a@b.com", "m1").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "invalid_license");

    let row = server.db.get_by_reference("ref_wh").await.unwrap().unwrap();
    assert!(row.machine_id.is_none());
}

#[tokio::test]
async fn webhook_ignores_other_events_and_bad_payloads() {
    let server = spawn_test_server().await;

    let other = br#"{"event":"transfer.success","data":{"reference":"ref_tr","customer":{"email":"a@b.com"}}}"#;
    let (status, _) = post_webhook(&server, other, Some(&sign_webhook_body(TEST_GATEWAY_KEY, other))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(server.db.get_by_reference("ref_tr").await.unwrap().is_none());

    let garbage = b"not json";
    let (status, text) =
        post_webhook(&server, garbage, Some(&sign_webhook_body(TEST_GATEWAY_KEY, garbage))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "ok");
}
