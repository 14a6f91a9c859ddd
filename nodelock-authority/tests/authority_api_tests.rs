use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signature, SigningKey};
use nodelock_authority::{build_router, AuthorityState};
use nodelock_license::{
    key, AuthMode, HostId, LicensePayload, PublicKeyResponse, SignResponse, VerifyResponse,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const DAY: i64 = 24 * 60 * 60;

fn test_state() -> Arc<AuthorityState> {
    Arc::new(AuthorityState::new(SigningKey::from_bytes(&[7; 32])))
}

fn payload(issuer: AuthMode) -> LicensePayload {
    LicensePayload {
        host: HostId::parse("203.0.113.7").unwrap(),
        issued_at: 1_750_000_000,
        expires_at: 1_781_536_000,
        issuer,
    }
}

/// Spin up the HTTP server on an OS-assigned port, returning the base URL.
async fn spawn_test_server() -> String {
    spawn_server(test_state()).await
}

async fn spawn_server(state: Arc<AuthorityState>) -> String {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://127.0.0.1:{port}")
}

#[tokio::test]
async fn public_key_endpoint_returns_issuer_key() {
    let base = spawn_test_server().await;
    let resp = reqwest::get(format!("{base}/api/v1/public-key")).await.unwrap();
    assert_eq!(resp.status(), 200);

    let body: PublicKeyResponse = resp.json().await.unwrap();
    let expected = test_state().verifying_key();
    assert_eq!(key::parse_public_key(&body.public_key).unwrap(), expected);
    assert_eq!(body.key_id, key::key_id(&expected));
}

#[tokio::test]
async fn sign_then_verify() {
    let base = spawn_test_server().await;
    let client = reqwest::Client::new();
    let bytes = payload(AuthMode::Remote).to_bytes();

    let resp = client
        .post(format!("{base}/api/v1/sign"))
        .json(&json!({ "payload": BASE64.encode(&bytes) }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let signed: SignResponse = resp.json().await.unwrap();

    let sig = Signature::from_slice(&BASE64.decode(&signed.signature).unwrap()).unwrap();
    assert!(test_state().verifying_key().verify_strict(&bytes, &sig).is_ok());

    let verdict: VerifyResponse = client
        .post(format!("{base}/api/v1/verify"))
        .json(&json!({ "payload": BASE64.encode(&bytes), "signature": signed.signature }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(verdict.valid);
    assert_eq!(verdict.expire_at.as_deref(), Some("2026-06-15T15:06:40+00:00"));
}

#[tokio::test]
async fn verify_reports_forged_signature_as_invalid() {
    let base = spawn_test_server().await;
    let bytes = payload(AuthMode::Remote).to_bytes();

    let verdict: VerifyResponse = reqwest::Client::new()
        .post(format!("{base}/api/v1/verify"))
        .json(&json!({
            "payload": BASE64.encode(&bytes),
            "signature": BASE64.encode([0u8; 64]),
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(!verdict.valid);
    assert!(verdict.expire_at.is_none());
}

#[tokio::test]
async fn sign_rejects_arbitrary_bytes() {
    let base = spawn_test_server().await;
    let resp = reqwest::Client::new()
        .post(format!("{base}/api/v1/sign"))
        .json(&json!({ "payload": BASE64.encode(b"sign anything for me") }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn sign_rejects_local_payloads() {
    let base = spawn_test_server().await;
    let resp = reqwest::Client::new()
        .post(format!("{base}/api/v1/sign"))
        .json(&json!({ "payload": BASE64.encode(payload(AuthMode::Local).to_bytes()) }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

async fn sign_status(base: &str, payload: &LicensePayload) -> u16 {
    reqwest::Client::new()
        .post(format!("{base}/api/v1/sign"))
        .json(&json!({ "payload": BASE64.encode(payload.to_bytes()) }))
        .send()
        .await
        .unwrap()
        .status()
        .as_u16()
}

#[tokio::test]
async fn sign_rejects_windows_beyond_default_cap() {
    let base = spawn_test_server().await;

    let mut two_years = payload(AuthMode::Remote);
    two_years.expires_at = two_years.issued_at + 2 * 365 * DAY;
    assert_eq!(sign_status(&base, &two_years).await, 400);

    let mut forever = payload(AuthMode::Remote);
    forever.expires_at = 253_402_300_799; // 9999-12-31T23:59:59Z
    assert_eq!(sign_status(&base, &forever).await, 400);

    // Exactly one year is still signed
    assert_eq!(sign_status(&base, &payload(AuthMode::Remote)).await, 200);
}

#[tokio::test]
async fn sign_honors_configured_cap() {
    let state = AuthorityState::new(SigningKey::from_bytes(&[7; 32]))
        .with_max_validity(Duration::from_secs(30 * DAY as u64));
    assert_eq!(state.max_validity_secs(), 30 * DAY);
    let base = spawn_server(Arc::new(state)).await;

    let mut month = payload(AuthMode::Remote);
    month.expires_at = month.issued_at + 30 * DAY;
    assert_eq!(sign_status(&base, &month).await, 200);

    month.expires_at += 1;
    assert_eq!(sign_status(&base, &month).await, 400);
}

#[tokio::test]
async fn verify_rejects_short_signature() {
    let base = spawn_test_server().await;
    let resp = reqwest::Client::new()
        .post(format!("{base}/api/v1/verify"))
        .json(&json!({ "payload": "AAAA", "signature": BASE64.encode([1u8; 10]) }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let base = spawn_test_server().await;
    let resp = reqwest::get(format!("{base}/api/v1/nonexistent")).await.unwrap();
    assert_eq!(resp.status(), 404);
}
