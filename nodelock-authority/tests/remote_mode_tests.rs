//! REMOTE-mode hosts talking to a live authority over HTTP.

use ed25519_dalek::SigningKey;
use nodelock_authority::{build_router, AuthorityState};
use nodelock_license::{
    key, AuthConfig, AuthMode, AuthorityConfig, LicenseManager, AUTH_ERR_MISMATCH,
    AUTH_ERR_SERIAL_IO,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

const IP: &str = "203.0.113.7";
const OTHER_IP: &str = "198.51.100.9";

fn issuer_key() -> SigningKey {
    SigningKey::from_bytes(&[11; 32])
}

/// Runs the authority on its own runtime thread; the blocking client must
/// not run inside a tokio runtime.
fn spawn_authority() -> String {
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            tx.send(listener.local_addr().unwrap().port()).unwrap();
            let app = build_router(Arc::new(AuthorityState::new(issuer_key())));
            axum::serve(listener, app).await.unwrap();
        });
    });
    format!("http://127.0.0.1:{}", rx.recv().unwrap())
}

fn fast(url: &str) -> AuthorityConfig {
    AuthorityConfig {
        timeout_ms: 300,
        retries: 1,
        backoff_ms: 10,
        ..AuthorityConfig::new(url)
    }
}

#[test]
fn remote_host_issues_binds_and_verifies_through_authority() {
    let url = spawn_authority();
    let dir = tempfile::tempdir().unwrap();
    let config = AuthConfig::new(AuthMode::Remote, dir.path()).with_authority(fast(&url));
    let manager = LicenseManager::init(config).unwrap();

    let serial = manager.issue(IP).unwrap();
    manager.bind(IP, serial.as_str()).unwrap();
    manager.verify(IP, serial.as_str()).unwrap();

    let moved = manager.reissue(IP, OTHER_IP, serial.as_str()).unwrap();
    assert_eq!(manager.bind(IP, moved.as_str()).unwrap_err().code(), AUTH_ERR_MISMATCH);
    manager.bind(OTHER_IP, moved.as_str()).unwrap();
}

#[test]
fn host_with_public_key_verifies_offline() {
    let url = spawn_authority();

    let issuer_dir = tempfile::tempdir().unwrap();
    let issuer = LicenseManager::init(
        AuthConfig::new(AuthMode::Remote, issuer_dir.path()).with_authority(fast(&url)),
    )
    .unwrap();
    let serial = issuer.issue(IP).unwrap();

    let host_dir = tempfile::tempdir().unwrap();
    let public_key = key::encode_public_key(&issuer_key().verifying_key());
    let host = LicenseManager::init(
        AuthConfig::new(AuthMode::Remote, host_dir.path()).with_public_key(public_key),
    )
    .unwrap();

    host.bind(IP, serial.as_str()).unwrap();
    host.verify(IP, serial.as_str()).unwrap();
}

#[test]
fn unreachable_authority_is_io_class() {
    // Bind then drop to get a port nothing listens on
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    let dir = tempfile::tempdir().unwrap();
    let config = AuthConfig::new(AuthMode::Remote, dir.path())
        .with_authority(fast(&format!("http://127.0.0.1:{port}")));
    let manager = LicenseManager::init(config).unwrap();

    assert_eq!(manager.issue(IP).unwrap_err().code(), AUTH_ERR_SERIAL_IO);
}

#[test]
fn silent_authority_times_out_as_io_class() {
    // Accepts connections but never answers
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    std::thread::spawn(move || {
        let mut held = Vec::new();
        for stream in listener.incoming() {
            held.push(stream);
        }
    });

    let dir = tempfile::tempdir().unwrap();
    let config = AuthConfig::new(AuthMode::Remote, dir.path())
        .with_authority(fast(&format!("http://127.0.0.1:{port}")));
    let manager = LicenseManager::init(config).unwrap();

    let started = Instant::now();
    let err = manager.issue(IP).unwrap_err();
    assert_eq!(err.code(), AUTH_ERR_SERIAL_IO);
    // Two attempts of 300 ms each plus backoff, not an indefinite hang
    assert!(started.elapsed() < Duration::from_secs(5));
}
