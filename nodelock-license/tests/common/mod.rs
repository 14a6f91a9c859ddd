//! Shared test helpers for license tests.

#![allow(dead_code)]

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::SigningKey;
use nodelock_license::{AuthConfig, AuthMode, FixedClock, LicenseManager};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// 2025-06-15T16:26:40Z, a fixed "now" for deterministic expiry tests.
pub const NOW: i64 = 1_750_004_800;

pub const DAY: i64 = 24 * 60 * 60;

pub const IP: &str = "203.0.113.7";
pub const OTHER_IP: &str = "198.51.100.9";

/// Returns a deterministic issuer key from a fixed seed.
pub fn test_keypair() -> SigningKey {
    let seed: [u8; 32] = [
        1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24,
        25, 26, 27, 28, 29, 30, 31, 32,
    ];
    SigningKey::from_bytes(&seed)
}

/// Writes the deterministic issuer key into `root` so LOCAL managers pick it up.
pub fn install_test_key(root: &Path) {
    std::fs::create_dir_all(root).unwrap();
    let encoded = BASE64.encode(test_keypair().to_bytes());
    std::fs::write(root.join(nodelock_license::DEFAULT_KEY_FILE), encoded).unwrap();
}

/// LOCAL manager over `root` with the test key and a fixed clock at [`NOW`].
pub fn local_manager(root: &Path) -> (LicenseManager, Arc<FixedClock>) {
    local_manager_with_validity(root, Duration::from_secs(365 * DAY as u64))
}

/// LOCAL manager with a custom validity window.
pub fn local_manager_with_validity(root: &Path, validity: Duration) -> (LicenseManager, Arc<FixedClock>) {
    install_test_key(root);
    let clock = Arc::new(FixedClock::at(NOW));
    let config = AuthConfig::new(AuthMode::Local, root).with_validity(validity);
    let manager = LicenseManager::init_with_clock(config, clock.clone()).unwrap();
    (manager, clock)
}

/// Flips one bit of the decoded serial and re-encodes it.
pub fn flip_bit(serial: &str, bit: usize) -> String {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let mut raw = URL_SAFE_NO_PAD.decode(serial).unwrap();
    let idx = bit / 8 % raw.len();
    raw[idx] ^= 1 << (bit % 8);
    URL_SAFE_NO_PAD.encode(raw)
}
