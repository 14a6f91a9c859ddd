//! Ed25519 key material.
//!
//! The LOCAL issuer key is stored as base64 of the 32-byte secret seed.
//! REMOTE hosts receive public material either as base64 of the raw 32-byte
//! key or as base64 of a PEM `PUBLIC KEY` block (SubjectPublicKeyInfo).

use crate::error::{LicenseError, LicenseResult};
use base64::{
    engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD},
    Engine,
};
use ed25519_dalek::pkcs8::DecodePublicKey;
use ed25519_dalek::{SigningKey, VerifyingKey, PUBLIC_KEY_LENGTH, SECRET_KEY_LENGTH};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;
use tracing::info;

/// Loads the signing key at `path`, generating and persisting a new one if
/// the file does not exist yet.
///
/// # Errors
///
/// Returns [`LicenseError::Storage`] if the key cannot be read or written.
pub fn load_or_generate_signing_key(path: &Path) -> LicenseResult<SigningKey> {
    match load_signing_key(path) {
        Err(LicenseError::Storage(_)) if !path.exists() => {}
        other => return other,
    }

    let key = SigningKey::generate(&mut OsRng);
    let dir = path
        .parent()
        .ok_or_else(|| LicenseError::Storage(format!("key path has no parent: {}", path.display())))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    restrict_permissions(tmp.path())?;
    tmp.write_all(BASE64.encode(key.to_bytes()).as_bytes())?;
    tmp.as_file().sync_all()?;

    match tmp.persist_noclobber(path) {
        Ok(_) => {
            info!(path = %path.display(), key_id = %key_id(&key.verifying_key()), "Generated issuer key");
            Ok(key)
        }
        // Another process created the key first; use theirs
        Err(e) if e.error.kind() == ErrorKind::AlreadyExists => load_signing_key(path),
        Err(e) => Err(LicenseError::Storage(format!(
            "failed to write key {}: {}",
            path.display(),
            e.error
        ))),
    }
}

/// Loads an existing signing key.
///
/// # Errors
///
/// Returns [`LicenseError::Storage`] if the file is missing, unreadable, or
/// does not hold a base64 32-byte seed.
pub fn load_signing_key(path: &Path) -> LicenseResult<SigningKey> {
    let contents = fs::read_to_string(path)
        .map_err(|e| LicenseError::Storage(format!("failed to read key {}: {e}", path.display())))?;

    let bytes = BASE64
        .decode(contents.trim())
        .map_err(|e| LicenseError::Storage(format!("invalid key encoding in {}: {e}", path.display())))?;

    let seed: [u8; SECRET_KEY_LENGTH] = bytes.as_slice().try_into().map_err(|_| {
        LicenseError::Storage(format!("invalid key length in {}", path.display()))
    })?;

    Ok(SigningKey::from_bytes(&seed))
}

/// Parses REMOTE public verification material.
///
/// Accepts base64 of the raw key, base64 of a PEM block, or the PEM text
/// itself.
///
/// # Errors
///
/// Returns [`LicenseError::InvalidParams`] if the material is not a valid
/// Ed25519 public key.
pub fn parse_public_key(material: &str) -> LicenseResult<VerifyingKey> {
    let material = material.trim();

    if material.starts_with("-----BEGIN") {
        return VerifyingKey::from_public_key_pem(material)
            .map_err(|e| LicenseError::InvalidParams(format!("invalid public key PEM: {e}")));
    }

    let bytes = BASE64
        .decode(material)
        .map_err(|e| LicenseError::InvalidParams(format!("invalid public key base64: {e}")))?;

    if let Ok(raw) = <[u8; PUBLIC_KEY_LENGTH]>::try_from(bytes.as_slice()) {
        return VerifyingKey::from_bytes(&raw)
            .map_err(|_| LicenseError::InvalidParams("invalid public key".into()));
    }

    let pem = std::str::from_utf8(&bytes)
        .map_err(|_| LicenseError::InvalidParams("public key is neither raw nor PEM".into()))?;
    VerifyingKey::from_public_key_pem(pem)
        .map_err(|e| LicenseError::InvalidParams(format!("invalid public key PEM: {e}")))
}

/// Encodes a public key as base64 of its raw bytes.
#[must_use]
pub fn encode_public_key(key: &VerifyingKey) -> String {
    BASE64.encode(key.to_bytes())
}

/// Short identifier of a public key, safe to log.
#[must_use]
pub fn key_id(key: &VerifyingKey) -> String {
    let hash = Sha256::digest(key.as_bytes());
    URL_SAFE_NO_PAD.encode(&hash[..8])
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> LicenseResult<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> LicenseResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::pkcs8::EncodePublicKey;
    use ed25519_dalek::pkcs8::spki::der::pem::LineEnding;

    #[test]
    fn generated_key_is_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("issuer.key");

        let first = load_or_generate_signing_key(&path).unwrap();
        let second = load_or_generate_signing_key(&path).unwrap();
        assert_eq!(first.to_bytes(), second.to_bytes());
    }

    #[test]
    fn corrupt_key_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("issuer.key");
        fs::write(&path, "not base64!").unwrap();

        assert!(matches!(
            load_or_generate_signing_key(&path),
            Err(LicenseError::Storage(_))
        ));
    }

    #[test]
    fn parses_raw_and_pem_public_keys() {
        let signing = SigningKey::from_bytes(&[3; 32]);
        let verifying = signing.verifying_key();

        let raw = encode_public_key(&verifying);
        assert_eq!(parse_public_key(&raw).unwrap(), verifying);

        let pem = verifying.to_public_key_pem(LineEnding::LF).unwrap();
        assert_eq!(parse_public_key(&pem).unwrap(), verifying);
        assert_eq!(parse_public_key(&BASE64.encode(pem.as_bytes())).unwrap(), verifying);
    }

    #[test]
    fn rejects_bad_public_keys() {
        assert!(parse_public_key("").is_err());
        assert!(parse_public_key("@@@").is_err());
        assert!(parse_public_key(&BASE64.encode([1u8; 16])).is_err());
    }

    #[test]
    fn key_id_is_stable() {
        let verifying = SigningKey::from_bytes(&[5; 32]).verifying_key();
        assert_eq!(key_id(&verifying), key_id(&verifying));
        assert_eq!(key_id(&verifying).len(), 11);
    }
}
