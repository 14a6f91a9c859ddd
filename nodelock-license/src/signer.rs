//! Signing and verification of serial payloads.
//!
//! The manager never branches on [`AuthMode`]; it holds one [`Signer`]
//! chosen at initialization:
//!
//! - [`LocalSigner`]: LOCAL mode, holds the secret key, signs and verifies.
//! - [`PublicKeyVerifier`]: REMOTE mode with public material only.
//! - [`RemoteSigner`](crate::authority::RemoteSigner): REMOTE mode delegating
//!   to an external authority.

use crate::config::AuthMode;
use crate::error::{LicenseError, LicenseResult};
use crate::key;
use ed25519_dalek::{Signature, Signer as _, SigningKey, VerifyingKey};

/// Capability to sign and verify canonical payload bytes.
pub trait Signer: Send + Sync {
    /// Mode recorded in payloads issued through this signer.
    fn mode(&self) -> AuthMode;

    /// Signs `payload`.
    ///
    /// # Errors
    ///
    /// Returns an I/O-class error if no signing material is reachable.
    fn sign(&self, payload: &[u8]) -> LicenseResult<Signature>;

    /// Checks `signature` over `payload`.
    ///
    /// `Ok(false)` means the signature was checked and is invalid; `Err`
    /// means it could not be checked at all.
    ///
    /// # Errors
    ///
    /// Returns an I/O-class error if the verdict could not be obtained.
    fn verify(&self, payload: &[u8], signature: &Signature) -> LicenseResult<bool>;

    /// Short identifier of the verification key, for logs.
    fn key_id(&self) -> Option<String> {
        None
    }
}

/// LOCAL-mode signer holding the issuer's secret key.
pub struct LocalSigner {
    signing_key: SigningKey,
}

impl LocalSigner {
    /// Creates a signer from a secret key.
    #[must_use]
    pub fn new(signing_key: SigningKey) -> Self {
        Self { signing_key }
    }

    /// Creates a signer from a raw 32-byte secret seed.
    #[must_use]
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self::new(SigningKey::from_bytes(seed))
    }

    /// Returns the public half of the issuer key.
    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }
}

impl std::fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSigner")
            .field("signing_key", &"[REDACTED]")
            .finish()
    }
}

impl Signer for LocalSigner {
    fn mode(&self) -> AuthMode {
        AuthMode::Local
    }

    fn sign(&self, payload: &[u8]) -> LicenseResult<Signature> {
        Ok(self.signing_key.sign(payload))
    }

    fn verify(&self, payload: &[u8], signature: &Signature) -> LicenseResult<bool> {
        Ok(self
            .signing_key
            .verifying_key()
            .verify_strict(payload, signature)
            .is_ok())
    }

    fn key_id(&self) -> Option<String> {
        Some(key::key_id(&self.verifying_key()))
    }
}

/// REMOTE-mode verifier holding only the authority's public key.
#[derive(Debug, Clone)]
pub struct PublicKeyVerifier {
    verifying_key: VerifyingKey,
}

impl PublicKeyVerifier {
    /// Creates a verifier from a public key.
    #[must_use]
    pub fn new(verifying_key: VerifyingKey) -> Self {
        Self { verifying_key }
    }

    /// Creates a verifier from encoded public material (see [`key::parse_public_key`]).
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::InvalidParams`] if the material is not a valid key.
    pub fn from_material(material: &str) -> LicenseResult<Self> {
        key::parse_public_key(material).map(Self::new)
    }
}

impl Signer for PublicKeyVerifier {
    fn mode(&self) -> AuthMode {
        AuthMode::Remote
    }

    fn sign(&self, _payload: &[u8]) -> LicenseResult<Signature> {
        Err(LicenseError::Storage(
            "no signing key available: this host holds public verification material only".into(),
        ))
    }

    fn verify(&self, payload: &[u8], signature: &Signature) -> LicenseResult<bool> {
        Ok(self.verifying_key.verify_strict(payload, signature).is_ok())
    }

    fn key_id(&self) -> Option<String> {
        Some(key::key_id(&self.verifying_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_sign_verify_roundtrip() {
        let signer = LocalSigner::from_seed(&[1; 32]);
        let sig = signer.sign(b"payload").unwrap();
        assert!(signer.verify(b"payload", &sig).unwrap());
        assert!(!signer.verify(b"payloae", &sig).unwrap());
    }

    #[test]
    fn public_verifier_accepts_issuer_signatures() {
        let issuer = LocalSigner::from_seed(&[2; 32]);
        let verifier = PublicKeyVerifier::new(issuer.verifying_key());
        let sig = issuer.sign(b"payload").unwrap();
        assert!(verifier.verify(b"payload", &sig).unwrap());
    }

    #[test]
    fn public_verifier_cannot_sign() {
        let issuer = LocalSigner::from_seed(&[2; 32]);
        let verifier = PublicKeyVerifier::new(issuer.verifying_key());
        let err = verifier.sign(b"payload").unwrap_err();
        assert_eq!(err.code(), crate::error::AUTH_ERR_SERIAL_IO);
    }

    #[test]
    fn foreign_key_is_rejected() {
        let issuer = LocalSigner::from_seed(&[2; 32]);
        let other = LocalSigner::from_seed(&[3; 32]);
        let sig = other.sign(b"payload").unwrap();
        assert!(!issuer.verify(b"payload", &sig).unwrap());
    }

    #[test]
    fn debug_redacts_secret() {
        let signer = LocalSigner::from_seed(&[9; 32]);
        assert!(format!("{signer:?}").contains("REDACTED"));
    }
}
