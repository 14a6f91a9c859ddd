//! REMOTE authority contract.
//!
//! An [`Authority`] is the external service that holds the issuer key in
//! REMOTE mode. It exposes the same sign/verify semantics as
//! [`LocalSigner`](crate::LocalSigner); [`RemoteSigner`] wraps one with a
//! bounded retry policy and adopts its verdicts as-is.
//!
//! The wire types below are the JSON bodies exchanged with the bundled
//! authority service. Binary fields are standard base64.

use crate::config::{AuthMode, AuthorityConfig};
use crate::error::{LicenseError, LicenseResult};
use crate::key;
use crate::signer::Signer;
use ed25519_dalek::{Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Failure talking to an authority.
#[derive(Debug, Error)]
pub enum AuthorityError {
    /// The request did not complete within the configured timeout.
    #[error("authority request timed out")]
    Timeout,

    /// Connection-level or server-side failure; worth retrying.
    #[error("authority transport error: {0}")]
    Transport(String),

    /// The authority answered with something unusable; not retried.
    #[error("authority protocol error: {0}")]
    Protocol(String),
}

impl AuthorityError {
    fn is_retryable(&self) -> bool {
        !matches!(self, Self::Protocol(_))
    }
}

/// External signing authority.
pub trait Authority: Send + Sync {
    /// Signs canonical payload bytes with the authority key.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthorityError`] if no signature could be obtained.
    fn sign(&self, payload: &[u8]) -> Result<Signature, AuthorityError>;

    /// Asks the authority whether `signature` is valid for `payload`.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthorityError`] if no verdict could be obtained.
    fn verify(&self, payload: &[u8], signature: &Signature) -> Result<bool, AuthorityError>;
}

/// REMOTE-mode signer delegating to an [`Authority`].
///
/// When the authority's public key is known locally, verification happens
/// offline and only signing goes over the wire.
pub struct RemoteSigner<A> {
    authority: A,
    verifying_key: Option<VerifyingKey>,
    policy: AuthorityConfig,
}

impl<A: Authority> RemoteSigner<A> {
    /// Wraps `authority` with the retry policy from `config`.
    pub fn new(authority: A, config: &AuthorityConfig) -> Self {
        Self {
            authority,
            verifying_key: None,
            policy: config.clone(),
        }
    }

    /// Verifies locally with `verifying_key` instead of asking the authority.
    #[must_use]
    pub fn with_verifying_key(mut self, verifying_key: VerifyingKey) -> Self {
        self.verifying_key = Some(verifying_key);
        self
    }

    fn call<T>(
        &self,
        op: &str,
        f: impl Fn(&A) -> Result<T, AuthorityError>,
    ) -> LicenseResult<T> {
        let mut attempt = 0;
        loop {
            match f(&self.authority) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.policy.retries => {
                    attempt += 1;
                    warn!(op, attempt, error = %e, "Authority call failed, retrying");
                    std::thread::sleep(self.policy.backoff(attempt));
                }
                Err(e) => {
                    warn!(op, attempts = attempt + 1, error = %e, "Authority call failed");
                    return Err(LicenseError::AuthorityUnavailable(format!("{op}: {e}")));
                }
            }
        }
    }
}

impl<A: Authority> Signer for RemoteSigner<A> {
    fn mode(&self) -> AuthMode {
        AuthMode::Remote
    }

    fn sign(&self, payload: &[u8]) -> LicenseResult<Signature> {
        self.call("sign", |a| a.sign(payload))
    }

    fn verify(&self, payload: &[u8], signature: &Signature) -> LicenseResult<bool> {
        if let Some(vk) = &self.verifying_key {
            debug!("Verifying serial with local copy of authority key");
            return Ok(vk.verify_strict(payload, signature).is_ok());
        }
        self.call("verify", |a| a.verify(payload, signature))
    }

    fn key_id(&self) -> Option<String> {
        self.verifying_key.as_ref().map(key::key_id)
    }
}

// ── Wire types ───────────────────────────────────────────────────

/// `POST /api/v1/sign` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignRequest {
    /// Canonical payload bytes.
    pub payload: String,
}

/// `POST /api/v1/sign` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignResponse {
    /// 64-byte Ed25519 signature.
    pub signature: String,
}

/// `POST /api/v1/verify` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyRequest {
    /// Canonical payload bytes.
    pub payload: String,
    /// 64-byte Ed25519 signature.
    pub signature: String,
}

/// `POST /api/v1/verify` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyResponse {
    /// Whether the signature is valid.
    pub valid: bool,
    /// Expiration of the verified payload (RFC 3339), when valid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_at: Option<String>,
}

/// `GET /api/v1/public-key` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyResponse {
    /// Base64 of the raw 32-byte public key.
    pub public_key: String,
    /// Short key identifier.
    pub key_id: String,
}

#[cfg(feature = "online")]
pub use online::{detect_public_ip, HttpAuthority, DEFAULT_IP_ECHO_URL};

#[cfg(feature = "online")]
mod online {
    use super::*;
    use crate::host::HostId;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use reqwest::blocking::Client;
    use std::time::Duration;

    /// Plain-text service echoing the caller's public IP.
    pub const DEFAULT_IP_ECHO_URL: &str = "https://api64.ipify.org";

    /// [`Authority`] reached over HTTP.
    #[derive(Debug, Clone)]
    pub struct HttpAuthority {
        client: Client,
        base_url: String,
    }

    impl HttpAuthority {
        /// Builds a client with the per-request timeout from `config`.
        ///
        /// # Errors
        ///
        /// Returns [`LicenseError::InvalidParams`] if the HTTP client cannot be built.
        pub fn new(config: &AuthorityConfig) -> LicenseResult<Self> {
            let client = Client::builder()
                .timeout(config.timeout())
                .build()
                .map_err(|e| LicenseError::InvalidParams(format!("authority client: {e}")))?;
            Ok(Self {
                client,
                base_url: config.url.trim_end_matches('/').to_string(),
            })
        }

        fn post<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
            &self,
            path: &str,
            body: &Req,
        ) -> Result<Resp, AuthorityError> {
            let resp = self
                .client
                .post(format!("{}{path}", self.base_url))
                .json(body)
                .send()
                .map_err(map_reqwest)?;

            let status = resp.status();
            if status.is_server_error() {
                return Err(AuthorityError::Transport(format!("{path} returned {status}")));
            }
            if !status.is_success() {
                return Err(AuthorityError::Protocol(format!("{path} returned {status}")));
            }
            resp.json().map_err(|e| AuthorityError::Protocol(e.to_string()))
        }
    }

    impl Authority for HttpAuthority {
        fn sign(&self, payload: &[u8]) -> Result<Signature, AuthorityError> {
            let resp: SignResponse = self.post(
                "/api/v1/sign",
                &SignRequest {
                    payload: BASE64.encode(payload),
                },
            )?;
            let bytes = BASE64
                .decode(&resp.signature)
                .map_err(|e| AuthorityError::Protocol(format!("signature base64: {e}")))?;
            Signature::from_slice(&bytes)
                .map_err(|_| AuthorityError::Protocol("signature length".into()))
        }

        fn verify(&self, payload: &[u8], signature: &Signature) -> Result<bool, AuthorityError> {
            let resp: VerifyResponse = self.post(
                "/api/v1/verify",
                &VerifyRequest {
                    payload: BASE64.encode(payload),
                    signature: BASE64.encode(signature.to_bytes()),
                },
            )?;
            Ok(resp.valid)
        }
    }

    fn map_reqwest(e: reqwest::Error) -> AuthorityError {
        if e.is_timeout() {
            AuthorityError::Timeout
        } else {
            AuthorityError::Transport(e.to_string())
        }
    }

    /// Asks an IP echo service for this host's public IP.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::AuthorityUnavailable`] if the service cannot
    /// be reached and [`LicenseError::InvalidParams`] if it answers with
    /// something that is not an IP address.
    pub fn detect_public_ip(echo_url: &str, timeout: Duration) -> LicenseResult<HostId> {
        let body = Client::builder()
            .timeout(timeout)
            .build()
            .and_then(|c| c.get(echo_url).send())
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.text())
            .map_err(|e| LicenseError::AuthorityUnavailable(format!("public IP lookup: {e}")))?;

        let host = HostId::parse(body.trim())?;
        if !host.is_ip() {
            return Err(LicenseError::InvalidParams(format!(
                "IP echo service returned a non-IP: {}",
                body.trim()
            )));
        }
        Ok(host)
    }
}
