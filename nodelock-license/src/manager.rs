//! License manager: issue, reissue, bind and verify.
//!
//! Installation lifecycle:
//!
//! ```text
//! UNBOUND --bind--> BOUND --time passes--> EXPIRED --bind fresh serial--> BOUND
//! ```
//!
//! There is no terminal state; an installation can be rebound indefinitely.

use crate::clock::{Clock, SystemClock};
use crate::codec::{LicensePayload, Serial};
use crate::config::{AuthConfig, AuthMode};
use crate::error::{LicenseError, LicenseResult};
use crate::host::HostId;
use crate::key;
use crate::signer::{LocalSigner, PublicKeyVerifier, Signer};
use crate::store::{BindingRecord, BindingStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Summary of an installation's binding, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "state")]
pub enum LicenseStatus {
    /// No binding record exists.
    Unbound,
    /// Bound to this host and not expired.
    Active {
        /// Expiration of the bound serial.
        expires_at: DateTime<Utc>,
        /// Whole days until expiration.
        days_remaining: u32,
    },
    /// Bound to this host, but past expiration.
    Expired {
        /// When the bound serial expired.
        expired_at: DateTime<Utc>,
    },
    /// A record exists but is for another host or fails verification.
    Mismatched,
    /// The record exists but cannot be parsed.
    Corrupt,
}

impl LicenseStatus {
    /// Returns true if the software may run.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Active { .. })
    }
}

/// Issues, binds and verifies node-locked serials for one installation.
pub struct LicenseManager {
    config: AuthConfig,
    signer: Arc<dyn Signer>,
    store: BindingStore,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for LicenseManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LicenseManager")
            .field("mode", &self.config.mode)
            .field("storage_root", &self.config.storage_root)
            .field("key_id", &self.signer.key_id())
            .finish()
    }
}

impl LicenseManager {
    /// Initializes a manager from `config` using the system clock.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::InvalidParams`] for an invalid configuration or
    /// an unusable storage root, and an I/O-class error if key material
    /// cannot be loaded.
    pub fn init(config: AuthConfig) -> LicenseResult<Self> {
        Self::init_with_clock(config, Arc::new(SystemClock))
    }

    /// Initializes a manager with an explicit clock.
    ///
    /// # Errors
    ///
    /// See [`LicenseManager::init`].
    pub fn init_with_clock(config: AuthConfig, clock: Arc<dyn Clock>) -> LicenseResult<Self> {
        config.validate()?;
        let store = BindingStore::open(&config.storage_root)?;
        let signer = build_signer(&config)?;
        Ok(Self::assemble(config, signer, store, clock))
    }

    /// Initializes a manager around a caller-provided signer, e.g. a
    /// [`RemoteSigner`](crate::RemoteSigner) over a custom [`Authority`](crate::Authority).
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::InvalidParams`] if the signer's mode differs
    /// from `config.mode`, the validity window is out of range, or the
    /// storage root is unusable.
    pub fn with_signer(
        config: AuthConfig,
        signer: Arc<dyn Signer>,
        clock: Arc<dyn Clock>,
    ) -> LicenseResult<Self> {
        if signer.mode() != config.mode {
            return Err(LicenseError::InvalidParams(format!(
                "signer mode {:?} does not match configured mode {:?}",
                signer.mode(),
                config.mode
            )));
        }
        config.validate_validity()?;
        let store = BindingStore::open(&config.storage_root)?;
        Ok(Self::assemble(config, signer, store, clock))
    }

    fn assemble(
        config: AuthConfig,
        signer: Arc<dyn Signer>,
        store: BindingStore,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let key_id = signer.key_id().unwrap_or_else(|| "-".into());
        info!(
            mode = ?config.mode,
            storage_root = %config.storage_root.display(),
            key_id = %key_id,
            "License manager initialized"
        );
        Self {
            config,
            signer,
            store,
            clock,
        }
    }

    /// The configured trust mode.
    #[must_use]
    pub fn mode(&self) -> AuthMode {
        self.config.mode
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// The storage root holding the binding record.
    #[must_use]
    pub fn storage_root(&self) -> &Path {
        self.store.root()
    }

    /// Issues a serial for `ip`, valid for the configured window from now.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::InvalidParams`] if `ip` is not a valid host
    /// identifier, and an I/O-class error if no signing key is reachable.
    pub fn issue(&self, ip: &str) -> LicenseResult<Serial> {
        let host = HostId::parse(ip)?;
        self.issue_for(host)
    }

    fn issue_for(&self, host: HostId) -> LicenseResult<Serial> {
        let now = self.clock.now_secs();
        let expires_at = now
            .checked_add(self.config.validity_secs)
            .filter(|secs| DateTime::from_timestamp(*secs, 0).is_some())
            .ok_or_else(|| {
                LicenseError::InvalidParams("expiration is outside the supported calendar range".into())
            })?;
        let payload = LicensePayload {
            host,
            issued_at: now,
            expires_at,
            issuer: self.signer.mode(),
        };

        let signature = self.signer.sign(&payload.to_bytes())?;
        info!(
            host = %payload.host,
            expires_at = %payload.expires_at_utc(),
            "Issued license"
        );
        Ok(Serial::encode(payload, signature))
    }

    /// Issues a fresh serial for `new_ip` in exchange for a genuine serial
    /// issued to `old_ip`.
    ///
    /// The old serial may already be expired: reissue migrates a license to
    /// a new host, it does not renew one. Its signature is still required.
    /// The installation is not rebound.
    ///
    /// # Errors
    ///
    /// - [`LicenseError::InvalidParams`] for malformed IPs
    /// - [`LicenseError::InvalidSerial`] if `old_serial` does not decode
    /// - [`LicenseError::SignatureMismatch`] if `old_serial` is forged
    /// - [`LicenseError::Mismatch`] if `old_serial` was not issued to `old_ip`
    pub fn reissue(&self, old_ip: &str, new_ip: &str, old_serial: &str) -> LicenseResult<Serial> {
        let old_host = HostId::parse(old_ip)?;
        let new_host = HostId::parse(new_ip)?;

        let old = self.decode_verified(old_serial)?;
        if old.payload().host != old_host {
            warn!(claimed = %old_host, actual = %old.payload().host, "Reissue rejected: host mismatch");
            return Err(LicenseError::Mismatch(format!(
                "serial was issued to {}, not {old_host}",
                old.payload().host
            )));
        }

        debug!(from = %old_host, to = %new_host, "Reissuing license");
        self.issue_for(new_host)
    }

    /// Binds `serial` to this installation for `ip`.
    ///
    /// Rebinding with another valid serial replaces the existing record.
    /// Either the new record is fully written or the previous state is left
    /// untouched.
    ///
    /// # Errors
    ///
    /// - [`LicenseError::InvalidParams`] for a malformed IP
    /// - [`LicenseError::InvalidSerial`] if `serial` does not decode
    /// - [`LicenseError::SignatureMismatch`] if `serial` is forged
    /// - [`LicenseError::Mismatch`] if `serial` was issued to another host
    /// - [`LicenseError::Expired`] if `serial` has expired
    /// - [`LicenseError::BindFailed`] or an I/O-class error if persisting fails
    pub fn bind(&self, ip: &str, serial: &str) -> LicenseResult<BindingRecord> {
        let host = HostId::parse(ip)?;
        let serial = self.decode_verified(serial)?;
        let payload = serial.payload();

        if payload.host != host {
            warn!(host = %host, serial_host = %payload.host, "Bind rejected: host mismatch");
            return Err(LicenseError::Mismatch(format!(
                "serial was issued to {}, not {host}",
                payload.host
            )));
        }

        let now = self.clock.now();
        if now.timestamp() > payload.expires_at {
            warn!(host = %host, expired_at = %payload.expires_at_utc(), "Bind rejected: serial expired");
            return Err(LicenseError::Expired(payload.expires_at_utc().to_rfc3339()));
        }

        let lock = self.store.lock()?;

        match self.store.load() {
            Ok(Some(existing))
                if existing.bound_serial == serial.as_str() && existing.bound_ip == host.to_string() =>
            {
                debug!(host = %host, "Serial already bound");
                return Ok(existing);
            }
            Ok(Some(existing)) => {
                info!(previous = %existing.bound_ip, host = %host, "Replacing existing binding");
            }
            Ok(None) => {}
            Err(LicenseError::CorruptRecord(e)) => {
                warn!(error = %e, "Overwriting corrupt binding record");
            }
            Err(e) => return Err(e),
        }

        let record = BindingRecord {
            bound_ip: host.to_string(),
            bound_serial: serial.as_str().to_string(),
            expiration: payload.expires_at_utc(),
            bound_at: now,
            hostname: current_hostname(),
        };
        self.store.save(&record, &lock)?;

        info!(host = %host, expires_at = %record.expiration, "License bound");
        Ok(record)
    }

    /// Verifies that this installation is bound to `serial` for `ip` and
    /// the license has not expired. Read-only.
    ///
    /// # Errors
    ///
    /// - [`LicenseError::InvalidParams`] for a malformed IP
    /// - [`LicenseError::NotBound`] if no binding record exists
    /// - [`LicenseError::CorruptRecord`] if the record cannot be parsed
    /// - [`LicenseError::InvalidSerial`] if `serial` does not decode
    /// - [`LicenseError::SignatureMismatch`] if `serial` is forged
    /// - [`LicenseError::Mismatch`] if the host or serial differ from the binding
    /// - [`LicenseError::Expired`] if the license has expired
    pub fn verify(&self, ip: &str, serial: &str) -> LicenseResult<()> {
        let host = HostId::parse(ip)?;
        let record = self.store.load()?.ok_or(LicenseError::NotBound)?;

        let serial = self.decode_verified(serial)?;
        let payload = serial.payload();

        if payload.host != host || record.bound_ip != host.to_string() {
            warn!(
                host = %host,
                serial_host = %payload.host,
                bound_ip = %record.bound_ip,
                "Verification failed: host mismatch"
            );
            return Err(LicenseError::Mismatch(format!(
                "license is bound to {}, serial issued to {}, running on {host}",
                record.bound_ip, payload.host
            )));
        }

        if record.bound_serial != serial.as_str() {
            warn!(host = %host, "Verification failed: serial differs from bound serial");
            return Err(LicenseError::Mismatch("serial differs from bound serial".into()));
        }

        if record.expiration.timestamp() != payload.expires_at {
            warn!(host = %host, "Verification failed: record expiration differs from serial");
            return Err(LicenseError::Mismatch(
                "binding record does not match the serial".into(),
            ));
        }

        if self.clock.now_secs() > payload.expires_at {
            warn!(host = %host, expired_at = %payload.expires_at_utc(), "Verification failed: license expired");
            return Err(LicenseError::Expired(payload.expires_at_utc().to_rfc3339()));
        }

        debug!(host = %host, "License verified");
        Ok(())
    }

    /// Summarizes the binding state for `ip` without failing on license
    /// problems.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::InvalidParams`] for a malformed IP and an
    /// I/O-class error if the record or the verdict cannot be obtained.
    pub fn status(&self, ip: &str) -> LicenseResult<LicenseStatus> {
        HostId::parse(ip)?;
        let record = match self.store.load() {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(LicenseStatus::Unbound),
            Err(LicenseError::CorruptRecord(_)) => return Ok(LicenseStatus::Corrupt),
            Err(e) => return Err(e),
        };

        match self.verify(ip, &record.bound_serial) {
            Ok(()) => {
                let secs_left = record.expiration.timestamp() - self.clock.now_secs();
                let days_remaining = u32::try_from(secs_left / (24 * 60 * 60)).unwrap_or(u32::MAX);
                Ok(LicenseStatus::Active {
                    expires_at: record.expiration,
                    days_remaining,
                })
            }
            Err(LicenseError::Expired(_)) => Ok(LicenseStatus::Expired {
                expired_at: record.expiration,
            }),
            Err(
                LicenseError::Mismatch(_)
                | LicenseError::SignatureMismatch
                | LicenseError::InvalidSerial(_),
            ) => Ok(LicenseStatus::Mismatched),
            Err(e) => Err(e),
        }
    }

    /// Returns the stored binding record, if any.
    ///
    /// # Errors
    ///
    /// Returns an I/O-class error if the record cannot be read or parsed.
    pub fn binding(&self) -> LicenseResult<Option<BindingRecord>> {
        self.store.load()
    }

    fn decode_verified(&self, serial: &str) -> LicenseResult<Serial> {
        let serial = Serial::decode(serial)?;
        if !self.signer.verify(&serial.signed_bytes(), serial.signature())? {
            warn!(host = %serial.payload().host, "Serial signature mismatch");
            return Err(LicenseError::SignatureMismatch);
        }
        Ok(serial)
    }
}

fn build_signer(config: &AuthConfig) -> LicenseResult<Arc<dyn Signer>> {
    match config.mode {
        AuthMode::Local => {
            let signing_key = key::load_or_generate_signing_key(&config.key_path())?;
            Ok(Arc::new(LocalSigner::new(signing_key)))
        }
        AuthMode::Remote => build_remote_signer(config),
    }
}

#[cfg(feature = "online")]
fn build_remote_signer(config: &AuthConfig) -> LicenseResult<Arc<dyn Signer>> {
    use crate::authority::{HttpAuthority, RemoteSigner};

    let verifying_key = config.public_key.as_deref().map(key::parse_public_key).transpose()?;

    match (&config.authority, verifying_key) {
        (Some(authority), vk) => {
            let mut signer = RemoteSigner::new(HttpAuthority::new(authority)?, authority);
            if let Some(vk) = vk {
                signer = signer.with_verifying_key(vk);
            }
            Ok(Arc::new(signer))
        }
        (None, Some(vk)) => Ok(Arc::new(PublicKeyVerifier::new(vk))),
        (None, None) => Err(LicenseError::InvalidParams(
            "REMOTE mode needs a public key or an authority".into(),
        )),
    }
}

#[cfg(not(feature = "online"))]
fn build_remote_signer(config: &AuthConfig) -> LicenseResult<Arc<dyn Signer>> {
    match (&config.public_key, &config.authority) {
        (Some(material), authority) => {
            if authority.is_some() {
                warn!("Authority configured but the `online` feature is disabled; verifying with the public key only");
            }
            Ok(Arc::new(PublicKeyVerifier::from_material(material)?))
        }
        (None, _) => Err(LicenseError::InvalidParams(
            "REMOTE authority support requires the `online` feature".into(),
        )),
    }
}

fn current_hostname() -> Option<String> {
    hostname::get().ok().and_then(|h| h.into_string().ok())
}
