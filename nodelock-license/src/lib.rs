//! Node-locked licensing.
//!
//! This crate handles:
//! - Issuing serials that bind a license to one host (IPv4, IPv6 or name)
//! - Binding a serial to an installation via a local record
//! - Offline verification of the binding on every run
//! - Reissuing a license when its host changes address
//!
//! # Trust modes
//!
//! - **LOCAL**: the issuer key lives in the storage root; the machine that
//!   verifies can also issue.
//! - **REMOTE**: only the authority holds the issuer key. Hosts verify with a
//!   distributed public key, or by asking the authority.
//!
//! # Serial format
//!
//! A serial is `base64url(payload || signature)` where the payload is a
//! fixed binary layout (version, issuer mode, host, issued-at, expires-at)
//! and the signature is Ed25519 over the payload bytes. See [`codec`].
//!
//! # Example
//!
//! ```no_run
//! use nodelock_license::{AuthConfig, AuthMode, LicenseManager};
//!
//! let manager = LicenseManager::init(AuthConfig::new(AuthMode::Local, "/var/lib/myapp"))?;
//! let serial = manager.issue("203.0.113.7")?;
//! manager.bind("203.0.113.7", serial.as_str())?;
//! manager.verify("203.0.113.7", serial.as_str())?;
//! # Ok::<(), nodelock_license::LicenseError>(())
//! ```

mod authority;
mod clock;
pub mod codec;
mod config;
mod error;
mod host;
pub mod key;
mod manager;
mod signer;
mod store;

pub use authority::{
    Authority, AuthorityError, PublicKeyResponse, RemoteSigner, SignRequest, SignResponse,
    VerifyRequest, VerifyResponse,
};
pub use clock::{Clock, FixedClock, SystemClock};
pub use codec::{LicensePayload, Serial, MAX_SERIAL_LEN, MIN_SERIAL_BUFFER, SERIAL_VERSION};
pub use config::{
    default_storage_root, AuthConfig, AuthMode, AuthorityConfig, DEFAULT_KEY_FILE, DEFAULT_VALIDITY_SECS,
    MAX_VALIDITY_SECS,
};
pub use error::*;
pub use host::HostId;
pub use manager::{LicenseManager, LicenseStatus};
pub use signer::{LocalSigner, PublicKeyVerifier, Signer};
pub use store::{BindingRecord, BindingStore, StoreLock, LOCK_FILE, RECORD_FILE};

#[cfg(feature = "online")]
pub use authority::{detect_public_ip, HttpAuthority, DEFAULT_IP_ECHO_URL};
