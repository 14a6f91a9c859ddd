//! Configuration for the license manager.
//!
//! An [`AuthConfig`] carries everything the manager needs: the trust mode,
//! where the binding record and key material live, how long issued serials
//! stay valid, and (for REMOTE mode) where verification material comes from.

use crate::error::{LicenseError, LicenseResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default validity window for newly issued serials (365 days).
pub const DEFAULT_VALIDITY_SECS: i64 = 365 * 24 * 60 * 60;

/// Longest validity window accepted (100 years), so every expiration stays
/// within the representable calendar range.
pub const MAX_VALIDITY_SECS: i64 = 100 * 365 * 24 * 60 * 60;

const SECS_PER_DAY: i64 = 24 * 60 * 60;

/// Default file name of the LOCAL issuer key inside the storage root.
pub const DEFAULT_KEY_FILE: &str = "issuer.key";

const ENV_HOME: &str = "NODELOCK_HOME";
const ENV_VALIDITY_DAYS: &str = "NODELOCK_VALIDITY_DAYS";
const ENV_PUBLIC_KEY: &str = "NODELOCK_PUBLIC_KEY";
const ENV_AUTHORITY_URL: &str = "NODELOCK_AUTHORITY_URL";

/// Who holds the signing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Issuer and verifier are the same binary with the same key.
    Local,
    /// Verification uses public material or a remote authority.
    Remote,
}

impl AuthMode {
    /// Converts the numeric mode used by the C ABI (`0` LOCAL, `1` REMOTE).
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::InvalidParams`] for any other value.
    pub fn from_raw(raw: i32) -> LicenseResult<Self> {
        match raw {
            0 => Ok(Self::Local),
            1 => Ok(Self::Remote),
            other => Err(LicenseError::InvalidParams(format!(
                "unknown auth mode: {other}"
            ))),
        }
    }

    /// Returns the numeric mode used by the C ABI and the serial format.
    #[must_use]
    pub fn as_raw(&self) -> u8 {
        match self {
            Self::Local => 0,
            Self::Remote => 1,
        }
    }
}

/// Connection settings for a remote authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityConfig {
    /// Base URL of the authority service.
    pub url: String,
    /// Per-request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Retries after the first failed attempt.
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Base backoff between attempts in milliseconds (multiplied by attempt number).
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl AuthorityConfig {
    /// Creates settings for `url` with default timeout and retry policy.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout_ms: default_timeout_ms(),
            retries: default_retries(),
            backoff_ms: default_backoff_ms(),
        }
    }

    /// Per-request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(u64::from(attempt)))
    }
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_retries() -> u32 {
    2
}

fn default_backoff_ms() -> u64 {
    200
}

fn default_validity_secs() -> i64 {
    DEFAULT_VALIDITY_SECS
}

fn default_key_file() -> String {
    DEFAULT_KEY_FILE.to_string()
}

/// License manager configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Trust mode.
    pub mode: AuthMode,
    /// Directory holding the binding record and LOCAL key material.
    pub storage_root: PathBuf,
    /// Validity window of newly issued serials, in seconds.
    #[serde(default = "default_validity_secs")]
    pub validity_secs: i64,
    /// LOCAL issuer key file name, relative to `storage_root`.
    #[serde(default = "default_key_file")]
    pub key_file: String,
    /// REMOTE public verification key: base64 of the raw 32-byte key, or
    /// base64 of a PEM `PUBLIC KEY` block.
    #[serde(default)]
    pub public_key: Option<String>,
    /// REMOTE authority settings.
    #[serde(default)]
    pub authority: Option<AuthorityConfig>,
}

impl AuthConfig {
    /// Creates a configuration with default validity and key file.
    pub fn new(mode: AuthMode, storage_root: impl Into<PathBuf>) -> Self {
        Self {
            mode,
            storage_root: storage_root.into(),
            validity_secs: DEFAULT_VALIDITY_SECS,
            key_file: DEFAULT_KEY_FILE.to_string(),
            public_key: None,
            authority: None,
        }
    }

    /// Builds a configuration from the process environment.
    ///
    /// Reads `NODELOCK_HOME`, `NODELOCK_VALIDITY_DAYS`, `NODELOCK_PUBLIC_KEY`
    /// and `NODELOCK_AUTHORITY_URL`.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::InvalidParams`] if `NODELOCK_VALIDITY_DAYS` is
    /// not a positive integer or exceeds [`MAX_VALIDITY_SECS`].
    pub fn from_env(mode: AuthMode) -> LicenseResult<Self> {
        let storage_root = env::var_os(ENV_HOME)
            .map(PathBuf::from)
            .unwrap_or_else(default_storage_root);

        let mut config = Self::new(mode, storage_root);

        if let Ok(days) = env::var(ENV_VALIDITY_DAYS) {
            config.validity_secs = parse_validity_days(&days)?;
        }

        config.public_key = env::var(ENV_PUBLIC_KEY).ok().filter(|k| !k.trim().is_empty());
        config.authority = env::var(ENV_AUTHORITY_URL)
            .ok()
            .filter(|u| !u.trim().is_empty())
            .map(AuthorityConfig::new);

        Ok(config)
    }

    /// Sets the validity window of newly issued serials.
    #[must_use]
    pub fn with_validity(mut self, validity: Duration) -> Self {
        self.validity_secs = i64::try_from(validity.as_secs()).unwrap_or(i64::MAX);
        self
    }

    /// Sets the REMOTE public verification key.
    #[must_use]
    pub fn with_public_key(mut self, public_key: impl Into<String>) -> Self {
        self.public_key = Some(public_key.into());
        self
    }

    /// Sets the REMOTE authority.
    #[must_use]
    pub fn with_authority(mut self, authority: AuthorityConfig) -> Self {
        self.authority = Some(authority);
        self
    }

    /// Path of the LOCAL issuer key.
    #[must_use]
    pub fn key_path(&self) -> PathBuf {
        self.storage_root.join(&self.key_file)
    }

    /// Checks the configuration for values no manager could work with.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::InvalidParams`] describing the first problem.
    pub fn validate(&self) -> LicenseResult<()> {
        if self.storage_root.as_os_str().is_empty() {
            return Err(LicenseError::InvalidParams("storage root must not be empty".into()));
        }
        self.validate_validity()?;
        if self.key_file.is_empty() || self.key_file.contains(['/', '\\']) {
            return Err(LicenseError::InvalidParams(format!(
                "key file must be a plain file name: {:?}",
                self.key_file
            )));
        }
        if self.mode == AuthMode::Remote && self.public_key.is_none() && self.authority.is_none() {
            return Err(LicenseError::InvalidParams(
                "REMOTE mode needs a public key or an authority".into(),
            ));
        }
        Ok(())
    }

    /// Checks that the validity window is positive and at most
    /// [`MAX_VALIDITY_SECS`].
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::InvalidParams`] otherwise.
    pub fn validate_validity(&self) -> LicenseResult<()> {
        if self.validity_secs <= 0 {
            return Err(LicenseError::InvalidParams("validity window must be positive".into()));
        }
        if self.validity_secs > MAX_VALIDITY_SECS {
            return Err(LicenseError::InvalidParams(format!(
                "validity window exceeds {} days",
                MAX_VALIDITY_SECS / SECS_PER_DAY
            )));
        }
        Ok(())
    }
}

fn parse_validity_days(raw: &str) -> LicenseResult<i64> {
    let invalid = || {
        LicenseError::InvalidParams(format!(
            "{ENV_VALIDITY_DAYS} must be between 1 and {} days",
            MAX_VALIDITY_SECS / SECS_PER_DAY
        ))
    };
    raw.trim()
        .parse::<i64>()
        .ok()
        .filter(|d| *d > 0)
        .and_then(|d| d.checked_mul(SECS_PER_DAY))
        .filter(|secs| *secs <= MAX_VALIDITY_SECS)
        .ok_or_else(invalid)
}

/// Default storage root: the platform's local data directory, or the current
/// directory when that cannot be determined.
#[must_use]
pub fn default_storage_root() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("nodelock"))
        .or_else(|| env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}
