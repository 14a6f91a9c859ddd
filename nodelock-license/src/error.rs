//! Error types for the licensing module.

use thiserror::Error;

/// Success.
pub const AUTH_OK: i32 = 0;
/// Invalid parameters, or the auth system was not initialized.
pub const AUTH_ERR_INVALID_PARAMS: i32 = -1;
/// Serial number failed to decode.
pub const AUTH_ERR_INVALID_SERIAL: i32 = -2;
/// Binding record or key material could not be read or written.
pub const AUTH_ERR_SERIAL_IO: i32 = -3;
/// IP or serial number does not match.
pub const AUTH_ERR_MISMATCH: i32 = -4;
/// Binding write failed.
pub const AUTH_ERR_BIND_FAIL: i32 = -5;
/// No binding record exists.
pub const AUTH_ERR_NOT_BOUND: i32 = -6;
/// Current time is past the license expiration.
pub const AUTH_ERR_EXPIRED: i32 = -7;
/// Signature verification failed.
pub const AUTH_ERR_SIGN_MISMATCH: i32 = -8;

/// Licensing-specific errors.
#[derive(Debug, Error)]
pub enum LicenseError {
    /// Null, empty, oversized or otherwise invalid input.
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    /// The auth system has not been initialized.
    #[error("auth system not initialized")]
    NotInitialized,

    /// Serial number is malformed and cannot be decoded.
    #[error("invalid serial: {0}")]
    InvalidSerial(String),

    /// Ed25519 signature verification failed.
    #[error("serial signature invalid")]
    SignatureMismatch,

    /// Decoded IP or serial differs from the caller-supplied value.
    #[error("license mismatch: {0}")]
    Mismatch(String),

    /// License has expired.
    #[error("license expired on {0}")]
    Expired(String),

    /// No binding record exists for this installation.
    #[error("license not bound")]
    NotBound,

    /// Persisting the binding record failed.
    #[error("bind failed: {0}")]
    BindFailed(String),

    /// The binding record exists but cannot be parsed.
    #[error("binding record corrupt: {0}")]
    CorruptRecord(String),

    /// Storage or key material I/O error.
    #[error("storage error: {0}")]
    Storage(String),

    /// The remote authority could not be reached within the retry budget.
    #[error("authority unavailable: {0}")]
    AuthorityUnavailable(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LicenseError {
    /// Returns the numeric status code for this error.
    ///
    /// I/O-class failures (`Storage`, `CorruptRecord`, `AuthorityUnavailable`,
    /// `Serialization`) all report [`AUTH_ERR_SERIAL_IO`] so callers can tell
    /// "could not check" apart from "checked and invalid".
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidParams(_) | Self::NotInitialized => AUTH_ERR_INVALID_PARAMS,
            Self::InvalidSerial(_) => AUTH_ERR_INVALID_SERIAL,
            Self::Storage(_)
            | Self::CorruptRecord(_)
            | Self::AuthorityUnavailable(_)
            | Self::Serialization(_) => AUTH_ERR_SERIAL_IO,
            Self::Mismatch(_) => AUTH_ERR_MISMATCH,
            Self::BindFailed(_) => AUTH_ERR_BIND_FAIL,
            Self::NotBound => AUTH_ERR_NOT_BOUND,
            Self::Expired(_) => AUTH_ERR_EXPIRED,
            Self::SignatureMismatch => AUTH_ERR_SIGN_MISMATCH,
        }
    }
}

impl From<std::io::Error> for LicenseError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Result type for license operations.
pub type LicenseResult<T> = Result<T, LicenseError>;
