//! Serial number encoding and decoding.
//!
//! A serial is a fixed binary frame rendered as unpadded URL-safe base64:
//!
//! ```text
//! version:u8 | issuer:u8 | host_tag:u8 | host bytes | issued_at:i64 | expires_at:i64 | signature:[u8; 64]
//! ```
//!
//! Host bytes are 4 bytes for IPv4 (`host_tag = 4`), 16 bytes for IPv6
//! (`host_tag = 6`), or a length-prefixed lowercase name (`host_tag = b'h'`).
//! Integers are big-endian. The signature covers every byte before it, which
//! is exactly [`LicensePayload::to_bytes`].
//!
//! Decoding is fail-closed: any frame that would not be produced by
//! [`Serial::encode`] is rejected, so one payload has exactly one encoding.

use crate::config::AuthMode;
use crate::error::{LicenseError, LicenseResult};
use crate::host::HostId;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, SIGNATURE_LENGTH};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Current serial frame version.
pub const SERIAL_VERSION: u8 = 1;

/// Smallest output buffer the C ABI accepts for a serial.
///
/// Real serials are longer (116 characters for an IPv4 host); callers
/// should allocate `MAX_SERIAL_LEN + 1` bytes.
pub const MIN_SERIAL_BUFFER: usize = 32;

/// Longest serial string accepted by the decoder.
pub const MAX_SERIAL_LEN: usize = 512;

const TAG_V4: u8 = 4;
const TAG_V6: u8 = 6;
const TAG_NAME: u8 = b'h';

/// The signed content of a serial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicensePayload {
    /// Host the license is locked to.
    pub host: HostId,
    /// Issued-at timestamp (seconds since epoch).
    pub issued_at: i64,
    /// Expiration timestamp (seconds since epoch).
    pub expires_at: i64,
    /// Mode of the issuer that signed this payload.
    pub issuer: AuthMode,
}

impl LicensePayload {
    /// Returns the canonical byte encoding that signatures cover.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        out.push(SERIAL_VERSION);
        out.push(self.issuer.as_raw());
        match &self.host {
            HostId::V4(ip) => {
                out.push(TAG_V4);
                out.extend_from_slice(&ip.octets());
            }
            HostId::V6(ip) => {
                out.push(TAG_V6);
                out.extend_from_slice(&ip.octets());
            }
            HostId::Name(name) => {
                out.push(TAG_NAME);
                // HostId guarantees names fit in 253 bytes
                out.push(name.len() as u8);
                out.extend_from_slice(name.as_bytes());
            }
        }
        out.extend_from_slice(&self.issued_at.to_be_bytes());
        out.extend_from_slice(&self.expires_at.to_be_bytes());
        out
    }

    /// Decodes a payload, requiring every byte of `bytes` to be consumed.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::InvalidSerial`] for any non-canonical input.
    pub fn from_bytes(bytes: &[u8]) -> LicenseResult<Self> {
        let mut reader = Reader::new(bytes);

        let version = reader.u8()?;
        if version != SERIAL_VERSION {
            return Err(invalid(format!("unsupported serial version {version}")));
        }

        let issuer = AuthMode::from_raw(i32::from(reader.u8()?))
            .map_err(|_| invalid("unknown issuer mode"))?;

        let host = match reader.u8()? {
            TAG_V4 => {
                let octets: [u8; 4] = reader.array()?;
                HostId::V4(Ipv4Addr::from(octets))
            }
            TAG_V6 => {
                let octets: [u8; 16] = reader.array()?;
                let ip = Ipv6Addr::from(octets);
                if ip.to_ipv4_mapped().is_some() {
                    return Err(invalid("IPv4-mapped address must use the IPv4 tag"));
                }
                HostId::V6(ip)
            }
            TAG_NAME => {
                let len = usize::from(reader.u8()?);
                let raw = reader.take(len)?;
                let name = std::str::from_utf8(raw).map_err(|_| invalid("host name is not UTF-8"))?;
                match HostId::parse(name) {
                    Ok(host @ HostId::Name(_)) if host.to_string() == name => host,
                    _ => return Err(invalid("host name is not canonical")),
                }
            }
            tag => return Err(invalid(format!("unknown host tag {tag}"))),
        };

        let issued_at = i64::from_be_bytes(reader.array()?);
        let expires_at = i64::from_be_bytes(reader.array()?);

        if !reader.is_empty() {
            return Err(invalid("trailing bytes after payload"));
        }
        if expires_at <= issued_at {
            return Err(invalid("expiration precedes issue time"));
        }
        if DateTime::from_timestamp(issued_at, 0).is_none() || DateTime::from_timestamp(expires_at, 0).is_none() {
            return Err(invalid("timestamp outside the supported calendar range"));
        }

        Ok(Self {
            host,
            issued_at,
            expires_at,
            issuer,
        })
    }

    /// Expiration as a UTC datetime.
    #[must_use]
    pub fn expires_at_utc(&self) -> DateTime<Utc> {
        timestamp_utc(self.expires_at)
    }

    /// Issue time as a UTC datetime.
    #[must_use]
    pub fn issued_at_utc(&self) -> DateTime<Utc> {
        timestamp_utc(self.issued_at)
    }
}

/// An encoded, signed serial number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Serial {
    raw: String,
    payload: LicensePayload,
    signature: Signature,
}

impl Serial {
    /// Encodes a payload and its signature into a serial.
    #[must_use]
    pub fn encode(payload: LicensePayload, signature: Signature) -> Self {
        let mut frame = payload.to_bytes();
        frame.extend_from_slice(&signature.to_bytes());
        Self {
            raw: URL_SAFE_NO_PAD.encode(&frame),
            payload,
            signature,
        }
    }

    /// Decodes a serial string. The signature is not checked here.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::InvalidSerial`] if the string is empty, too
    /// long, not base64url, or not a canonical frame.
    pub fn decode(serial: &str) -> LicenseResult<Self> {
        let serial = serial.trim();
        if serial.is_empty() {
            return Err(invalid("serial is empty"));
        }
        if serial.len() > MAX_SERIAL_LEN {
            return Err(invalid(format!("serial longer than {MAX_SERIAL_LEN} characters")));
        }

        let frame = URL_SAFE_NO_PAD
            .decode(serial)
            .map_err(|e| invalid(format!("invalid serial base64: {e}")))?;

        if frame.len() <= SIGNATURE_LENGTH {
            return Err(invalid("serial too short"));
        }
        let (payload_bytes, sig_bytes) = frame.split_at(frame.len() - SIGNATURE_LENGTH);

        let payload = LicensePayload::from_bytes(payload_bytes)?;
        let signature = Signature::from_slice(sig_bytes)
            .map_err(|_| invalid("invalid signature length"))?;

        Ok(Self {
            raw: serial.to_string(),
            payload,
            signature,
        })
    }

    /// Returns the serial string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns the decoded payload.
    #[must_use]
    pub fn payload(&self) -> &LicensePayload {
        &self.payload
    }

    /// Returns the signature.
    #[must_use]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Returns the bytes the signature covers.
    #[must_use]
    pub fn signed_bytes(&self) -> Vec<u8> {
        self.payload.to_bytes()
    }

    /// Consumes the serial, returning the string.
    #[must_use]
    pub fn into_string(self) -> String {
        self.raw
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn invalid(msg: impl Into<String>) -> LicenseError {
    LicenseError::InvalidSerial(msg.into())
}

fn timestamp_utc(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, n: usize) -> LicenseResult<&'a [u8]> {
        if self.buf.len() < n {
            return Err(invalid("serial truncated"));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn u8(&mut self) -> LicenseResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn array<const N: usize>(&mut self) -> LicenseResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
