//! Host identifiers a license can be locked to.
//!
//! A host is normally the server's public IP address. Textual host names are
//! accepted too, so installations behind a stable DNS name can be licensed.

use crate::error::{LicenseError, LicenseResult};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Maximum length of a host name (RFC 1123).
pub const MAX_HOST_NAME_LEN: usize = 253;

/// A validated, canonical host identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HostId {
    /// IPv4 address.
    V4(Ipv4Addr),
    /// IPv6 address.
    V6(Ipv6Addr),
    /// Lowercased DNS host name.
    Name(String),
}

impl HostId {
    /// Parses a caller-supplied host identifier.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::InvalidParams`] if the input is empty or is
    /// neither an IP address nor a valid host name.
    pub fn parse(input: &str) -> LicenseResult<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(LicenseError::InvalidParams("host must not be empty".into()));
        }

        if let Ok(ip) = IpAddr::from_str(input) {
            return Ok(match ip {
                IpAddr::V4(v4) => Self::V4(v4),
                // IPv4-mapped addresses lock to the same host as their v4 form
                IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
                    Some(v4) => Self::V4(v4),
                    None => Self::V6(v6),
                },
            });
        }

        let name = input.trim_end_matches('.').to_ascii_lowercase();
        validate_host_name(&name)?;
        Ok(Self::Name(name))
    }

    /// Returns true if this is an IP address rather than a host name.
    #[must_use]
    pub fn is_ip(&self) -> bool {
        !matches!(self, Self::Name(_))
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V4(ip) => write!(f, "{ip}"),
            Self::V6(ip) => write!(f, "{ip}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

impl FromStr for HostId {
    type Err = LicenseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn validate_host_name(name: &str) -> LicenseResult<()> {
    if name.is_empty() || name.len() > MAX_HOST_NAME_LEN {
        return Err(LicenseError::InvalidParams(format!(
            "host name must be 1-{MAX_HOST_NAME_LEN} bytes"
        )));
    }

    // All-numeric dotted names are malformed IPs, not host names
    if name.split('.').all(|l| l.chars().all(|c| c.is_ascii_digit())) {
        return Err(LicenseError::InvalidParams(format!(
            "malformed IP address: {name}"
        )));
    }

    for label in name.split('.') {
        let valid = !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !valid {
            return Err(LicenseError::InvalidParams(format!(
                "invalid host name: {name}"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ipv4() {
        assert_eq!(
            HostId::parse("203.0.113.7").unwrap(),
            HostId::V4(Ipv4Addr::new(203, 0, 113, 7))
        );
    }

    #[test]
    fn canonicalizes_ipv6() {
        let host = HostId::parse("2001:DB8:0:0::1").unwrap();
        assert_eq!(host.to_string(), "2001:db8::1");
    }

    #[test]
    fn mapped_ipv6_is_v4() {
        let host = HostId::parse("::ffff:198.51.100.2").unwrap();
        assert_eq!(host, HostId::V4(Ipv4Addr::new(198, 51, 100, 2)));
    }

    #[test]
    fn host_names_are_lowercased() {
        let host = HostId::parse("Licensed.Example.COM.").unwrap();
        assert_eq!(host, HostId::Name("licensed.example.com".into()));
        assert!(!host.is_ip());
    }

    #[test]
    fn rejects_garbage() {
        assert!(HostId::parse("").is_err());
        assert!(HostId::parse("   ").is_err());
        assert!(HostId::parse("1.2.3.999").is_err());
        assert!(HostId::parse("1.2.3").is_err());
        assert!(HostId::parse("bad host").is_err());
        assert!(HostId::parse("-lead.example.com").is_err());
        assert!(HostId::parse("a..b").is_err());
        assert!(HostId::parse(&"a".repeat(300)).is_err());
    }
}
