use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A `(major, minor, revision)` server version.
///
/// Ordering is lexicographic over the three integers, which is the only
/// comparison the capability matrix relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VersionTriple {
    pub major: u32,
    pub minor: u32,
    pub revision: u32,
}

impl VersionTriple {
    pub const fn new(major: u32, minor: u32, revision: u32) -> Self {
        Self {
            major,
            minor,
            revision,
        }
    }

    /// Parse `8.0.30`, `ps8.0.30` or `ma10.6.12`.
    ///
    /// A leading run of ASCII letters is ignored; what remains must be exactly
    /// three dot-separated non-negative integers.
    pub fn parse(input: &str) -> Result<Self, SchemaError> {
        let invalid = || SchemaError::InvalidVersion(input.to_owned());
        let numeric = input.trim().trim_start_matches(|c: char| c.is_ascii_alphabetic());

        let parts: Vec<&str> = numeric.split('.').collect();
        if parts.len() != 3 {
            return Err(invalid());
        }
        let mut values = [0u32; 3];
        for (slot, part) in values.iter_mut().zip(&parts) {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            *slot = part.parse().map_err(|_| invalid())?;
        }
        Ok(Self::new(values[0], values[1], values[2]))
    }

    /// Default single-sandbox port: the digits of `major`, `minor` and a
    /// two-digit `revision` concatenated (`8.0.30` -> 8030).
    ///
    /// Versions whose concatenation does not fit a TCP port, such as MariaDB
    /// 10.10 and later (`10.11.5` -> 101105), fall back to
    /// `major * 1000 + minor * 10 + revision` (`10.11.5` -> 10115). Two
    /// versions may share a fallback port; the allocator then moves the
    /// second one to the next free port. `None` only when neither fits.
    pub fn default_port(self) -> Option<u16> {
        let concatenated = format!("{}{}{:02}", self.major, self.minor, self.revision)
            .parse::<u32>()
            .ok()
            .and_then(|p| u16::try_from(p).ok());
        concatenated
            .or_else(|| {
                self.major
                    .checked_mul(1000)
                    .and_then(|p| p.checked_add(self.minor.checked_mul(10)?))
                    .and_then(|p| p.checked_add(self.revision))
                    .and_then(|p| u16::try_from(p).ok())
            })
            .filter(|p| *p > 0)
    }
}

impl FromStr for VersionTriple {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for VersionTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.revision)
    }
}

/// Directory-safe form of a version tag (`ps8.0.30` -> `ps8_0_30`).
pub fn sandbox_suffix(version: &str) -> String {
    version.trim().replace('.', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_version() {
        let v = VersionTriple::parse("8.0.30").unwrap();
        assert_eq!(v, VersionTriple::new(8, 0, 30));
        assert_eq!(v.to_string(), "8.0.30");
    }

    #[test]
    fn parses_letter_prefixed_version() {
        assert_eq!(
            VersionTriple::parse("ps8.0.30").unwrap(),
            VersionTriple::new(8, 0, 30)
        );
        assert_eq!(
            VersionTriple::parse("ma10.6.12").unwrap(),
            VersionTriple::new(10, 6, 12)
        );
    }

    #[test]
    fn rejects_malformed_versions() {
        for bad in ["", "8", "8.0", "8.0.30.1", "8.a.30", "8..30", "-8.0.30", "8.0.-1", "x"] {
            assert!(
                matches!(VersionTriple::parse(bad), Err(SchemaError::InvalidVersion(_))),
                "'{bad}' must be rejected"
            );
        }
    }

    #[test]
    fn ordering_is_lexicographic() {
        let a = VersionTriple::new(5, 7, 44);
        let b = VersionTriple::new(8, 0, 0);
        let c = VersionTriple::new(8, 0, 11);
        assert!(a < b);
        assert!(b < c);
        assert!(VersionTriple::new(5, 10, 0) > VersionTriple::new(5, 9, 99));
    }

    #[test]
    fn default_port_concatenates_digits() {
        assert_eq!(VersionTriple::new(8, 0, 30).default_port(), Some(8030));
        assert_eq!(VersionTriple::new(5, 7, 22).default_port(), Some(5722));
        assert_eq!(VersionTriple::new(8, 0, 4).default_port(), Some(8004));
        assert_eq!(VersionTriple::new(10, 3, 12).default_port(), Some(10312));
    }

    #[test]
    fn default_port_falls_back_for_wide_versions() {
        assert_eq!(VersionTriple::new(10, 11, 5).default_port(), Some(10_115));
        assert_eq!(VersionTriple::new(11, 10, 3).default_port(), Some(11_103));
        assert_eq!(VersionTriple::new(10, 10, 99).default_port(), Some(10_199));
        assert_eq!(VersionTriple::new(8, 0, 50_000_000).default_port(), None);
        assert_eq!(VersionTriple::new(0, 0, 0).default_port(), None);
    }

    #[test]
    fn sandbox_suffix_replaces_dots() {
        assert_eq!(sandbox_suffix("8.0.30"), "8_0_30");
        assert_eq!(sandbox_suffix("ps5.7.44"), "ps5_7_44");
    }
}
