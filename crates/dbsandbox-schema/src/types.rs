//! Newtype wrappers for string identifiers.
//!
//! All newtypes serialize/deserialize as plain strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_newtype!(
    /// Server UUID written to a node's `auto.cnf`.
    ServerUuid
);

string_newtype!(
    /// Absolute sandbox directory used as the catalog key.
    CatalogKey
);

impl ServerUuid {
    /// Deterministic UUID derived from a node's port and ordinal, so that
    /// every node of a topology gets a distinct, recognisable identity.
    ///
    /// Shape: `PPPPPPPP-NNNN-NNNN-NNNN-PPPPPPPPPPPP` with `P` the zero-padded
    /// port and `N` the zero-padded node number.
    pub fn deterministic(port: u16, node_num: u32) -> Self {
        let n = node_num % 10_000;
        Self(format!("{port:08}-{n:04}-{n:04}-{n:04}-{port:012}"))
    }
}

impl CatalogKey {
    pub fn from_path(path: &std::path::Path) -> Self {
        Self(path.to_string_lossy().into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_uuid_has_canonical_shape() {
        let uuid = ServerUuid::deterministic(8031, 1);
        assert_eq!(uuid.as_str(), "00008031-0001-0001-0001-000000008031");
        let groups: Vec<usize> = uuid.split('-').map(str::len).collect();
        assert_eq!(groups, vec![8, 4, 4, 4, 12]);
    }

    #[test]
    fn server_uuid_differs_per_node() {
        assert_ne!(
            ServerUuid::deterministic(8031, 1),
            ServerUuid::deterministic(8032, 2)
        );
    }

    #[test]
    fn catalog_key_serializes_as_plain_string() {
        let key = CatalogKey::from_path(std::path::Path::new("/tmp/sb/msb_8_0_30"));
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"/tmp/sb/msb_8_0_30\"");
        let back: CatalogKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }
}
