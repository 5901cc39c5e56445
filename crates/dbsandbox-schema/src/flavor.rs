use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Database product variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flavor {
    #[serde(rename = "mysql")]
    MySql,
    Percona,
    #[serde(rename = "mariadb")]
    MariaDb,
    Ndb,
    Pxc,
    #[serde(rename = "tidb")]
    TiDb,
}

impl Flavor {
    pub const ALL: [Flavor; 6] = [
        Flavor::MySql,
        Flavor::Percona,
        Flavor::MariaDb,
        Flavor::Ndb,
        Flavor::Pxc,
        Flavor::TiDb,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Flavor::MySql => "mysql",
            Flavor::Percona => "percona",
            Flavor::MariaDb => "mariadb",
            Flavor::Ndb => "ndb",
            Flavor::Pxc => "pxc",
            Flavor::TiDb => "tidb",
        }
    }
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Flavor {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" => Ok(Flavor::MySql),
            "percona" | "ps" => Ok(Flavor::Percona),
            "mariadb" | "ma" => Ok(Flavor::MariaDb),
            "ndb" => Ok(Flavor::Ndb),
            "pxc" => Ok(Flavor::Pxc),
            "tidb" => Ok(Flavor::TiDb),
            other => Err(SchemaError::UnknownFlavor(other.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_parse() {
        for flavor in Flavor::ALL {
            assert_eq!(flavor.to_string().parse::<Flavor>().unwrap(), flavor);
        }
    }

    #[test]
    fn serde_uses_lowercase_names() {
        assert_eq!(serde_json::to_string(&Flavor::MySql).unwrap(), "\"mysql\"");
        assert_eq!(serde_json::to_string(&Flavor::MariaDb).unwrap(), "\"mariadb\"");
        let back: Flavor = serde_json::from_str("\"pxc\"").unwrap();
        assert_eq!(back, Flavor::Pxc);
    }

    #[test]
    fn unknown_flavor_fails() {
        assert!(matches!(
            "oracle".parse::<Flavor>(),
            Err(SchemaError::UnknownFlavor(_))
        ));
    }
}
