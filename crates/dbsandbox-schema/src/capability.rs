//! Per-flavor feature availability.
//!
//! Every version-dependent decision in the deployer goes through
//! [`CapabilityMatrix::has_capability`]. A capability is available for a
//! version `v` when `since <= v` and, if an upper bound exists, `v <= until`.

use crate::flavor::Flavor;
use crate::version::VersionTriple;
use crate::SchemaError;
use serde::Serialize;
use std::collections::BTreeMap;

/// Feature names understood by the matrix.
pub mod features {
    pub const INSTALL_DB: &str = "installdb";
    pub const INITIALIZE: &str = "initialize";
    pub const DYNAMIC_VARIABLES: &str = "dynvars";
    pub const SEMISYNC: &str = "semisync";
    pub const CRASH_SAFE: &str = "crashsafe";
    pub const GTID: &str = "gtid";
    pub const CUSTOM_UUID: &str = "custom_uuid";
    pub const ENHANCED_GTID: &str = "enhanced_gtid";
    pub const CREATE_USER: &str = "create_user";
    pub const SUPER_READ_ONLY: &str = "super_read_only";
    pub const MULTI_SOURCE: &str = "multi_source";
    pub const MYSQLX: &str = "mysqlx";
    pub const GROUP_REPLICATION: &str = "group_replication";
    pub const ROLES: &str = "roles";
    pub const DATA_DICTIONARY: &str = "data_dict";
    pub const NATIVE_AUTH: &str = "native_auth";
    pub const MYSQLX_DEFAULT: &str = "mysqlx_default";
    pub const ADMIN_ADDRESS: &str = "admin_address";
    pub const NDB_CLUSTER: &str = "ndb_cluster";
    pub const XTRADB_CLUSTER: &str = "xtradb_cluster";
    pub const XTRABACKUP_SST: &str = "xtrabackup_sst";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capability {
    pub description: &'static str,
    pub since: VersionTriple,
    /// Inclusive upper bound; `None` means still available.
    pub until: Option<VersionTriple>,
}

impl Capability {
    pub const fn since(description: &'static str, since: VersionTriple) -> Self {
        Self {
            description,
            since,
            until: None,
        }
    }

    pub const fn range(
        description: &'static str,
        since: VersionTriple,
        until: VersionTriple,
    ) -> Self {
        Self {
            description,
            since,
            until: Some(until),
        }
    }

    #[inline]
    pub fn contains(&self, version: VersionTriple) -> bool {
        version >= self.since && self.until.map_or(true, |until| version <= until)
    }
}

const fn v(major: u32, minor: u32, revision: u32) -> VersionTriple {
    VersionTriple::new(major, minor, revision)
}

type FeatureTable = BTreeMap<&'static str, Capability>;

/// Immutable feature table, built once and shared by reference.
#[derive(Debug, Clone)]
pub struct CapabilityMatrix {
    tables: BTreeMap<Flavor, FeatureTable>,
}

impl CapabilityMatrix {
    pub fn builtin() -> Self {
        let mysql = mysql_table();
        let mut tables = BTreeMap::new();
        tables.insert(Flavor::Percona, mysql.clone());
        tables.insert(Flavor::Pxc, pxc_table(&mysql));
        tables.insert(Flavor::MySql, mysql);
        tables.insert(Flavor::MariaDb, mariadb_table());
        tables.insert(Flavor::Ndb, ndb_table());
        Self { tables }
    }

    /// Whether `feature` is available for `flavor` at `version`.
    ///
    /// A malformed version is an error; an unknown flavor or feature is
    /// simply not available.
    pub fn has_capability(
        &self,
        flavor: Flavor,
        feature: &str,
        version: &str,
    ) -> Result<bool, SchemaError> {
        let parsed = VersionTriple::parse(version)?;
        Ok(self.has_capability_at(flavor, feature, parsed))
    }

    pub fn has_capability_at(&self, flavor: Flavor, feature: &str, version: VersionTriple) -> bool {
        self.lookup(flavor, feature)
            .is_some_and(|cap| cap.contains(version))
    }

    pub fn lookup(&self, flavor: Flavor, feature: &str) -> Option<&Capability> {
        self.tables.get(&flavor).and_then(|t| t.get(feature))
    }

    pub fn features(&self, flavor: Flavor) -> impl Iterator<Item = (&'static str, &Capability)> {
        self.tables
            .get(&flavor)
            .into_iter()
            .flat_map(|t| t.iter().map(|(name, cap)| (*name, cap)))
    }

    pub fn flavors(&self) -> impl Iterator<Item = Flavor> + '_ {
        self.tables.keys().copied()
    }
}

fn mysql_table() -> FeatureTable {
    use features::*;
    BTreeMap::from([
        (
            INSTALL_DB,
            Capability::range(
                "data directory created by mysql_install_db",
                v(3, 3, 23),
                v(5, 6, 99),
            ),
        ),
        (
            INITIALIZE,
            Capability::since("data directory created by mysqld --initialize", v(5, 7, 0)),
        ),
        (
            DYNAMIC_VARIABLES,
            Capability::since("dynamic system variables", v(5, 1, 0)),
        ),
        (
            SEMISYNC,
            Capability::since("semi-synchronous replication plugin", v(5, 5, 1)),
        ),
        (
            CRASH_SAFE,
            Capability::since("crash-safe replication repositories", v(5, 6, 2)),
        ),
        (GTID, Capability::since("global transaction identifiers", v(5, 6, 9))),
        (
            CUSTOM_UUID,
            Capability::since("server UUID read from auto.cnf", v(5, 6, 9)),
        ),
        (
            ENHANCED_GTID,
            Capability::since("GTID without log-slave-updates", v(5, 7, 5)),
        ),
        (
            CREATE_USER,
            Capability::since("accounts created with CREATE USER", v(5, 7, 6)),
        ),
        (SUPER_READ_ONLY, Capability::since("super_read_only", v(5, 7, 8))),
        (
            MULTI_SOURCE,
            Capability::since("multi-source replication channels", v(5, 7, 9)),
        ),
        (MYSQLX, Capability::since("X plugin", v(5, 7, 12))),
        (
            GROUP_REPLICATION,
            Capability::since("group replication", v(5, 7, 17)),
        ),
        (ROLES, Capability::since("roles", v(8, 0, 0))),
        (
            DATA_DICTIONARY,
            Capability::since("data dictionary tables", v(8, 0, 0)),
        ),
        (
            NATIVE_AUTH,
            Capability::since(
                "caching_sha2_password default; native plugin must be requested",
                v(8, 0, 4),
            ),
        ),
        (
            MYSQLX_DEFAULT,
            Capability::since("X plugin enabled by default", v(8, 0, 11)),
        ),
        (
            ADMIN_ADDRESS,
            Capability::since("dedicated admin interface", v(8, 0, 14)),
        ),
    ])
}

fn pxc_table(mysql: &FeatureTable) -> FeatureTable {
    use features::*;
    let mut table = mysql.clone();
    table.insert(
        XTRADB_CLUSTER,
        Capability::since("Percona XtraDB Cluster", v(5, 6, 14)),
    );
    table.insert(
        XTRABACKUP_SST,
        Capability::since("state transfer only through xtrabackup-v2", v(8, 0, 0)),
    );
    table
}

fn mariadb_table() -> FeatureTable {
    use features::*;
    BTreeMap::from([
        (
            INSTALL_DB,
            Capability::since("data directory created by mysql_install_db", v(5, 1, 0)),
        ),
        (
            DYNAMIC_VARIABLES,
            Capability::since("dynamic system variables", v(5, 1, 0)),
        ),
        (
            SEMISYNC,
            Capability::since("semi-synchronous replication plugin", v(5, 5, 0)),
        ),
        (
            CRASH_SAFE,
            Capability::since("crash-safe replication repositories", v(10, 0, 0)),
        ),
        (
            MULTI_SOURCE,
            Capability::since("multi-source replication channels", v(10, 0, 0)),
        ),
        (ROLES, Capability::since("roles", v(10, 0, 5))),
    ])
}

fn ndb_table() -> FeatureTable {
    use features::*;
    BTreeMap::from([
        (
            INSTALL_DB,
            Capability::range(
                "data directory created by mysql_install_db",
                v(7, 0, 0),
                v(7, 4, 99),
            ),
        ),
        (
            INITIALIZE,
            Capability::since("data directory created by mysqld --initialize", v(7, 5, 0)),
        ),
        (
            DYNAMIC_VARIABLES,
            Capability::since("dynamic system variables", v(7, 0, 0)),
        ),
        (
            CRASH_SAFE,
            Capability::since("crash-safe replication repositories", v(7, 3, 0)),
        ),
        (GTID, Capability::since("global transaction identifiers", v(7, 3, 0))),
        (
            CUSTOM_UUID,
            Capability::since("server UUID read from auto.cnf", v(7, 3, 0)),
        ),
        (
            CREATE_USER,
            Capability::since("accounts created with CREATE USER", v(7, 5, 0)),
        ),
        (ROLES, Capability::since("roles", v(8, 0, 0))),
        (
            DATA_DICTIONARY,
            Capability::since("data dictionary tables", v(8, 0, 0)),
        ),
        (
            NATIVE_AUTH,
            Capability::since(
                "caching_sha2_password default; native plugin must be requested",
                v(8, 0, 4),
            ),
        ),
        (
            MYSQLX_DEFAULT,
            Capability::since("X plugin enabled by default", v(8, 0, 11)),
        ),
        (
            ADMIN_ADDRESS,
            Capability::since("dedicated admin interface", v(8, 0, 14)),
        ),
        (NDB_CLUSTER, Capability::since("NDB cluster", v(7, 0, 0))),
    ])
}
