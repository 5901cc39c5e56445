use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const SANDBOX_HOME_ENV: &str = "SANDBOX_HOME";
pub const SANDBOX_BINARY_ENV: &str = "SANDBOX_BINARY";

/// Process-wide deployment defaults.
///
/// Missing keys in a TOML file fall back to [`Defaults::factory`] values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Defaults {
    pub sandbox_home: PathBuf,
    pub sandbox_binary: PathBuf,
    pub catalog_dir: PathBuf,
    pub log_directory: PathBuf,
    pub log_sb_operations: bool,

    pub master_slave_base_port: u16,
    pub group_replication_base_port: u16,
    pub group_replication_sp_base_port: u16,
    pub fan_in_replication_base_port: u16,
    pub all_masters_replication_base_port: u16,
    pub multiple_base_port: u16,
    pub pxc_base_port: u16,
    pub ndb_base_port: u16,
    pub ndb_cluster_port: u16,

    pub group_port_delta: u16,
    pub mysqlx_port_delta: u16,
    pub admin_port_delta: u16,

    pub sandbox_prefix: String,
    pub master_slave_prefix: String,
    pub group_prefix: String,
    pub group_sp_prefix: String,
    pub fan_in_prefix: String,
    pub all_masters_prefix: String,
    pub multiple_prefix: String,
    pub pxc_prefix: String,
    pub ndb_prefix: String,

    pub master_name: String,
    pub node_prefix: String,
    pub slave_prefix: String,
    pub ndb_node_prefix: String,

    pub reserved_ports: Vec<u16>,

    pub db_user: String,
    pub db_password: String,
    pub rpl_user: String,
    pub rpl_password: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self::factory()
    }
}

impl Defaults {
    pub fn factory() -> Self {
        let home = std::env::var_os("HOME").map_or_else(|| PathBuf::from("/tmp"), PathBuf::from);
        Self::factory_in(&home)
    }

    /// Factory values rooted at `home` instead of `$HOME`.
    pub fn factory_in(home: &Path) -> Self {
        let catalog_dir = home.join(".dbsandbox");
        Self {
            sandbox_home: home.join("sandboxes"),
            sandbox_binary: home.join("opt").join("mysql"),
            log_directory: catalog_dir.join("logs"),
            catalog_dir,
            log_sb_operations: false,

            master_slave_base_port: 11000,
            group_replication_base_port: 12000,
            group_replication_sp_base_port: 13000,
            fan_in_replication_base_port: 14000,
            all_masters_replication_base_port: 15000,
            multiple_base_port: 16000,
            pxc_base_port: 18000,
            ndb_base_port: 19000,
            ndb_cluster_port: 20000,

            group_port_delta: 125,
            mysqlx_port_delta: 10000,
            admin_port_delta: 11000,

            sandbox_prefix: "msb_".to_owned(),
            master_slave_prefix: "rsandbox_".to_owned(),
            group_prefix: "group_msb_".to_owned(),
            group_sp_prefix: "group_sp_msb_".to_owned(),
            fan_in_prefix: "fan_in_msb_".to_owned(),
            all_masters_prefix: "all_masters_msb_".to_owned(),
            multiple_prefix: "multi_msb_".to_owned(),
            pxc_prefix: "pxc_msb_".to_owned(),
            ndb_prefix: "ndb_msb_".to_owned(),

            master_name: "master".to_owned(),
            node_prefix: "node".to_owned(),
            slave_prefix: "slave".to_owned(),
            ndb_node_prefix: "ndbnode".to_owned(),

            reserved_ports: vec![1186, 3306, 33060, 33062],

            db_user: "msandbox".to_owned(),
            db_password: "msandbox".to_owned(),
            rpl_user: "rsandbox".to_owned(),
            rpl_password: "rsandbox".to_owned(),
        }
    }

    pub fn parse_str(input: &str) -> Result<Self, SchemaError> {
        Ok(toml::from_str(input)?)
    }

    /// Read a TOML defaults file, apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self, SchemaError> {
        let content = fs::read_to_string(path)?;
        let defaults = Self::parse_str(&content)?.with_env_overrides();
        defaults.validate()?;
        Ok(defaults)
    }

    /// `SANDBOX_HOME` and `SANDBOX_BINARY` take precedence over file values.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(
            std::env::var_os(SANDBOX_HOME_ENV).map(PathBuf::from),
            std::env::var_os(SANDBOX_BINARY_ENV).map(PathBuf::from),
        )
    }

    #[must_use]
    pub fn with_overrides(
        mut self,
        sandbox_home: Option<PathBuf>,
        sandbox_binary: Option<PathBuf>,
    ) -> Self {
        if let Some(home) = sandbox_home.filter(|p| !p.as_os_str().is_empty()) {
            self.sandbox_home = home;
        }
        if let Some(binary) = sandbox_binary.filter(|p| !p.as_os_str().is_empty()) {
            self.sandbox_binary = binary;
        }
        self
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        let mut seen: BTreeMap<u16, &str> = BTreeMap::new();
        for (name, port) in self.base_ports() {
            if port == 0 {
                return Err(SchemaError::InvalidDefaults(format!("{name} must not be 0")));
            }
            if let Some(other) = seen.insert(port, name) {
                return Err(SchemaError::InvalidDefaults(format!(
                    "{name} and {other} share base port {port}"
                )));
            }
        }

        for (name, delta) in [
            ("group_port_delta", self.group_port_delta),
            ("mysqlx_port_delta", self.mysqlx_port_delta),
            ("admin_port_delta", self.admin_port_delta),
        ] {
            if delta == 0 {
                return Err(SchemaError::InvalidDefaults(format!("{name} must not be 0")));
            }
        }

        for (name, value) in [
            ("sandbox_prefix", &self.sandbox_prefix),
            ("master_slave_prefix", &self.master_slave_prefix),
            ("group_prefix", &self.group_prefix),
            ("group_sp_prefix", &self.group_sp_prefix),
            ("fan_in_prefix", &self.fan_in_prefix),
            ("all_masters_prefix", &self.all_masters_prefix),
            ("multiple_prefix", &self.multiple_prefix),
            ("pxc_prefix", &self.pxc_prefix),
            ("ndb_prefix", &self.ndb_prefix),
            ("master_name", &self.master_name),
            ("node_prefix", &self.node_prefix),
            ("slave_prefix", &self.slave_prefix),
            ("ndb_node_prefix", &self.ndb_node_prefix),
        ] {
            if value.trim().is_empty() {
                return Err(SchemaError::InvalidDefaults(format!("{name} must not be empty")));
            }
        }

        if self.sandbox_home.as_os_str().is_empty() {
            return Err(SchemaError::InvalidDefaults(
                "sandbox_home must not be empty".to_owned(),
            ));
        }
        Ok(())
    }

    fn base_ports(&self) -> [(&'static str, u16); 9] {
        [
            ("master_slave_base_port", self.master_slave_base_port),
            ("group_replication_base_port", self.group_replication_base_port),
            ("group_replication_sp_base_port", self.group_replication_sp_base_port),
            ("fan_in_replication_base_port", self.fan_in_replication_base_port),
            ("all_masters_replication_base_port", self.all_masters_replication_base_port),
            ("multiple_base_port", self.multiple_base_port),
            ("pxc_base_port", self.pxc_base_port),
            ("ndb_base_port", self.ndb_base_port),
            ("ndb_cluster_port", self.ndb_cluster_port),
        ]
    }
}
