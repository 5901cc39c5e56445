use crate::defaults::Defaults;
use crate::flavor::Flavor;
use crate::version::{sandbox_suffix, VersionTriple};
use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Type tag persisted in descriptions and catalog entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SandboxType {
    Single,
    MasterSlave,
    GroupReplication,
    FanIn,
    AllMasters,
    Multiple,
    Ndb,
    Pxc,
    ReplicationNode,
    GroupNode,
    FanInNode,
    AllMastersNode,
    MultipleNode,
    NdbNode,
    PxcNode,
}

impl SandboxType {
    pub fn as_str(self) -> &'static str {
        match self {
            SandboxType::Single => "single",
            SandboxType::MasterSlave => "master-slave",
            SandboxType::GroupReplication => "group-replication",
            SandboxType::FanIn => "fan-in",
            SandboxType::AllMasters => "all-masters",
            SandboxType::Multiple => "multiple",
            SandboxType::Ndb => "ndb",
            SandboxType::Pxc => "pxc",
            SandboxType::ReplicationNode => "replication-node",
            SandboxType::GroupNode => "group-node",
            SandboxType::FanInNode => "fan-in-node",
            SandboxType::AllMastersNode => "all-masters-node",
            SandboxType::MultipleNode => "multiple-node",
            SandboxType::NdbNode => "ndb-node",
            SandboxType::PxcNode => "pxc-node",
        }
    }

    /// Member of a multi-node topology rather than a standalone sandbox.
    pub fn is_node(self) -> bool {
        matches!(
            self,
            SandboxType::ReplicationNode
                | SandboxType::GroupNode
                | SandboxType::FanInNode
                | SandboxType::AllMastersNode
                | SandboxType::MultipleNode
                | SandboxType::NdbNode
                | SandboxType::PxcNode
        )
    }
}

impl fmt::Display for SandboxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Complete configuration for one node.
///
/// Orchestrators clone a base definition for every node and adjust the
/// per-node fields; a definition is never shared between nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxDefinition {
    pub version: String,
    pub flavor: Flavor,
    /// Directory holding one unpacked server tree per version.
    pub sandbox_binary: PathBuf,
    /// Resolved `sandbox_binary/version`; empty until resolved.
    pub basedir: PathBuf,
    pub client_basedir: Option<PathBuf>,
    /// Parent directory the sandbox is created in.
    pub sandbox_dir: PathBuf,
    /// Directory name under `sandbox_dir`; derived from the version when unset.
    pub dir_name: Option<String>,
    pub sb_type: SandboxType,

    /// 0 means "derive from the version".
    pub port: u16,
    pub mysqlx_port: Option<u16>,
    pub admin_port: Option<u16>,
    pub extra_ports: Vec<u16>,
    pub server_id: u32,
    pub node_num: u32,
    pub prompt: String,

    pub db_user: String,
    pub db_password: String,
    pub rpl_user: String,
    pub rpl_password: String,
    pub remote_access: String,
    pub bind_address: String,

    pub repl_options: String,
    pub gtid: bool,
    pub gtid_options: String,
    pub repl_crash_safe_options: String,
    pub semisync_options: String,

    pub load_grants: bool,
    pub skip_start: bool,
    pub multi: bool,
    pub force: bool,
    pub keep_uuid: bool,
    pub expose_dd_tables: bool,
    pub native_auth_plugin: bool,
    pub disable_mysqlx: bool,
    pub enable_admin_address: bool,
    pub run_concurrently: bool,
    pub custom_mysqld: Option<String>,

    pub init_options: Vec<String>,
    pub my_cnf_options: Vec<String>,
    pub start_args: Vec<String>,
    pub pre_grants_sql: Vec<String>,
    pub post_grants_sql: Vec<String>,
    pub pre_grants_sql_file: Option<PathBuf>,
    pub post_grants_sql_file: Option<PathBuf>,
}

impl SandboxDefinition {
    /// Single-sandbox definition seeded from `defaults`.
    pub fn new(version: impl Into<String>, flavor: Flavor, defaults: &Defaults) -> Self {
        Self {
            version: version.into(),
            flavor,
            sandbox_binary: defaults.sandbox_binary.clone(),
            basedir: PathBuf::new(),
            client_basedir: None,
            sandbox_dir: defaults.sandbox_home.clone(),
            dir_name: None,
            sb_type: SandboxType::Single,
            port: 0,
            mysqlx_port: None,
            admin_port: None,
            extra_ports: Vec::new(),
            server_id: 0,
            node_num: 0,
            prompt: "mysql".to_owned(),
            db_user: defaults.db_user.clone(),
            db_password: defaults.db_password.clone(),
            rpl_user: defaults.rpl_user.clone(),
            rpl_password: defaults.rpl_password.clone(),
            remote_access: "127.%".to_owned(),
            bind_address: "127.0.0.1".to_owned(),
            repl_options: String::new(),
            gtid: false,
            gtid_options: String::new(),
            repl_crash_safe_options: String::new(),
            semisync_options: String::new(),
            load_grants: true,
            skip_start: false,
            multi: false,
            force: false,
            keep_uuid: false,
            expose_dd_tables: false,
            native_auth_plugin: false,
            disable_mysqlx: false,
            enable_admin_address: false,
            run_concurrently: false,
            custom_mysqld: None,
            init_options: Vec::new(),
            my_cnf_options: Vec::new(),
            start_args: Vec::new(),
            pre_grants_sql: Vec::new(),
            post_grants_sql: Vec::new(),
            pre_grants_sql_file: None,
            post_grants_sql_file: None,
        }
    }

    pub fn version_triple(&self) -> Result<VersionTriple, SchemaError> {
        VersionTriple::parse(&self.version)
    }

    /// `msb_8_0_30` style default name for a single sandbox.
    pub fn default_dir_name(&self, prefix: &str) -> String {
        format!("{prefix}{}", sandbox_suffix(&self.version))
    }

    pub fn resolved_basedir(&self) -> PathBuf {
        if self.basedir.as_os_str().is_empty() {
            self.sandbox_binary.join(&self.version)
        } else {
            self.basedir.clone()
        }
    }

    /// Every port this node listens on, main port first.
    pub fn all_ports(&self) -> Vec<u16> {
        let mut ports = vec![self.port];
        ports.extend(self.mysqlx_port);
        ports.extend(self.admin_port);
        ports.extend(self.extra_ports.iter().copied());
        ports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn new_definition_uses_defaults() {
        let defaults = Defaults::factory_in(Path::new("/h"));
        let def = SandboxDefinition::new("8.0.30", Flavor::MySql, &defaults);
        assert_eq!(def.sandbox_dir, Path::new("/h/sandboxes"));
        assert_eq!(def.resolved_basedir(), Path::new("/h/opt/mysql/8.0.30"));
        assert_eq!(def.default_dir_name("msb_"), "msb_8_0_30");
        assert_eq!(def.db_user, "msandbox");
        assert!(def.load_grants);
    }

    #[test]
    fn all_ports_lists_every_pool() {
        let defaults = Defaults::factory_in(Path::new("/h"));
        let mut def = SandboxDefinition::new("8.0.30", Flavor::MySql, &defaults);
        def.port = 8030;
        def.mysqlx_port = Some(18030);
        def.extra_ports = vec![8155];
        assert_eq!(def.all_ports(), vec![8030, 18030, 8155]);
    }

    #[test]
    fn sandbox_type_serializes_kebab_case() {
        let json = serde_json::to_string(&SandboxType::GroupNode).unwrap();
        assert_eq!(json, "\"group-node\"");
        assert_eq!(SandboxType::MasterSlave.to_string(), "master-slave");
        assert!(SandboxType::PxcNode.is_node());
        assert!(!SandboxType::Pxc.is_node());
    }
}
