//! Topology orchestrators.
//!
//! Planning is pure: [`plan`] checks capabilities, reserves every port of
//! every pool for every node, and builds one fresh [`SandboxDefinition`] per
//! node from the immutable base definition. Nothing touches the filesystem
//! until [`TopologyPlan::materialize`] runs the installer for each node and
//! writes the topology-wide scripts.

mod group;
mod master_slave;
mod multi_source;
mod multiple;
mod ndb;
mod pxc;

use crate::installer::{ExecMode, NodeInstaller};
use crate::oplog::OperationLog;
use crate::ports::{topology_base_port, PortAllocator};
use crate::CoreError;
use dbsandbox_runtime::{write_script, ExecutionList, Stage, TemplateCollection, TemplateData};
use dbsandbox_schema::{
    features, CapabilityMatrix, Defaults, ReadOnly, SandboxDefinition, SandboxType, Topology,
    TopologyKind, VersionTriple,
};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Control scripts every multi-node sandbox gets.
const COMMON_SCRIPTS: &[&str] = &[
    "start_all",
    "stop_all",
    "status_all",
    "restart_all",
    "clear_all",
    "send_kill_all",
    "use_all",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptSpec {
    pub template: &'static str,
    /// Path relative to the topology directory.
    pub file: String,
    pub executable: bool,
}

impl ScriptSpec {
    fn exec(template: &'static str, file: &str) -> Self {
        Self {
            template,
            file: file.to_owned(),
            executable: true,
        }
    }
}

/// A fully allocated topology, ready to be written to disk.
#[derive(Debug, Clone)]
pub struct TopologyPlan {
    pub kind: TopologyKind,
    pub sb_type: SandboxType,
    pub path: PathBuf,
    /// One definition per server node, in creation order.
    pub nodes: Vec<SandboxDefinition>,
    /// Member directories that are not server nodes (NDB data nodes).
    pub extra_members: Vec<String>,
    /// Support directories (the NDB management node).
    pub aux_dirs: Vec<String>,
    /// Ports owned by the topology rather than by a node.
    pub topology_ports: Vec<u16>,
    pub data: TemplateData,
    pub scripts: Vec<ScriptSpec>,
    /// `(file name, node directory)` pairs for `node_shortcut` scripts.
    pub shortcuts: Vec<(String, String)>,
    /// Script run once every node is up.
    pub initializer: Option<&'static str>,
    /// Node whose start and grants must finish before the others start.
    pub bootstrap: Option<String>,
}

impl TopologyPlan {
    pub fn node_names(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter_map(|n| n.dir_name.clone())
            .collect()
    }

    /// Every member directory: server nodes first, then extra members.
    pub fn member_names(&self) -> Vec<String> {
        let mut names = self.node_names();
        names.extend(self.extra_members.iter().cloned());
        names
    }

    pub fn node_count(&self) -> u32 {
        u32::try_from(self.nodes.len() + self.extra_members.len()).unwrap_or(u32::MAX)
    }

    /// Union of every node's ports and the topology's own ports.
    pub fn all_ports(&self) -> Vec<u16> {
        let mut ports: BTreeSet<u16> = self.topology_ports.iter().copied().collect();
        for node in &self.nodes {
            ports.extend(node.all_ports());
        }
        ports.into_iter().collect()
    }

    /// Create every directory and script. Returns the deferred node commands.
    pub fn materialize(
        &self,
        installer: &NodeInstaller<'_>,
        templates: &TemplateCollection,
        installed: &mut BTreeSet<u16>,
        log: &OperationLog,
    ) -> Result<ExecutionList, CoreError> {
        fs::create_dir_all(&self.path)?;
        for dir in self.aux_dirs.iter().chain(&self.extra_members) {
            fs::create_dir_all(self.path.join(dir))?;
        }

        let mut commands = ExecutionList::new();
        for node in &self.nodes {
            let installed_node = installer.install(node, installed, ExecMode::Deferred, log)?;
            log.record(&format!(
                "created {} on port {}",
                installed_node.name, node.port
            ));
            commands.append(installed_node.commands);
        }
        installed.extend(self.topology_ports.iter().copied());

        for script in &self.scripts {
            let content = templates.render(script.template, &self.data)?;
            write_script(&self.path, &script.file, &content, script.executable)?;
        }
        for (file, node) in &self.shortcuts {
            let mut data = self.data.clone();
            data.insert("NodeName".to_owned(), json!(node));
            write_script(&self.path, file, &templates.render("node_shortcut", &data)?, true)?;
        }
        debug!(
            "{}: wrote {} topology scripts and {} shortcuts",
            self.path.display(),
            self.scripts.len(),
            self.shortcuts.len()
        );

        if let Some(first) = &self.bootstrap {
            let first_dir = self.path.join(first);
            let offset = Stage::Grants.priority() + 1;
            commands.reprioritize(|entry| {
                if entry.stage == Stage::Init || entry.command.is_in(&first_dir) {
                    entry.priority
                } else {
                    entry.priority + offset
                }
            });
        }
        Ok(commands)
    }
}

/// Shared, read-only inputs of every orchestrator.
pub struct PlanContext<'a> {
    pub defaults: &'a Defaults,
    pub capabilities: &'a CapabilityMatrix,
    pub base: &'a SandboxDefinition,
    pub version: VersionTriple,
}

impl<'a> PlanContext<'a> {
    pub fn new(
        defaults: &'a Defaults,
        capabilities: &'a CapabilityMatrix,
        base: &'a SandboxDefinition,
    ) -> Result<Self, CoreError> {
        Ok(Self {
            defaults,
            capabilities,
            base,
            version: base.version_triple()?,
        })
    }

    pub fn has(&self, feature: &str) -> bool {
        self.capabilities
            .has_capability_at(self.base.flavor, feature, self.version)
    }

    pub fn require(&self, feature: &str, what: &str) -> Result<(), CoreError> {
        if self.has(feature) {
            Ok(())
        } else {
            Err(CoreError::Prerequisite(format!(
                "{what} is not available in {} {}",
                self.base.flavor, self.base.version
            )))
        }
    }

    /// Port a single sandbox of this version would use.
    pub fn single_port(&self) -> Result<u16, CoreError> {
        if self.base.port != 0 {
            return Ok(self.base.port);
        }
        self.version.default_port().ok_or_else(|| {
            CoreError::Validation(format!(
                "version {} has no default port; set one explicitly",
                self.base.version
            ))
        })
    }

    pub fn topology_path(&self, prefix: &str) -> PathBuf {
        let name = self
            .base
            .dir_name
            .clone()
            .unwrap_or_else(|| self.base.default_dir_name(prefix));
        self.base.sandbox_dir.join(name)
    }

    /// Data ports for `count` nodes. The topology base itself is never used:
    /// node 1 gets `base + 1` when it is free.
    fn data_pool(
        &self,
        alloc: &mut PortAllocator,
        offset: u16,
        count: u32,
    ) -> Result<Vec<u16>, CoreError> {
        let base = topology_base_port(self.single_port()?, offset, self.version)?;
        alloc.pool("data", u32::from(base) + 1, pool_size(count)?)
    }

    /// Give every node an X protocol port and an admin port when the version
    /// and the base definition call for them, one pool each.
    pub fn assign_service_ports(
        &self,
        alloc: &mut PortAllocator,
        defs: &mut [SandboxDefinition],
    ) -> Result<(), CoreError> {
        let Some(first) = defs.iter().map(|d| d.port).min() else {
            return Ok(());
        };
        let count = pool_size(u32::try_from(defs.len()).unwrap_or(u32::MAX))?;
        if self.has(features::MYSQLX_DEFAULT) && !self.base.disable_mysqlx {
            let start = u32::from(first) + u32::from(self.defaults.mysqlx_port_delta);
            let ports = alloc.pool("mysqlx", start, count)?;
            for (def, port) in defs.iter_mut().zip(ports) {
                def.mysqlx_port = Some(port);
            }
        }
        if self.base.enable_admin_address {
            self.require(features::ADMIN_ADDRESS, "the admin address")?;
            let start = u32::from(first) + u32::from(self.defaults.admin_port_delta);
            let ports = alloc.pool("admin", start, count)?;
            for (def, port) in defs.iter_mut().zip(ports) {
                def.admin_port = Some(port);
            }
        }
        Ok(())
    }

    /// Fresh per-node copy of the base definition.
    fn node_definition(
        &self,
        path: &Path,
        name: &str,
        node_num: u32,
        port: u16,
        sb_type: SandboxType,
    ) -> SandboxDefinition {
        let mut def = self.base.clone();
        def.basedir = self.base.resolved_basedir();
        def.sandbox_dir = path.to_path_buf();
        def.dir_name = Some(name.to_owned());
        def.sb_type = sb_type;
        def.port = port;
        def.mysqlx_port = None;
        def.admin_port = None;
        def.extra_ports = Vec::new();
        def.server_id = node_num * 100;
        def.node_num = node_num;
        def.prompt = name.to_owned();
        def.multi = true;
        def.force = false;
        def
    }

    fn replication_options(&self, port: u16) -> String {
        format!(
            "log-bin=mysql-bin\nrelay-log=mysql-relay\nrelay-log-index=mysql-relay\n\
             log-slave-updates\nbinlog-format=ROW\nreport-host=127.0.0.1\nreport-port={port}"
        )
    }

    fn gtid_options(&self) -> String {
        "gtid_mode=ON\nenforce-gtid-consistency=ON".to_owned()
    }

    fn crash_safe_options(&self) -> String {
        if self.has(features::CRASH_SAFE) {
            "master-info-repository=table\nrelay-log-info-repository=table\nrelay-log-recovery=on"
                .to_owned()
        } else {
            String::new()
        }
    }

    fn read_only_options(&self, read_only: ReadOnly) -> Result<Vec<String>, CoreError> {
        match read_only {
            ReadOnly::Off => Ok(Vec::new()),
            ReadOnly::ReadOnly => Ok(vec!["read_only=ON".to_owned()]),
            ReadOnly::SuperReadOnly => {
                self.require(features::SUPER_READ_ONLY, "super_read_only")?;
                Ok(vec![
                    "read_only=ON".to_owned(),
                    "super_read_only=ON".to_owned(),
                ])
            }
        }
    }

    /// Template data shared by every topology; orchestrators override the
    /// topology-specific keys.
    fn topology_data(&self, path: &Path, nodes: &[SandboxDefinition], first_node_id: u32) -> TemplateData {
        let basedir = self.base.resolved_basedir();
        let client_basedir = self
            .base
            .client_basedir
            .clone()
            .unwrap_or_else(|| basedir.clone());
        let value = json!({
            "SandboxDir": path.display().to_string(),
            "Basedir": basedir.display().to_string(),
            "ClientBasedir": client_basedir.display().to_string(),
            "Nodes": node_entries(nodes, first_node_id),
            "Slaves": [],
            "NdbNodes": [],
            "MasterName": "",
            "MasterPort": 0,
            "RplUser": self.base.rpl_user,
            "RplPassword": self.base.rpl_password,
            "ChangeMasterExtra": "",
            "Semisync": false,
            "ClusterPort": 0,
            "Replicas": 0,
        });
        match value {
            Value::Object(map) => map,
            _ => TemplateData::new(),
        }
    }
}

fn pool_size(count: u32) -> Result<u16, CoreError> {
    u16::try_from(count)
        .map_err(|_| CoreError::Validation(format!("{count} nodes cannot fit in the port range")))
}

fn node_entries(nodes: &[SandboxDefinition], first_node_id: u32) -> Value {
    let mut node_id = first_node_id;
    Value::Array(
        nodes
            .iter()
            .map(|n| {
                let entry = json!({
                    "NodeName": n.dir_name.clone().unwrap_or_default(),
                    "NodeNum": n.node_num,
                    "NodeId": node_id,
                    "Port": n.port,
                    "ServerId": n.server_id,
                });
                node_id += 1;
                entry
            })
            .collect(),
    )
}

/// A replica and the sources it replicates from.
fn slave_entry(slave: &SandboxDefinition, masters: &[&SandboxDefinition]) -> Value {
    json!({
        "NodeName": slave.dir_name.clone().unwrap_or_default(),
        "Port": slave.port,
        "Masters": masters
            .iter()
            .map(|m| json!({
                "NodeName": m.dir_name.clone().unwrap_or_default(),
                "Port": m.port,
            }))
            .collect::<Vec<_>>(),
    })
}

fn common_scripts() -> Vec<ScriptSpec> {
    COMMON_SCRIPTS
        .iter()
        .copied()
        .map(|name| ScriptSpec::exec(name, name))
        .collect()
}

/// `n1`, `n2`, ... shortcuts for every node.
fn numbered_shortcuts(nodes: &[SandboxDefinition]) -> Vec<(String, String)> {
    nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (format!("n{}", i + 1), n.dir_name.clone().unwrap_or_default()))
        .collect()
}

pub fn prefix_for<'d>(defaults: &'d Defaults, topology: &Topology) -> &'d str {
    match topology {
        Topology::MasterSlave { .. } => &defaults.master_slave_prefix,
        Topology::Group {
            single_primary: true,
            ..
        } => &defaults.group_sp_prefix,
        Topology::Group { .. } => &defaults.group_prefix,
        Topology::FanIn { .. } => &defaults.fan_in_prefix,
        Topology::AllMasters { .. } => &defaults.all_masters_prefix,
        Topology::Ndb { .. } => &defaults.ndb_prefix,
        Topology::Pxc { .. } => &defaults.pxc_prefix,
        Topology::Multiple { .. } => &defaults.multiple_prefix,
    }
}

pub fn target_path(ctx: &PlanContext<'_>, topology: &Topology) -> PathBuf {
    ctx.topology_path(prefix_for(ctx.defaults, topology))
}

/// Validate capabilities and allocate every port for `topology`.
///
/// `used` is the set of ports already taken; it is not modified.
pub fn plan(
    ctx: &PlanContext<'_>,
    topology: &Topology,
    used: BTreeSet<u16>,
) -> Result<TopologyPlan, CoreError> {
    let mut alloc = PortAllocator::new(used);
    let path = target_path(ctx, topology);
    let plan = match topology {
        Topology::MasterSlave {
            nodes,
            semisync,
            read_only,
        } => master_slave::plan(ctx, &mut alloc, path, *nodes, *semisync, *read_only)?,
        Topology::Group {
            nodes,
            single_primary,
        } => group::plan(ctx, &mut alloc, path, *nodes, *single_primary)?,
        Topology::FanIn {
            nodes,
            masters,
            slaves,
            read_only,
        } => multi_source::plan_fan_in(ctx, &mut alloc, path, *nodes, masters, slaves, *read_only)?,
        Topology::AllMasters { nodes } => {
            multi_source::plan_all_masters(ctx, &mut alloc, path, *nodes)?
        }
        Topology::Ndb {
            sql_nodes,
            ndb_nodes,
        } => ndb::plan(ctx, &mut alloc, path, *sql_nodes, *ndb_nodes)?,
        Topology::Pxc { nodes } => pxc::plan(ctx, &mut alloc, path, *nodes)?,
        Topology::Multiple { nodes } => multiple::plan(ctx, &mut alloc, path, *nodes)?,
    };
    info!(
        "planned {} topology at {}: {} member(s), ports {:?}",
        plan.kind,
        plan.path.display(),
        plan.node_count(),
        plan.all_ports()
    );
    Ok(plan)
}
