//! Single-node installer.
//!
//! [`NodeInstaller::install`] turns one [`SandboxDefinition`] into a
//! directory holding a data directory, `my.sandbox.cnf`, the grants file,
//! the lifecycle scripts and a `sbdescription.json`. The init, start and
//! grants scripts either run immediately ([`ExecMode::Inline`]) or come back
//! as an [`ExecutionList`] for a topology to schedule ([`ExecMode::Deferred`]).
//!
//! The installer never rolls anything back; callers register cleanup before
//! calling it.

use crate::oplog::OperationLog;
use crate::ports::check_port_availability;
use crate::CoreError;
use dbsandbox_runtime::{
    check_basedir_prereqs, format_missing, write_script, CommandRunner, ExecCommand,
    ExecutionList, Stage, TemplateCollection, TemplateData, WaveScheduler,
};
use dbsandbox_schema::{
    features, CapabilityMatrix, Defaults, SandboxDefinition, SandboxType, ServerUuid,
    VersionTriple,
};
use dbsandbox_store::SandboxDescription;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lifecycle scripts written into every sandbox directory.
pub const NODE_SCRIPTS: &[&str] = &[
    "start",
    "stop",
    "status",
    "restart",
    "clear",
    "use",
    "send_kill",
    "load_grants",
    "my",
    "show_binlog",
    "show_relaylog",
    "add_option",
    "test_sb",
];

pub const CNF_FILE: &str = "my.sandbox.cnf";
pub const GRANTS_FILE: &str = "grants.mysql";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// Run init, start and grants before returning.
    Inline,
    /// Return the commands without running them.
    Deferred,
}

#[derive(Debug, Clone)]
pub struct InstalledNode {
    pub path: PathBuf,
    pub name: String,
    pub ports: Vec<u16>,
    /// Empty in inline mode.
    pub commands: ExecutionList,
    /// Set when `force` replaced an existing sandbox at `path`.
    pub replaced: Option<BTreeSet<u16>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum InitMethod {
    Initialize,
    InstallDb(PathBuf),
}

#[derive(Debug, Clone)]
struct NodeVariant {
    init: InitMethod,
    grants_template: &'static str,
    native_auth: bool,
    mysqld: String,
    server_uuid: Option<ServerUuid>,
    mysqlx_off: bool,
}

pub struct NodeInstaller<'a> {
    capabilities: &'a CapabilityMatrix,
    templates: &'a TemplateCollection,
    defaults: &'a Defaults,
    runner: Arc<dyn CommandRunner>,
}

impl<'a> NodeInstaller<'a> {
    pub fn new(
        capabilities: &'a CapabilityMatrix,
        templates: &'a TemplateCollection,
        defaults: &'a Defaults,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            capabilities,
            templates,
            defaults,
            runner,
        }
    }

    /// Directory the definition installs into.
    pub fn target_path(&self, def: &SandboxDefinition) -> PathBuf {
        let name = def
            .dir_name
            .clone()
            .unwrap_or_else(|| def.default_dir_name(&self.defaults.sandbox_prefix));
        def.sandbox_dir.join(name)
    }

    /// Materialize one sandbox. Ports of the new node are added to
    /// `installed`; ports of a sandbox replaced through `force` are removed
    /// from it first.
    #[allow(clippy::too_many_lines)]
    pub fn install(
        &self,
        def: &SandboxDefinition,
        installed: &mut BTreeSet<u16>,
        mode: ExecMode,
        log: &OperationLog,
    ) -> Result<InstalledNode, CoreError> {
        // 1. basedir and everything that can be decided without touching it
        let (basedir, variant) = self.preflight(def)?;

        // 2. target directory
        let path = self.target_path(def);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut replaced = None;
        if path.exists() {
            if !def.force {
                return Err(CoreError::ResourceConflict(format!(
                    "directory {} already exists; use force to replace it",
                    path.display()
                )));
            }
            // ports are checked against what remains once the old sandbox is gone
            let mut remaining = installed.clone();
            if let Ok(desc) = SandboxDescription::read(&path) {
                for port in desc.port_set() {
                    remaining.remove(&port);
                }
            }
            self.validate_ports(def, &remaining)?;
            let reclaimed = remove_existing_sandbox(&path, self.runner.as_ref())?;
            for port in &reclaimed {
                installed.remove(port);
            }
            log.record(&format!("replaced existing sandbox {}", path.display()));
            replaced = Some(reclaimed);
        }

        // 3. ports
        self.validate_ports(def, installed)?;

        // 4. directories
        info!("installing {} {} into {}", def.flavor, def.version, path.display());
        let data_dir = path.join("data");
        let tmp_dir = path.join("tmp");
        fs::create_dir_all(&data_dir)?;
        fs::create_dir_all(&tmp_dir)?;
        log.record(&format!("created {}", path.display()));

        // 5. per-version variants were resolved above
        let data = self.node_data(def, &variant, &basedir, &path, &name);

        // 6. initialization script; runs now unless deferred
        let init_db = write_script(&path, "init_db", &self.templates.render("init_db", &data)?, true)?;
        let mut commands = ExecutionList::new();
        let init_cmd = ExecCommand::new(&init_db).current_dir(&path);
        match mode {
            ExecMode::Inline => {
                debug!("{name}: initializing data directory");
                self.runner.run(&init_cmd)?;
                log.record("initialized data directory");
            }
            ExecMode::Deferred => commands.push(init_cmd, Stage::Init, format!("{name} init")),
        }

        // 7. description
        let ports = def.all_ports();
        let description = SandboxDescription {
            basedir: basedir.clone(),
            sb_type: def.sb_type,
            version: def.version.clone(),
            flavor: def.flavor,
            port: ports.clone(),
            nodes: 0,
            node_num: def.node_num,
            log_file: log.description_value(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        description.write(&path)?;

        // 8. lifecycle scripts, configuration and grants
        for script in NODE_SCRIPTS {
            let content = self.templates.render(script, &data)?;
            write_script(&path, script, &content, true)?;
        }
        write_script(&path, CNF_FILE, &self.templates.render("my.sandbox.cnf", &data)?, false)?;
        write_script(
            &path,
            GRANTS_FILE,
            &self.templates.render(variant.grants_template, &data)?,
            false,
        )?;
        write_grants_sql(
            &path,
            "pre_grants.sql",
            def.pre_grants_sql_file.as_deref(),
            &def.pre_grants_sql,
        )?;
        write_grants_sql(
            &path,
            "post_grants.sql",
            def.post_grants_sql_file.as_deref(),
            &def.post_grants_sql,
        )?;
        debug!("{name}: wrote {} scripts", NODE_SCRIPTS.len());

        // 9. the server UUID is written by init_db from `ServerUuid`
        if let Some(uuid) = &variant.server_uuid {
            debug!("{name}: server uuid {uuid}");
        }

        // 10. start and grants
        installed.extend(ports.iter().copied());
        if !def.skip_start {
            let mut later = ExecutionList::new();
            later.push(
                ExecCommand::new(path.join("start"))
                    .args(def.start_args.iter().cloned())
                    .current_dir(&path),
                Stage::Start,
                format!("{name} start"),
            );
            if def.load_grants {
                later.push(
                    ExecCommand::new(path.join("load_grants")).current_dir(&path),
                    Stage::Grants,
                    format!("{name} grants"),
                );
            }
            match mode {
                ExecMode::Inline => {
                    WaveScheduler::new(Arc::clone(&self.runner)).run_sequential(&later)?;
                    log.record(&format!("started on port {}", def.port));
                }
                ExecMode::Deferred => commands.append(later),
            }
        }

        Ok(InstalledNode {
            path,
            name,
            ports,
            commands,
            replaced,
        })
    }

    /// Run every check `install` performs before it touches the target
    /// directory.
    pub fn check_prerequisites(&self, def: &SandboxDefinition) -> Result<(), CoreError> {
        self.preflight(def).map(|_| ())
    }

    fn preflight(&self, def: &SandboxDefinition) -> Result<(PathBuf, NodeVariant), CoreError> {
        let version = def.version_triple()?;
        let basedir = def.resolved_basedir();
        if !basedir.is_dir() {
            return Err(CoreError::Prerequisite(format!(
                "basedir {} not found; unpack {} {} into {}",
                basedir.display(),
                def.flavor,
                def.version,
                def.sandbox_binary.display()
            )));
        }
        let variant = self.resolve_variant(def, version, &basedir)?;
        let missing = check_basedir_prereqs(
            &basedir,
            def.flavor,
            matches!(variant.init, InitMethod::InstallDb(_)),
        );
        if !missing.is_empty() {
            return Err(CoreError::Prerequisite(format_missing(&missing)));
        }
        Ok((basedir, variant))
    }

    fn resolve_variant(
        &self,
        def: &SandboxDefinition,
        version: VersionTriple,
        basedir: &Path,
    ) -> Result<NodeVariant, CoreError> {
        let has = |feature: &str| {
            self.capabilities
                .has_capability_at(def.flavor, feature, version)
        };

        let init = if has(features::INITIALIZE) {
            InitMethod::Initialize
        } else if has(features::INSTALL_DB) {
            let in_bin = basedir.join("bin").join("mysql_install_db");
            if in_bin.is_file() {
                InitMethod::InstallDb(in_bin)
            } else {
                InitMethod::InstallDb(basedir.join("scripts").join("mysql_install_db"))
            }
        } else {
            return Err(CoreError::Prerequisite(format!(
                "{} {} has no supported way to initialize a data directory",
                def.flavor, def.version
            )));
        };

        let grants_template = if has(features::ROLES) && has(features::CREATE_USER) {
            "grants_8x"
        } else if has(features::CREATE_USER) {
            "grants_57"
        } else {
            "grants_5x"
        };

        let mut mysqld = "mysqld".to_owned();
        if def.expose_dd_tables {
            if !has(features::DATA_DICTIONARY) {
                return Err(CoreError::Prerequisite(format!(
                    "exposing data dictionary tables requires a server with a data dictionary, not {} {}",
                    def.flavor, def.version
                )));
            }
            mysqld = "mysqld-debug".to_owned();
        }
        if let Some(custom) = &def.custom_mysqld {
            if def.expose_dd_tables && custom != "mysqld-debug" {
                return Err(CoreError::Validation(format!(
                    "custom mysqld '{custom}' conflicts with exposing data dictionary tables"
                )));
            }
            mysqld.clone_from(custom);
        }
        if mysqld != "mysqld" && !basedir.join("bin").join(&mysqld).is_file() {
            return Err(CoreError::Prerequisite(format!(
                "server binary {} not found",
                basedir.join("bin").join(&mysqld).display()
            )));
        }

        let server_uuid = (!def.keep_uuid && has(features::CUSTOM_UUID))
            .then(|| ServerUuid::deterministic(def.port, def.node_num));

        Ok(NodeVariant {
            init,
            grants_template,
            native_auth: def.native_auth_plugin && has(features::NATIVE_AUTH),
            mysqld,
            server_uuid,
            mysqlx_off: has(features::MYSQLX_DEFAULT) && def.mysqlx_port.is_none(),
        })
    }

    fn validate_ports(
        &self,
        def: &SandboxDefinition,
        installed: &BTreeSet<u16>,
    ) -> Result<(), CoreError> {
        let extra_label = match def.sb_type {
            SandboxType::GroupNode => "group replication",
            SandboxType::PxcNode => "wsrep",
            _ => "extra",
        };
        let mut labelled = vec![("main", def.port)];
        labelled.extend(def.mysqlx_port.map(|p| ("mysqlx", p)));
        labelled.extend(def.admin_port.map(|p| ("admin", p)));
        labelled.extend(def.extra_ports.iter().map(|p| (extra_label, *p)));

        let mut own = BTreeSet::new();
        for (label, port) in labelled {
            check_port_availability(label, port, installed)?;
            if !own.insert(port) {
                return Err(CoreError::ResourceConflict(format!(
                    "{label} port {port} is assigned twice in the same sandbox"
                )));
            }
        }
        Ok(())
    }

    fn node_data(
        &self,
        def: &SandboxDefinition,
        variant: &NodeVariant,
        basedir: &Path,
        path: &Path,
        name: &str,
    ) -> TemplateData {
        let (init_method, install_db) = match &variant.init {
            InitMethod::Initialize => ("initialize", String::new()),
            InitMethod::InstallDb(p) => ("installdb", p.display().to_string()),
        };
        let client_basedir = def.client_basedir.as_deref().unwrap_or(basedir);
        let repl_options = [
            &def.repl_options,
            &def.gtid_options,
            &def.repl_crash_safe_options,
            &def.semisync_options,
        ]
        .iter()
        .filter(|s| !s.is_empty())
        .map(|s| s.trim_end())
        .collect::<Vec<_>>()
        .join("\n");
        let mut cnf_options = def.my_cnf_options.clone();
        if variant.mysqlx_off {
            cnf_options.push("mysqlx=OFF".to_owned());
        }
        let server_id = if def.server_id == 0 {
            u32::from(def.port)
        } else {
            def.server_id
        };

        let value = json!({
            "SandboxDir": path.display().to_string(),
            "SandboxName": name,
            "Basedir": basedir.display().to_string(),
            "ClientBasedir": client_basedir.display().to_string(),
            "DataDir": path.join("data").display().to_string(),
            "TmpDir": path.join("tmp").display().to_string(),
            "Socket": format!("/tmp/mysql_sandbox{}.sock", def.port),
            "Port": def.port,
            "MysqlXPort": def.mysqlx_port.unwrap_or(0),
            "AdminPort": def.admin_port.unwrap_or(0),
            "ServerId": server_id,
            "NodeNum": def.node_num,
            "Version": def.version,
            "Flavor": def.flavor.as_str(),
            "Prompt": def.prompt,
            "DbUser": def.db_user,
            "DbPassword": def.db_password,
            "RplUser": def.rpl_user,
            "RplPassword": def.rpl_password,
            "RemoteAccess": def.remote_access,
            "BindAddress": def.bind_address,
            "Mysqld": variant.mysqld,
            "InitMethod": init_method,
            "InstallDb": install_db,
            "InitOptions": def.init_options,
            "MyCnfOptions": cnf_options,
            "ReplOptions": repl_options,
            "ServerUuid": variant
                .server_uuid
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
            "NativeAuth": variant.native_auth,
        });
        match value {
            Value::Object(map) => map,
            _ => TemplateData::new(),
        }
    }
}

/// Stop the sandbox at `path` through its own scripts and delete it.
///
/// Returns the ports its description listed. A failing stop script is
/// logged; the directory is removed regardless.
pub fn remove_existing_sandbox(
    path: &Path,
    runner: &dyn CommandRunner,
) -> Result<BTreeSet<u16>, CoreError> {
    let ports = match SandboxDescription::read(path) {
        Ok(desc) => desc.port_set(),
        Err(e) => {
            warn!("{}: {e}; its ports cannot be reclaimed", path.display());
            BTreeSet::new()
        }
    };
    let stop = ["stop_all", "stop"]
        .iter()
        .map(|s| path.join(s))
        .find(|p| p.is_file());
    if let Some(stop) = stop {
        if let Err(e) = runner.run(&ExecCommand::new(&stop).current_dir(path)) {
            warn!("stopping {} failed: {e}", path.display());
        }
    }
    fs::remove_dir_all(path)?;
    info!("removed sandbox {}", path.display());
    Ok(ports)
}

fn write_grants_sql(
    dir: &Path,
    file_name: &str,
    source: Option<&Path>,
    statements: &[String],
) -> Result<(), CoreError> {
    if source.is_none() && statements.is_empty() {
        return Ok(());
    }
    let mut content = match source {
        Some(file) => fs::read_to_string(file).map_err(|e| {
            CoreError::Prerequisite(format!("cannot read SQL file {}: {e}", file.display()))
        })?,
        None => String::new(),
    };
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    for stmt in statements {
        content.push_str(stmt.trim_end());
        if !stmt.trim_end().ends_with(';') {
            content.push(';');
        }
        content.push('\n');
    }
    write_script(dir, file_name, &content, false)?;
    Ok(())
}
