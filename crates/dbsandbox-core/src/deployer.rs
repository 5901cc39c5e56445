//! Top-level entry point: single sandboxes, topologies and deletion.

use crate::concurrency::StoreLock;
use crate::installer::{remove_existing_sandbox, ExecMode, NodeInstaller};
use crate::oplog::OperationLog;
use crate::ports::PortAllocator;
use crate::topology::{self, PlanContext, TopologyPlan};
use crate::CoreError;
use dbsandbox_runtime::{
    CommandRunner, ExecCommand, ExecutionList, TemplateCollection, WaveReport, WaveScheduler,
};
use dbsandbox_schema::{
    CapabilityMatrix, Defaults, Flavor, SandboxDefinition, SandboxType, Topology, TopologyRequest,
};
use dbsandbox_store::{
    collect_installed_ports, CatalogDivergence, RollbackStep, SandboxCatalog, SandboxDescription,
    SandboxItem, SandboxLayout, StoreError, WalOpKind, WriteAheadLog,
};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-node summary of a deployment.
#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    pub name: String,
    pub port: u16,
    pub server_id: u32,
    pub start_args: Vec<String>,
    pub load_grants: bool,
}

/// Outcome of [`Deployer::deploy_single`] or [`Deployer::deploy_topology`].
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentReport {
    pub sandbox_dir: PathBuf,
    pub sb_type: SandboxType,
    pub version: String,
    pub flavor: Flavor,
    pub ports: Vec<u16>,
    pub nodes: Vec<NodeReport>,
    /// Commands handed to the scheduler; zero for inline single installs.
    pub commands: usize,
    pub waves: usize,
}

pub struct Deployer {
    defaults: Defaults,
    layout: SandboxLayout,
    capabilities: CapabilityMatrix,
    templates: TemplateCollection,
    runner: Arc<dyn CommandRunner>,
    catalog: SandboxCatalog,
    wal: WriteAheadLog,
}

impl Deployer {
    /// Build a deployer over `defaults`.
    ///
    /// Cleanup entries left by a crashed run are rolled back here, unless
    /// another process currently holds the catalog lock.
    pub fn new(defaults: Defaults, runner: Arc<dyn CommandRunner>) -> Result<Self, CoreError> {
        defaults.validate()?;
        let layout = SandboxLayout::from_defaults(&defaults);
        layout.initialize()?;
        let wal = WriteAheadLog::new(&layout);
        wal.initialize()?;

        match StoreLock::try_acquire(&layout.lock_file()) {
            Ok(Some(_lock)) => match wal.recover() {
                Ok(0) => {}
                Ok(n) => info!("rolled back {n} interrupted deployment(s)"),
                Err(e) => warn!("WAL recovery failed: {e}"),
            },
            Ok(None) => debug!("catalog lock held; skipping WAL recovery"),
            Err(e) => warn!("catalog lock check failed; skipping WAL recovery: {e}"),
        }

        let catalog = SandboxCatalog::new(layout.catalog_file());
        Ok(Self {
            defaults,
            layout,
            capabilities: CapabilityMatrix::builtin(),
            templates: TemplateCollection::builtin()?,
            runner,
            catalog,
            wal,
        })
    }

    pub fn defaults(&self) -> &Defaults {
        &self.defaults
    }

    pub fn layout(&self) -> &SandboxLayout {
        &self.layout
    }

    pub fn capabilities(&self) -> &CapabilityMatrix {
        &self.capabilities
    }

    pub fn catalog(&self) -> &SandboxCatalog {
        &self.catalog
    }

    pub fn runner(&self) -> &Arc<dyn CommandRunner> {
        &self.runner
    }

    /// Reserved ports, ports of every description under the sandbox home
    /// and ports of every catalog entry.
    pub fn installed_ports(&self) -> Result<BTreeSet<u16>, CoreError> {
        let mut ports: BTreeSet<u16> = self.defaults.reserved_ports.iter().copied().collect();
        ports.extend(collect_installed_ports(self.layout.sandbox_home())?);
        ports.extend(self.catalog.all_ports()?);
        Ok(ports)
    }

    /// A definition for `version` with this deployer's defaults applied.
    pub fn definition(&self, version: &str, flavor: Flavor) -> SandboxDefinition {
        SandboxDefinition::new(version, flavor, &self.defaults)
    }

    fn installer(&self) -> NodeInstaller<'_> {
        NodeInstaller::new(
            &self.capabilities,
            &self.templates,
            &self.defaults,
            Arc::clone(&self.runner),
        )
    }

    fn operation_log(&self, path: &Path) -> Result<OperationLog, CoreError> {
        if !self.defaults.log_sb_operations {
            return Ok(OperationLog::disabled());
        }
        let name = dir_name(path);
        OperationLog::open(&self.layout.operation_log(&name))
    }

    /// Ports in use, minus those of a sandbox at `path` that `force` is
    /// about to replace.
    fn allocation_base(&self, path: &Path, force: bool) -> Result<BTreeSet<u16>, CoreError> {
        let mut used = self.installed_ports()?;
        if force && path.exists() {
            if let Ok(desc) = SandboxDescription::read(path) {
                for port in desc.port_set() {
                    used.remove(&port);
                }
            }
            if let Some(item) = self.catalog.get(path)? {
                for port in item.port {
                    used.remove(&port);
                }
            }
            for port in &self.defaults.reserved_ports {
                used.insert(*port);
            }
        }
        Ok(used)
    }

    fn record_in_catalog(&self, item: SandboxItem) -> Result<(), CoreError> {
        let _lock = StoreLock::acquire(&self.layout.lock_file())?;
        self.catalog.update(item)?;
        Ok(())
    }

    fn forget(&self, path: &Path) -> Result<(), CoreError> {
        let _lock = StoreLock::acquire(&self.layout.lock_file())?;
        match self.catalog.delete(path) {
            Ok(_) | Err(StoreError::EntryNotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Install one sandbox.
    ///
    /// A zero port means "first free port from the version's default port".
    /// An existing target directory is a conflict unless `force` is set, in
    /// which case the old sandbox is stopped and replaced once every
    /// prerequisite of the new one has been checked.
    #[allow(clippy::too_many_lines)]
    pub fn deploy_single(&self, def: &SandboxDefinition) -> Result<DeploymentReport, CoreError> {
        let version = def.version_triple()?;
        let mut def = def.clone();
        def.sb_type = SandboxType::Single;
        if def.basedir.as_os_str().is_empty() {
            def.basedir = def.resolved_basedir();
        }

        let installer = self.installer();
        let path = installer.target_path(&def);
        if path.exists() && !def.force {
            return Err(CoreError::ResourceConflict(format!(
                "directory {} already exists; use force to replace it",
                path.display()
            )));
        }

        // every port is settled before anything is written
        let in_use = self.allocation_base(&path, def.force)?;
        let mut alloc = PortAllocator::new(in_use.clone());
        def.port = if def.port == 0 {
            let start = version.default_port().ok_or_else(|| {
                CoreError::Validation(format!(
                    "version {} has no default port; set one explicitly",
                    def.version
                ))
            })?;
            alloc.pool("main", u32::from(start), 1)?[0]
        } else {
            alloc.claim("main", def.port)?
        };
        for port in &def.extra_ports {
            alloc.claim("extra", *port)?;
        }
        if def.mysqlx_port.is_none() && def.admin_port.is_none() {
            let ctx = PlanContext::new(&self.defaults, &self.capabilities, &def)?;
            let mut single = [def.clone()];
            ctx.assign_service_ports(&mut alloc, &mut single)?;
            let [assigned] = single;
            def = assigned;
        } else {
            if let Some(port) = def.mysqlx_port {
                alloc.claim("mysqlx", port)?;
            }
            if let Some(port) = def.admin_port {
                alloc.claim("admin", port)?;
            }
        }
        info!("deploying {} {} on port {} into {}", def.flavor, def.version, def.port, path.display());

        if path.exists() {
            installer.check_prerequisites(&def)?;
            remove_existing_sandbox(&path, self.runner.as_ref())?;
            self.forget(&path)?;
        }
        let log = self.operation_log(&path)?;
        log.record(&format!("allocated ports {:?}", def.all_ports()));

        let wal_op = self.wal.begin(WalOpKind::DeploySingle, &path)?;
        // Register rollback before creating side effects.
        self.wal
            .add_rollback_step(&wal_op, RollbackStep::RemoveDir(path.clone()))?;

        let deploy = || -> Result<DeploymentReport, CoreError> {
            let mut installed = in_use.clone();
            let (node, report) = if def.run_concurrently {
                let node = installer.install(&def, &mut installed, ExecMode::Deferred, &log)?;
                let report = WaveScheduler::new(Arc::clone(&self.runner)).run(&node.commands)?;
                (node, report)
            } else {
                let node = installer.install(&def, &mut installed, ExecMode::Inline, &log)?;
                (node, WaveReport::default())
            };

            self.wal.add_rollback_step(
                &wal_op,
                RollbackStep::RemoveCatalogEntry {
                    catalog: self.catalog.path().to_path_buf(),
                    destination: node.path.clone(),
                },
            )?;
            self.record_in_catalog(SandboxItem {
                origin: def.resolved_basedir(),
                sb_type: SandboxType::Single,
                version: def.version.clone(),
                flavor: def.flavor,
                port: node.ports.clone(),
                nodes: Vec::new(),
                destination: node.path.clone(),
                log_directory: log.path().and_then(Path::parent).map(Path::to_path_buf),
            })?;
            log.record("registered in catalog");

            Ok(DeploymentReport {
                sandbox_dir: node.path,
                sb_type: SandboxType::Single,
                version: def.version.clone(),
                flavor: def.flavor,
                ports: node.ports,
                nodes: vec![NodeReport {
                    name: node.name,
                    port: def.port,
                    server_id: if def.server_id == 0 {
                        u32::from(def.port)
                    } else {
                        def.server_id
                    },
                    start_args: def.start_args.clone(),
                    load_grants: def.load_grants,
                }],
                commands: report.commands,
                waves: report.waves,
            })
        };

        match deploy() {
            Ok(report) => {
                self.wal.commit(&wal_op)?;
                info!("sandbox {} ready", report.sandbox_dir.display());
                Ok(report)
            }
            Err(e) => {
                warn!("deployment of {} failed, rolling back: {e}", path.display());
                if let Err(abort) = self.wal.abort(&wal_op) {
                    warn!("rollback of {} incomplete: {abort}", path.display());
                }
                Err(e)
            }
        }
    }

    /// Check a topology request and allocate its ports without writing
    /// anything.
    pub fn plan_topology(
        &self,
        base: &SandboxDefinition,
        request: &TopologyRequest,
    ) -> Result<TopologyPlan, CoreError> {
        let topology = Topology::from_request(request)?;
        let ctx = PlanContext::new(&self.defaults, &self.capabilities, base)?;
        let path = topology::target_path(&ctx, &topology);
        if path.exists() && !base.force {
            return Err(CoreError::ResourceConflict(format!(
                "directory {} already exists; use force to replace it",
                path.display()
            )));
        }
        topology::plan(&ctx, &topology, self.allocation_base(&path, base.force)?)
    }

    /// Build every node of a topology, start it and wire replication.
    ///
    /// Any failure rolls back everything this call created.
    #[allow(clippy::too_many_lines)]
    pub fn deploy_topology(
        &self,
        base: &SandboxDefinition,
        request: &TopologyRequest,
    ) -> Result<DeploymentReport, CoreError> {
        let plan = self.plan_topology(base, request)?;
        let installer = self.installer();
        let path = plan.path.clone();

        if let Some(node) = plan.nodes.first() {
            installer.check_prerequisites(node)?;
        }
        if path.exists() {
            remove_existing_sandbox(&path, self.runner.as_ref())?;
            self.forget(&path)?;
        }
        let log = self.operation_log(&path)?;
        log.record(&format!(
            "planned {} topology with ports {:?}",
            plan.kind,
            plan.all_ports()
        ));

        let wal_op = self.wal.begin(WalOpKind::DeployTopology, &path)?;
        self.wal
            .add_rollback_step(&wal_op, RollbackStep::RemoveDir(path.clone()))?;

        let deploy = || -> Result<WaveReport, CoreError> {
            let mut installed = self.installed_ports()?;
            let commands = plan.materialize(&installer, &self.templates, &mut installed, &log)?;

            SandboxDescription {
                basedir: base.resolved_basedir(),
                sb_type: plan.sb_type,
                version: base.version.clone(),
                flavor: base.flavor,
                port: plan.all_ports(),
                nodes: plan.node_count(),
                node_num: 0,
                log_file: log.description_value(),
                timestamp: chrono::Utc::now().to_rfc3339(),
            }
            .write(&path)?;

            self.wal.add_rollback_step(
                &wal_op,
                RollbackStep::RemoveCatalogEntry {
                    catalog: self.catalog.path().to_path_buf(),
                    destination: path.clone(),
                },
            )?;
            self.record_in_catalog(SandboxItem {
                origin: base.resolved_basedir(),
                sb_type: plan.sb_type,
                version: base.version.clone(),
                flavor: base.flavor,
                port: plan.all_ports(),
                nodes: plan.member_names(),
                destination: path.clone(),
                log_directory: log.path().and_then(Path::parent).map(Path::to_path_buf),
            })?;

            let report = self.run_commands(&commands, base.run_concurrently)?;
            log.record(&format!(
                "ran {} command(s) in {} wave(s)",
                report.commands, report.waves
            ));

            if let (Some(script), false) = (plan.initializer, base.skip_start) {
                info!("{}: running {script}", path.display());
                self.runner
                    .run(&ExecCommand::new(path.join(script)).current_dir(&path))?;
                log.record(&format!("ran {script}"));
            }
            Ok(report)
        };

        match deploy() {
            Ok(report) => {
                self.wal.commit(&wal_op)?;
                info!("{} topology {} ready", plan.kind, path.display());
                Ok(DeploymentReport {
                    sandbox_dir: path,
                    sb_type: plan.sb_type,
                    version: base.version.clone(),
                    flavor: base.flavor,
                    ports: plan.all_ports(),
                    nodes: plan
                        .nodes
                        .iter()
                        .map(|n| NodeReport {
                            name: n.dir_name.clone().unwrap_or_default(),
                            port: n.port,
                            server_id: n.server_id,
                            start_args: n.start_args.clone(),
                            load_grants: n.load_grants,
                        })
                        .collect(),
                    commands: report.commands,
                    waves: report.waves,
                })
            }
            Err(e) => {
                warn!("{} topology failed, rolling back {}: {e}", plan.kind, path.display());
                if let Err(abort) = self.wal.abort(&wal_op) {
                    warn!("rollback of {} incomplete: {abort}", path.display());
                }
                Err(e)
            }
        }
    }

    fn run_commands(&self, commands: &ExecutionList, concurrent: bool) -> Result<WaveReport, CoreError> {
        let scheduler = WaveScheduler::new(Arc::clone(&self.runner));
        let report = if concurrent {
            scheduler.run(commands)?
        } else {
            scheduler.run_sequential(commands)?
        };
        Ok(report)
    }

    /// Resolve a sandbox name (relative to the sandbox home) or path.
    pub fn sandbox_path(&self, name_or_path: &str) -> PathBuf {
        let candidate = Path::new(name_or_path);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.layout.sandbox_path(name_or_path)
        }
    }

    /// Stop and remove a sandbox or topology. Returns the ports it held.
    pub fn delete_sandbox(&self, name_or_path: &str) -> Result<BTreeSet<u16>, CoreError> {
        let path = self.sandbox_path(name_or_path);
        if !path.is_dir() {
            return Err(CoreError::SandboxNotFound(path.display().to_string()));
        }

        let wal_op = self.wal.begin(WalOpKind::DeleteSandbox, &path)?;
        self.wal
            .add_rollback_step(&wal_op, RollbackStep::RemoveDir(path.clone()))?;
        self.wal.add_rollback_step(
            &wal_op,
            RollbackStep::RemoveCatalogEntry {
                catalog: self.catalog.path().to_path_buf(),
                destination: path.clone(),
            },
        )?;

        let mut freed = remove_existing_sandbox(&path, self.runner.as_ref())?;
        let _lock = StoreLock::acquire(&self.layout.lock_file())?;
        match self.catalog.delete(&path) {
            Ok(item) => freed.extend(item.port),
            Err(StoreError::EntryNotFound(_)) => {
                debug!("{} had no catalog entry", path.display());
            }
            Err(e) => return Err(e.into()),
        }
        self.wal.commit(&wal_op)?;
        info!("deleted {} (freed ports {freed:?})", path.display());
        Ok(freed)
    }

    /// Remove an unpacked server tree, unless a sandbox still uses it.
    pub fn delete_binaries(&self, version: &str) -> Result<PathBuf, CoreError> {
        let basedir = self.layout.basedir(version);
        if !basedir.is_dir() {
            return Err(CoreError::SandboxNotFound(format!(
                "no binaries at {}",
                basedir.display()
            )));
        }
        let users = self.catalog.find_by_origin(&basedir)?;
        if !users.is_empty() {
            let names: Vec<String> = users
                .iter()
                .map(|u| u.destination.display().to_string())
                .collect();
            return Err(CoreError::ResourceConflict(format!(
                "{} is used by {}",
                basedir.display(),
                names.join(", ")
            )));
        }
        fs::remove_dir_all(&basedir)?;
        info!("removed binaries {}", basedir.display());
        Ok(basedir)
    }

    pub fn list(&self) -> Result<Vec<SandboxItem>, CoreError> {
        Ok(self.catalog.list()?)
    }

    /// Catalog entries whose ports disagree with the on-disk description.
    pub fn divergent_entries(&self) -> Result<Vec<CatalogDivergence>, CoreError> {
        Ok(self.catalog.divergent_entries()?)
    }
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "sandbox".to_owned())
}
