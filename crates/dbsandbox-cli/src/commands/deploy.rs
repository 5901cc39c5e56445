use super::{describe, json_pretty, spin_fail, spin_ok, spinner, EXIT_SUCCESS};
use dbsandbox_core::{CoreError, DeploymentReport, Deployer};
use dbsandbox_schema::{Flavor, ReadOnly, SandboxDefinition, TopologyKind, TopologyRequest};
use std::path::PathBuf;
use tracing::debug;

/// Flags shared by every deploy subcommand.
#[derive(Debug, Clone)]
pub struct DeployOptions {
    pub version: String,
    pub flavor: Flavor,
    pub basedir: Option<PathBuf>,
    pub name: Option<String>,
    pub force: bool,
    pub skip_start: bool,
    pub load_grants: bool,
    pub gtid: bool,
    pub keep_uuid: bool,
    pub disable_mysqlx: bool,
    pub enable_admin_address: bool,
    pub native_auth_plugin: bool,
    pub concurrent: bool,
    pub my_cnf_options: Vec<String>,
    pub init_options: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TopologyOptions {
    pub kind: TopologyKind,
    pub nodes: u32,
    pub ndb_nodes: Option<u32>,
    pub single_primary: bool,
    pub semisync: bool,
    pub master_list: Option<String>,
    pub slave_list: Option<String>,
    pub read_only: bool,
    pub super_read_only: bool,
}

impl TopologyOptions {
    fn request(self) -> TopologyRequest {
        let read_only = if self.super_read_only {
            ReadOnly::SuperReadOnly
        } else if self.read_only {
            ReadOnly::ReadOnly
        } else {
            ReadOnly::Off
        };
        TopologyRequest {
            kind: self.kind,
            nodes: self.nodes,
            single_primary: self.single_primary,
            semisync: self.semisync,
            master_list: self.master_list,
            slave_list: self.slave_list,
            ndb_nodes: self.ndb_nodes,
            read_only,
        }
    }
}

fn definition(deployer: &Deployer, opts: DeployOptions) -> SandboxDefinition {
    let mut def = deployer.definition(&opts.version, opts.flavor);
    if let Some(basedir) = opts.basedir {
        def.basedir = basedir;
    }
    def.dir_name = opts.name;
    def.force = opts.force;
    def.skip_start = opts.skip_start;
    def.load_grants = opts.load_grants;
    def.gtid = opts.gtid;
    def.keep_uuid = opts.keep_uuid;
    def.disable_mysqlx = opts.disable_mysqlx;
    def.enable_admin_address = opts.enable_admin_address;
    def.native_auth_plugin = opts.native_auth_plugin;
    def.run_concurrently = opts.concurrent;
    def.my_cnf_options = opts.my_cnf_options;
    def.init_options = opts.init_options;
    def
}

fn finish(
    what: &str,
    deploy: impl FnOnce() -> Result<DeploymentReport, CoreError>,
    json: bool,
) -> Result<u8, String> {
    let pb = if json {
        None
    } else {
        Some(spinner(&format!("deploying {what}...")))
    };
    let report = match deploy() {
        Ok(r) => {
            if let Some(ref pb) = pb {
                spin_ok(pb, &format!("{what} deployed"));
            }
            r
        }
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, &format!("{what} failed"));
            }
            return Err(describe(&e));
        }
    };

    if json {
        println!("{}", json_pretty(&report)?);
    } else {
        println!(
            "{} {} {} in {}",
            report.sb_type,
            report.flavor,
            report.version,
            report.sandbox_dir.display()
        );
        for node in &report.nodes {
            println!("  {:<10} port {:<6} server-id {}", node.name, node.port, node.server_id);
        }
        if report.commands > 0 {
            println!("{} commands in {} waves", report.commands, report.waves);
        }
    }
    Ok(EXIT_SUCCESS)
}

pub fn single(
    deployer: &Deployer,
    opts: DeployOptions,
    port: Option<u16>,
    json: bool,
) -> Result<u8, String> {
    let mut def = definition(deployer, opts);
    def.port = port.unwrap_or(0);
    debug!("single deploy of {} {}", def.flavor, def.version);
    finish("sandbox", || deployer.deploy_single(&def), json)
}

pub fn topology(
    deployer: &Deployer,
    opts: DeployOptions,
    topology: TopologyOptions,
    json: bool,
) -> Result<u8, String> {
    let def = definition(deployer, opts);
    let request = topology.request();
    debug!(
        "{} deploy of {} nodes for {} {}",
        request.kind, request.nodes, def.flavor, def.version
    );
    let what = request.kind.as_str().to_owned();
    finish(&what, || deployer.deploy_topology(&def, &request), json)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(super_read_only: bool, read_only: bool) -> TopologyOptions {
        TopologyOptions {
            kind: TopologyKind::FanIn,
            nodes: 4,
            ndb_nodes: None,
            single_primary: false,
            semisync: false,
            master_list: Some("1,2".to_owned()),
            slave_list: Some("3,4".to_owned()),
            read_only,
            super_read_only,
        }
    }

    #[test]
    fn request_carries_lists() {
        let req = options(false, false).request();
        assert_eq!(req.kind, TopologyKind::FanIn);
        assert_eq!(req.master_list.as_deref(), Some("1,2"));
        assert_eq!(req.slave_list.as_deref(), Some("3,4"));
        assert_eq!(req.read_only, ReadOnly::Off);
    }

    #[test]
    fn super_read_only_wins() {
        assert_eq!(options(true, true).request().read_only, ReadOnly::SuperReadOnly);
        assert_eq!(options(false, true).request().read_only, ReadOnly::ReadOnly);
    }
}
