use super::{common_scripts, slave_entry, PlanContext, ScriptSpec, TopologyPlan};
use crate::ports::PortAllocator;
use crate::CoreError;
use dbsandbox_schema::{features, ReadOnly, SandboxType, TopologyKind};
use serde_json::{json, Value};
use std::path::PathBuf;

/// One master (`master`) and `nodes - 1` slaves (`node1`..). Master port is
/// the first port of the data pool, slave `i` gets the port after it.
pub(super) fn plan(
    ctx: &PlanContext<'_>,
    alloc: &mut PortAllocator,
    path: PathBuf,
    nodes: u32,
    semisync: bool,
    read_only: ReadOnly,
) -> Result<TopologyPlan, CoreError> {
    if semisync {
        ctx.require(features::SEMISYNC, "semi-synchronous replication")?;
    }
    if ctx.base.gtid {
        ctx.require(features::GTID, "GTID replication")?;
    }
    let slave_options = ctx.read_only_options(read_only)?;

    let ports = ctx.data_pool(alloc, ctx.defaults.master_slave_base_port, nodes)?;
    let mut defs = Vec::with_capacity(ports.len());
    for (i, port) in (1u32..).zip(ports.iter().copied()) {
        let (name, prompt) = if i == 1 {
            (ctx.defaults.master_name.clone(), "master".to_owned())
        } else {
            (
                format!("{}{}", ctx.defaults.node_prefix, i - 1),
                format!("{}{}", ctx.defaults.slave_prefix, i - 1),
            )
        };
        let mut def = ctx.node_definition(&path, &name, i, port, SandboxType::ReplicationNode);
        def.prompt = prompt;
        def.repl_options = ctx.replication_options(port);
        def.repl_crash_safe_options = ctx.crash_safe_options();
        if ctx.base.gtid {
            def.gtid_options = ctx.gtid_options();
        }
        if i > 1 {
            def.my_cnf_options.extend(slave_options.iter().cloned());
        }
        defs.push(def);
    }
    ctx.assign_service_ports(alloc, &mut defs)?;

    let master = &defs[0];
    let slaves: Vec<Value> = defs[1..].iter().map(|s| slave_entry(s, &[master])).collect();
    let mut data = ctx.topology_data(&path, &defs, 1);
    data.insert("MasterName".to_owned(), json!(ctx.defaults.master_name));
    data.insert("MasterPort".to_owned(), json!(master.port));
    data.insert("Slaves".to_owned(), Value::Array(slaves));
    data.insert("Semisync".to_owned(), json!(semisync));
    if ctx.base.gtid {
        data.insert("ChangeMasterExtra".to_owned(), json!("master_auto_position=1"));
    }

    let mut scripts = common_scripts();
    scripts.push(ScriptSpec::exec("initialize_slaves", "initialize_slaves"));
    scripts.push(ScriptSpec::exec("check_slaves", "check_slaves"));

    let mut shortcuts = vec![("m".to_owned(), ctx.defaults.master_name.clone())];
    shortcuts.extend(
        defs[1..]
            .iter()
            .enumerate()
            .map(|(i, s)| (format!("s{}", i + 1), s.dir_name.clone().unwrap_or_default())),
    );

    Ok(TopologyPlan {
        kind: TopologyKind::MasterSlave,
        sb_type: SandboxType::MasterSlave,
        path,
        nodes: defs,
        extra_members: Vec::new(),
        aux_dirs: Vec::new(),
        topology_ports: Vec::new(),
        data,
        scripts,
        shortcuts,
        initializer: Some("initialize_slaves"),
        bootstrap: None,
    })
}

#[cfg(test)]
mod tests {
    use crate::topology::{plan, PlanContext};
    use crate::CoreError;
    use dbsandbox_schema::{
        CapabilityMatrix, Defaults, Flavor, ReadOnly, SandboxDefinition, Topology, TopologyKind,
        TopologyRequest,
    };
    use std::collections::BTreeSet;
    use std::path::Path;

    fn request(nodes: u32) -> TopologyRequest {
        TopologyRequest::new(TopologyKind::MasterSlave, nodes)
    }

    #[test]
    fn master_and_slaves_get_consecutive_ports() {
        let defaults = Defaults::factory_in(Path::new("/home/sb"));
        let caps = CapabilityMatrix::builtin();
        let base = SandboxDefinition::new("8.0.30", Flavor::MySql, &defaults);
        let ctx = PlanContext::new(&defaults, &caps, &base).unwrap();
        let topology = Topology::from_request(&request(3)).unwrap();
        let plan = plan(&ctx, &topology, BTreeSet::new()).unwrap();

        // 8030 + 11000 + 30 * 100
        let base_port: u32 = 22_030;
        assert_eq!(plan.node_names(), vec!["master", "node1", "node2"]);
        assert_eq!(u32::from(plan.nodes[0].port), base_port + 1);
        for (i, node) in (1u32..).zip(plan.nodes.iter().skip(1)) {
            assert_eq!(u32::from(node.port), base_port + i + 1);
        }
        assert_eq!(plan.data["MasterPort"], plan.nodes[0].port);
        assert_eq!(plan.data["Slaves"].as_array().unwrap().len(), 2);
        assert_eq!(plan.initializer, Some("initialize_slaves"));
    }

    #[test]
    fn read_only_applies_to_slaves_only() {
        let defaults = Defaults::factory_in(Path::new("/home/sb"));
        let caps = CapabilityMatrix::builtin();
        let base = SandboxDefinition::new("8.0.30", Flavor::MySql, &defaults);
        let ctx = PlanContext::new(&defaults, &caps, &base).unwrap();
        let mut req = request(2);
        req.read_only = ReadOnly::SuperReadOnly;
        let plan = plan(&ctx, &Topology::from_request(&req).unwrap(), BTreeSet::new()).unwrap();
        assert!(plan.nodes[0].my_cnf_options.is_empty());
        assert!(plan.nodes[1]
            .my_cnf_options
            .contains(&"super_read_only=ON".to_owned()));
    }

    #[test]
    fn semisync_and_gtid_need_capable_servers() {
        let defaults = Defaults::factory_in(Path::new("/home/sb"));
        let caps = CapabilityMatrix::builtin();
        let mut base = SandboxDefinition::new("5.5.62", Flavor::MySql, &defaults);
        base.gtid = true;
        let ctx = PlanContext::new(&defaults, &caps, &base).unwrap();
        assert!(matches!(
            plan(&ctx, &Topology::from_request(&request(2)).unwrap(), BTreeSet::new()),
            Err(CoreError::Prerequisite(_))
        ));

        let base = SandboxDefinition::new("5.1.73", Flavor::MySql, &defaults);
        let ctx = PlanContext::new(&defaults, &caps, &base).unwrap();
        let mut req = request(2);
        req.semisync = true;
        assert!(matches!(
            plan(&ctx, &Topology::from_request(&req).unwrap(), BTreeSet::new()),
            Err(CoreError::Prerequisite(_))
        ));
    }
}
