use super::{common_scripts, numbered_shortcuts, pool_size, PlanContext, ScriptSpec, TopologyPlan};
use crate::ports::PortAllocator;
use crate::CoreError;
use dbsandbox_schema::{features, SandboxType, ServerUuid, TopologyKind};
use std::path::PathBuf;

pub(super) fn plan(
    ctx: &PlanContext<'_>,
    alloc: &mut PortAllocator,
    path: PathBuf,
    nodes: u32,
    single_primary: bool,
) -> Result<TopologyPlan, CoreError> {
    ctx.require(features::GROUP_REPLICATION, "group replication")?;

    let offset = if single_primary {
        ctx.defaults.group_replication_sp_base_port
    } else {
        ctx.defaults.group_replication_base_port
    };
    let ports = ctx.data_pool(alloc, offset, nodes)?;
    let first = ports.first().copied().unwrap_or_default();
    let group_ports = alloc.pool(
        "group replication",
        u32::from(first) + u32::from(ctx.defaults.group_port_delta),
        pool_size(nodes)?,
    )?;

    let seeds = group_ports
        .iter()
        .map(|p| format!("127.0.0.1:{p}"))
        .collect::<Vec<_>>()
        .join(",");
    let group_name = ServerUuid::deterministic(first, 0);
    let (single_primary_mode, update_everywhere) = if single_primary {
        ("ON", "OFF")
    } else {
        ("OFF", "ON")
    };

    let mut defs = Vec::with_capacity(ports.len());
    for ((i, port), group_port) in (1u32..).zip(ports.iter().copied()).zip(group_ports.iter().copied()) {
        let name = format!("{}{i}", ctx.defaults.node_prefix);
        let mut def = ctx.node_definition(&path, &name, i, port, SandboxType::GroupNode);
        def.extra_ports = vec![group_port];
        def.repl_options = ctx.replication_options(port);
        def.gtid_options = ctx.gtid_options();
        def.repl_crash_safe_options = ctx.crash_safe_options();
        def.my_cnf_options.extend([
            "binlog_checksum=NONE".to_owned(),
            "plugin-load-add=group_replication.so".to_owned(),
            "group_replication=FORCE_PLUS_PERMANENT".to_owned(),
            "group_replication_start_on_boot=OFF".to_owned(),
            "group_replication_bootstrap_group=OFF".to_owned(),
            "transaction_write_set_extraction=XXHASH64".to_owned(),
            format!("group_replication_group_name=\"{group_name}\""),
            format!("group_replication_local_address=\"127.0.0.1:{group_port}\""),
            format!("group_replication_group_seeds=\"{seeds}\""),
            format!("group_replication_single_primary_mode={single_primary_mode}"),
            format!("group_replication_enforce_update_everywhere_checks={update_everywhere}"),
        ]);
        defs.push(def);
    }
    ctx.assign_service_ports(alloc, &mut defs)?;

    let data = ctx.topology_data(&path, &defs, 1);
    let mut scripts = common_scripts();
    scripts.push(ScriptSpec::exec("group_initialize_nodes", "initialize_nodes"));
    scripts.push(ScriptSpec::exec("group_check_nodes", "check_nodes"));
    let shortcuts = numbered_shortcuts(&defs);

    Ok(TopologyPlan {
        kind: TopologyKind::Group,
        sb_type: SandboxType::GroupReplication,
        path,
        nodes: defs,
        extra_members: Vec::new(),
        aux_dirs: Vec::new(),
        topology_ports: Vec::new(),
        data,
        scripts,
        shortcuts,
        initializer: Some("initialize_nodes"),
        bootstrap: None,
    })
}

#[cfg(test)]
mod tests {
    use crate::topology::{plan, PlanContext, TopologyPlan};
    use crate::CoreError;
    use dbsandbox_schema::{
        CapabilityMatrix, Defaults, Flavor, SandboxDefinition, Topology, TopologyKind,
        TopologyRequest,
    };
    use std::collections::BTreeSet;
    use std::path::Path;

    fn group_plan(version: &str, single_primary: bool) -> Result<TopologyPlan, CoreError> {
        let defaults = Defaults::factory_in(Path::new("/home/sb"));
        let caps = CapabilityMatrix::builtin();
        let base = SandboxDefinition::new(version, Flavor::MySql, &defaults);
        let ctx = PlanContext::new(&defaults, &caps, &base)?;
        let mut req = TopologyRequest::new(TopologyKind::Group, 3);
        req.single_primary = single_primary;
        plan(&ctx, &Topology::from_request(&req)?, BTreeSet::new())
    }

    #[test]
    fn group_ports_sit_above_data_ports() {
        let plan = group_plan("8.0.30", false).unwrap();
        assert_eq!(plan.node_names(), vec!["node1", "node2", "node3"]);
        for node in &plan.nodes {
            assert_eq!(node.extra_ports.len(), 1);
            assert_eq!(node.extra_ports[0], plan.nodes[0].port + 125 + (node.port - plan.nodes[0].port));
        }
        let seeds = plan.nodes[0]
            .my_cnf_options
            .iter()
            .find(|o| o.starts_with("group_replication_group_seeds"))
            .unwrap();
        for node in &plan.nodes {
            assert!(seeds.contains(&node.extra_ports[0].to_string()));
        }
    }

    #[test]
    fn single_primary_uses_its_own_base_and_mode() {
        let multi = group_plan("8.0.30", false).unwrap();
        let single = group_plan("8.0.30", true).unwrap();
        assert_eq!(single.nodes[0].port - multi.nodes[0].port, 1000);
        assert!(single.nodes[0]
            .my_cnf_options
            .contains(&"group_replication_single_primary_mode=ON".to_owned()));
        assert!(multi.nodes[0]
            .my_cnf_options
            .contains(&"group_replication_enforce_update_everywhere_checks=ON".to_owned()));
        assert!(single.path.ends_with("group_sp_msb_8_0_30"));
    }

    #[test]
    fn group_replication_needs_5_7_17() {
        assert!(matches!(
            group_plan("5.7.16", false),
            Err(CoreError::Prerequisite(_))
        ));
        assert!(group_plan("5.7.17", false).is_ok());
    }
}
