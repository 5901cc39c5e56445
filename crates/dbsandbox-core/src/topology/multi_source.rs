//! Multi-source replication: fan-in (several masters feeding a set of
//! slaves) and all-masters (every node replicates from every other node).

use super::{
    common_scripts, numbered_shortcuts, slave_entry, PlanContext, ScriptSpec, TopologyPlan,
};
use crate::ports::PortAllocator;
use crate::CoreError;
use dbsandbox_schema::{features, ReadOnly, SandboxDefinition, SandboxType, TopologyKind};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

pub(super) fn plan_fan_in(
    ctx: &PlanContext<'_>,
    alloc: &mut PortAllocator,
    path: PathBuf,
    nodes: u32,
    masters: &[u32],
    slaves: &[u32],
    read_only: ReadOnly,
) -> Result<TopologyPlan, CoreError> {
    ctx.require(features::MULTI_SOURCE, "multi-source replication")?;
    let slave_options = ctx.read_only_options(read_only)?;

    let mut defs = multi_source_nodes(
        ctx,
        alloc,
        &path,
        ctx.defaults.fan_in_replication_base_port,
        nodes,
        SandboxType::FanInNode,
    )?;
    for def in defs.iter_mut().filter(|d| slaves.contains(&d.node_num)) {
        def.my_cnf_options.extend(slave_options.iter().cloned());
    }
    ctx.assign_service_ports(alloc, &mut defs)?;

    let master_defs: Vec<&SandboxDefinition> = defs
        .iter()
        .filter(|d| masters.contains(&d.node_num))
        .collect();
    let wiring: Vec<Value> = defs
        .iter()
        .filter(|d| slaves.contains(&d.node_num))
        .map(|s| slave_entry(s, &master_defs))
        .collect();

    Ok(finish(ctx, path, defs, wiring, TopologyKind::FanIn, SandboxType::FanIn))
}

pub(super) fn plan_all_masters(
    ctx: &PlanContext<'_>,
    alloc: &mut PortAllocator,
    path: PathBuf,
    nodes: u32,
) -> Result<TopologyPlan, CoreError> {
    ctx.require(features::MULTI_SOURCE, "multi-source replication")?;

    let mut defs = multi_source_nodes(
        ctx,
        alloc,
        &path,
        ctx.defaults.all_masters_replication_base_port,
        nodes,
        SandboxType::AllMastersNode,
    )?;
    ctx.assign_service_ports(alloc, &mut defs)?;

    let wiring: Vec<Value> = defs
        .iter()
        .map(|s| {
            let others: Vec<&SandboxDefinition> =
                defs.iter().filter(|m| m.node_num != s.node_num).collect();
            slave_entry(s, &others)
        })
        .collect();

    Ok(finish(
        ctx,
        path,
        defs,
        wiring,
        TopologyKind::AllMasters,
        SandboxType::AllMasters,
    ))
}

fn multi_source_nodes(
    ctx: &PlanContext<'_>,
    alloc: &mut PortAllocator,
    path: &Path,
    offset: u16,
    nodes: u32,
    sb_type: SandboxType,
) -> Result<Vec<SandboxDefinition>, CoreError> {
    let gtid = ctx.has(features::GTID);
    let ports = ctx.data_pool(alloc, offset, nodes)?;
    Ok((1u32..)
        .zip(ports)
        .map(|(i, port)| {
            let name = format!("{}{i}", ctx.defaults.node_prefix);
            let mut def = ctx.node_definition(path, &name, i, port, sb_type);
            def.repl_options = ctx.replication_options(port);
            def.repl_crash_safe_options = ctx.crash_safe_options();
            if gtid {
                def.gtid = true;
                def.gtid_options = ctx.gtid_options();
            }
            def
        })
        .collect())
}

fn finish(
    ctx: &PlanContext<'_>,
    path: PathBuf,
    defs: Vec<SandboxDefinition>,
    wiring: Vec<Value>,
    kind: TopologyKind,
    sb_type: SandboxType,
) -> TopologyPlan {
    let mut data = ctx.topology_data(&path, &defs, 1);
    data.insert("Slaves".to_owned(), Value::Array(wiring));
    if ctx.has(features::GTID) {
        data.insert("ChangeMasterExtra".to_owned(), json!("master_auto_position=1"));
    }
    let mut scripts = common_scripts();
    scripts.push(ScriptSpec::exec("ms_initialize_nodes", "initialize_nodes"));
    scripts.push(ScriptSpec::exec("ms_check_nodes", "check_nodes"));
    let shortcuts = numbered_shortcuts(&defs);

    TopologyPlan {
        kind,
        sb_type,
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
    }
}
