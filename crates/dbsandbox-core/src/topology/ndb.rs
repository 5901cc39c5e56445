use super::{common_scripts, numbered_shortcuts, PlanContext, ScriptSpec, TopologyPlan};
use crate::ports::{topology_base_port, PortAllocator};
use crate::CoreError;
use dbsandbox_schema::{features, SandboxType, TopologyKind};
use serde_json::{json, Value};
use std::path::PathBuf;

/// Node id of the management node in `config.ini`.
const MGMT_NODE_ID: u32 = 1;

/// MySQL Cluster: one management node, `ndb_nodes` data nodes and
/// `sql_nodes` mysqld nodes. SQL nodes are started by `initialize_nodes`
/// once the data nodes are up, never by the scheduler.
pub(super) fn plan(
    ctx: &PlanContext<'_>,
    alloc: &mut PortAllocator,
    path: PathBuf,
    sql_nodes: u32,
    ndb_nodes: u32,
) -> Result<TopologyPlan, CoreError> {
    ctx.require(features::NDB_CLUSTER, "NDB cluster")?;

    let ports = ctx.data_pool(alloc, ctx.defaults.ndb_base_port, sql_nodes)?;
    let cluster_base = topology_base_port(ctx.single_port()?, ctx.defaults.ndb_cluster_port, ctx.version)?;
    let cluster_port = alloc
        .pool("ndb cluster", u32::from(cluster_base), 1)?
        .first()
        .copied()
        .unwrap_or(cluster_base);

    let mut defs = Vec::with_capacity(ports.len());
    for (i, port) in (1u32..).zip(ports) {
        let name = format!("{}{i}", ctx.defaults.node_prefix);
        let mut def = ctx.node_definition(&path, &name, i, port, SandboxType::NdbNode);
        def.skip_start = true;
        def.my_cnf_options.extend([
            "ndbcluster".to_owned(),
            format!("ndb-connectstring=127.0.0.1:{cluster_port}"),
        ]);
        defs.push(def);
    }
    ctx.assign_service_ports(alloc, &mut defs)?;

    let data_members: Vec<String> = (1..=ndb_nodes)
        .map(|i| format!("{}{i}", ctx.defaults.ndb_node_prefix))
        .collect();
    let ndb_entries: Vec<Value> = (MGMT_NODE_ID + 1..)
        .zip(&data_members)
        .map(|(id, name)| json!({ "NodeName": name, "NodeId": id }))
        .collect();
    let replicas = if ndb_nodes % 2 == 0 { 2 } else { 1 };

    let mut data = ctx.topology_data(&path, &defs, MGMT_NODE_ID + ndb_nodes + 1);
    data.insert("NdbNodes".to_owned(), Value::Array(ndb_entries));
    data.insert("ClusterPort".to_owned(), json!(cluster_port));
    data.insert("Replicas".to_owned(), json!(replicas));

    let mut scripts = common_scripts();
    scripts.extend([
        ScriptSpec {
            template: "ndb_config",
            file: "ndb/config.ini".to_owned(),
            executable: false,
        },
        ScriptSpec::exec("ndb_initialize_nodes", "initialize_nodes"),
        ScriptSpec::exec("ndb_check_nodes", "check_nodes"),
        ScriptSpec::exec("ndb_stop_cluster", "stop_cluster"),
    ]);
    let shortcuts = numbered_shortcuts(&defs);

    Ok(TopologyPlan {
        kind: TopologyKind::Ndb,
        sb_type: SandboxType::Ndb,
        path,
        nodes: defs,
        extra_members: data_members,
        aux_dirs: vec!["ndb".to_owned()],
        topology_ports: vec![cluster_port],
        data,
        scripts,
        shortcuts,
        initializer: Some("initialize_nodes"),
        bootstrap: None,
    })
}
