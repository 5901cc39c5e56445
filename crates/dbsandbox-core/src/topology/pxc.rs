use super::{common_scripts, numbered_shortcuts, pool_size, PlanContext, ScriptSpec, TopologyPlan};
use crate::ports::PortAllocator;
use crate::CoreError;
use dbsandbox_schema::{features, SandboxType, TopologyKind};
use std::path::PathBuf;

/// Percona XtraDB Cluster. Each node owns a data port, a group
/// communication port, an IST port and an SST receive port. Node 1
/// bootstraps the cluster and must be fully up before the others start.
pub(super) fn plan(
    ctx: &PlanContext<'_>,
    alloc: &mut PortAllocator,
    path: PathBuf,
    nodes: u32,
) -> Result<TopologyPlan, CoreError> {
    ctx.require(features::XTRADB_CLUSTER, "XtraDB cluster")?;

    let ports = ctx.data_pool(alloc, ctx.defaults.pxc_base_port, nodes)?;
    let first = u32::from(ports.first().copied().unwrap_or_default());
    let delta = u32::from(ctx.defaults.group_port_delta);
    let count = pool_size(nodes)?;
    let double = pool_size(nodes.saturating_mul(2))?;
    let group_ist = alloc.pool("wsrep group", first + delta, double)?;
    let rsync = alloc.pool("wsrep sst", first + 2 * delta, count)?;

    let cluster_address = (0..ports.len())
        .map(|i| format!("127.0.0.1:{}", group_ist[2 * i]))
        .collect::<Vec<_>>()
        .join(",");
    let sst_method = if ctx.has(features::XTRABACKUP_SST) {
        "xtrabackup-v2"
    } else {
        "rsync"
    };
    let provider = ctx.base.resolved_basedir().join("lib").join("libgalera_smm.so");
    let cluster_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "pxc".to_owned());

    let mut defs = Vec::with_capacity(ports.len());
    for (idx, (i, port)) in (1u32..).zip(ports.iter().copied()).enumerate() {
        let (group_port, ist_port, sst_port) = (group_ist[2 * idx], group_ist[2 * idx + 1], rsync[idx]);
        let name = format!("{}{i}", ctx.defaults.node_prefix);
        let mut def = ctx.node_definition(&path, &name, i, port, SandboxType::PxcNode);
        def.extra_ports = vec![group_port, ist_port, sst_port];
        def.repl_options = ctx.replication_options(port);
        def.gtid_options = ctx.gtid_options();
        def.my_cnf_options.extend([
            "binlog_format=ROW".to_owned(),
            "innodb_autoinc_lock_mode=2".to_owned(),
            format!("wsrep_provider={}", provider.display()),
            format!("wsrep_cluster_address=gcomm://{cluster_address}"),
            format!("wsrep_cluster_name={cluster_name}"),
            format!("wsrep_node_address=127.0.0.1:{group_port}"),
            format!("wsrep_node_incoming_address=127.0.0.1:{port}"),
            format!(
                "wsrep_provider_options=\"gmcast.listen_addr=tcp://127.0.0.1:{group_port}; ist.recv_addr=127.0.0.1:{ist_port}\""
            ),
            format!("wsrep_sst_receive_address=127.0.0.1:{sst_port}"),
            format!("wsrep_sst_method={sst_method}"),
            format!("wsrep_sst_auth={}:{}", ctx.base.db_user, ctx.base.db_password),
        ]);
        if i == 1 {
            def.start_args = vec!["--wsrep-new-cluster".to_owned()];
            def.load_grants = true;
        } else {
            def.start_args = Vec::new();
            def.load_grants = false;
        }
        defs.push(def);
    }
    ctx.assign_service_ports(alloc, &mut defs)?;

    let bootstrap = defs.first().and_then(|d| d.dir_name.clone());
    let data = ctx.topology_data(&path, &defs, 1);
    let mut scripts = common_scripts();
    scripts.push(ScriptSpec::exec("pxc_check_nodes", "check_nodes"));
    let shortcuts = numbered_shortcuts(&defs);

    Ok(TopologyPlan {
        kind: TopologyKind::Pxc,
        sb_type: SandboxType::Pxc,
        path,
        nodes: defs,
        extra_members: Vec::new(),
        aux_dirs: Vec::new(),
        topology_ports: Vec::new(),
        data,
        scripts,
        shortcuts,
        initializer: None,
        bootstrap,
    })
}
