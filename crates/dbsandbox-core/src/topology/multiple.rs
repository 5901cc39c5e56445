use super::{common_scripts, numbered_shortcuts, PlanContext, TopologyPlan};
use crate::ports::PortAllocator;
use crate::CoreError;
use dbsandbox_schema::{SandboxType, TopologyKind};
use std::path::PathBuf;

/// Independent servers of the same version sharing one directory and one
/// set of control scripts. No replication is configured.
pub(super) fn plan(
    ctx: &PlanContext<'_>,
    alloc: &mut PortAllocator,
    path: PathBuf,
    nodes: u32,
) -> Result<TopologyPlan, CoreError> {
    let ports = ctx.data_pool(alloc, ctx.defaults.multiple_base_port, nodes)?;
    let mut defs: Vec<_> = (1u32..)
        .zip(ports)
        .map(|(i, port)| {
            let name = format!("{}{i}", ctx.defaults.node_prefix);
            ctx.node_definition(&path, &name, i, port, SandboxType::MultipleNode)
        })
        .collect();
    ctx.assign_service_ports(alloc, &mut defs)?;

    let data = ctx.topology_data(&path, &defs, 1);
    let shortcuts = numbered_shortcuts(&defs);
    Ok(TopologyPlan {
        kind: TopologyKind::Multiple,
        sb_type: SandboxType::Multiple,
        path,
        nodes: defs,
        extra_members: Vec::new(),
        aux_dirs: Vec::new(),
        topology_ports: Vec::new(),
        data,
        scripts: common_scripts(),
        shortcuts,
        initializer: None,
        bootstrap: None,
    })
}
