use dbsandbox_schema::{Flavor, SandboxType};
use dbsandbox_store::{
    collect_installed_ports, RollbackStep, SandboxCatalog, SandboxDescription, SandboxItem,
    SandboxLayout, WalOpKind, WriteAheadLog,
};
use std::fs;
use std::path::{Path, PathBuf};

fn layout(root: &Path) -> SandboxLayout {
    let layout = SandboxLayout::new(root.join("sandboxes"), root.join("opt"), root.join("catalog"));
    layout.initialize().unwrap();
    layout
}

fn description(sb_type: SandboxType, ports: Vec<u16>, nodes: u32) -> SandboxDescription {
    SandboxDescription {
        basedir: PathBuf::from("/opt/mysql/8.0.30"),
        sb_type,
        version: "8.0.30".to_owned(),
        flavor: Flavor::MySql,
        port: ports,
        nodes,
        node_num: 0,
        log_file: String::new(),
        timestamp: String::new(),
    }
}

#[test]
fn crashed_topology_is_rolled_back_and_ports_released() {
    let dir = tempfile::tempdir().unwrap();
    let layout = layout(dir.path());
    let wal = WriteAheadLog::new(&layout);
    let catalog = SandboxCatalog::new(layout.catalog_file());

    let topo = layout.sandbox_path("rsandbox_8_0_30");
    let op_id = wal.begin(WalOpKind::DeployTopology, &topo).unwrap();
    wal.add_rollback_step(&op_id, RollbackStep::RemoveDir(topo.clone()))
        .unwrap();

    for (i, name) in ["master", "node1"].iter().enumerate() {
        let mut d = description(SandboxType::ReplicationNode, vec![11031 + i as u16], 0);
        d.node_num = i as u32 + 1;
        d.write(&topo.join(name)).unwrap();
    }
    description(SandboxType::MasterSlave, vec![11031, 11032], 2)
        .write(&topo)
        .unwrap();

    wal.add_rollback_step(
        &op_id,
        RollbackStep::RemoveCatalogEntry {
            catalog: layout.catalog_file(),
            destination: topo.clone(),
        },
    )
    .unwrap();
    catalog
        .update(SandboxItem {
            origin: PathBuf::from("/opt/mysql/8.0.30"),
            sb_type: SandboxType::MasterSlave,
            version: "8.0.30".to_owned(),
            flavor: Flavor::MySql,
            port: vec![11031, 11032],
            nodes: vec!["master".to_owned(), "node1".to_owned()],
            destination: topo.clone(),
            log_directory: None,
        })
        .unwrap();

    assert_eq!(
        collect_installed_ports(layout.sandbox_home()).unwrap().len(),
        2
    );

    // No commit: a fresh process recovers.
    let recovered = WriteAheadLog::new(&layout).recover().unwrap();
    assert_eq!(recovered, 1);
    assert!(!topo.exists());
    assert!(catalog.list().unwrap().is_empty());
    assert!(collect_installed_ports(layout.sandbox_home())
        .unwrap()
        .is_empty());
}

#[test]
fn committed_deployment_survives_recovery() {
    let dir = tempfile::tempdir().unwrap();
    let layout = layout(dir.path());
    let wal = WriteAheadLog::new(&layout);

    let single = layout.sandbox_path("msb_8_0_30");
    let op_id = wal.begin(WalOpKind::DeploySingle, &single).unwrap();
    wal.add_rollback_step(&op_id, RollbackStep::RemoveDir(single.clone()))
        .unwrap();
    fs::create_dir_all(single.join("data")).unwrap();
    description(SandboxType::Single, vec![8030], 0)
        .write(&single)
        .unwrap();
    wal.commit(&op_id).unwrap();

    assert_eq!(wal.recover().unwrap(), 0);
    assert!(single.join("data").is_dir());
}
