//! End-to-end topology deployments against a fake server tree.
//!
//! Every command goes through the `MockRunner`, so the scripts are written
//! and "run" but no server process is ever spawned.

use dbsandbox_core::{CoreError, Deployer};
use dbsandbox_runtime::MockRunner;
use dbsandbox_schema::{Defaults, Flavor, SandboxType, TopologyKind, TopologyRequest};
use dbsandbox_store::{SandboxDescription, WriteAheadLog};
use std::fs;
use std::path::Path;
use std::sync::Arc;

struct Env {
    _dir: tempfile::TempDir,
    deployer: Deployer,
    mock: Arc<MockRunner>,
}

fn fake_basedir(defaults: &Defaults, version: &str) {
    let base = defaults.sandbox_binary.join(version);
    for file in [
        "bin/mysqld",
        "bin/mysql",
        "bin/ndb_mgmd",
        "bin/ndbd",
        "scripts/mysql_install_db",
    ] {
        let path = base.join(file);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "").unwrap();
    }
}

fn env(versions: &[&str]) -> Env {
    let dir = tempfile::tempdir().unwrap();
    let defaults = Defaults::factory_in(dir.path());
    for version in versions {
        fake_basedir(&defaults, version);
    }
    let mock = Arc::new(MockRunner::new());
    let deployer = Deployer::new(defaults, mock.clone()).unwrap();
    Env {
        _dir: dir,
        deployer,
        mock,
    }
}

fn position(names: &[String], path_part: &str, calls: &[String]) -> usize {
    calls
        .iter()
        .position(|c| c.contains(path_part))
        .unwrap_or_else(|| panic!("{path_part} never ran; scripts: {names:?}"))
}

#[test]
fn master_slave_three_nodes() {
    let e = env(&["8.0.30"]);
    let base = e.deployer.definition("8.0.30", Flavor::MySql);
    let req = TopologyRequest::new(TopologyKind::MasterSlave, 3);
    let report = e.deployer.deploy_topology(&base, &req).unwrap();

    assert_eq!(report.sb_type, SandboxType::MasterSlave);
    assert!(report.sandbox_dir.ends_with("rsandbox_8_0_30"));
    for node in ["master", "node1", "node2"] {
        assert!(report.sandbox_dir.join(node).join("start").is_file(), "{node}");
    }
    // 8030 + 11000 + 30 * 100
    let base_port = 22_030;
    let ports: Vec<u16> = report.nodes.iter().map(|n| n.port).collect();
    assert_eq!(ports, vec![base_port + 1, base_port + 2, base_port + 3]);

    let names = e.mock.script_names();
    assert_eq!(names.last().map(String::as_str), Some("initialize_slaves"));
    assert_eq!(names.iter().filter(|n| *n == "start").count(), 3);

    let desc = SandboxDescription::read(&report.sandbox_dir).unwrap();
    assert_eq!(desc.nodes, 3);
    assert_eq!(desc.port, report.ports);

    let item = e.deployer.catalog().get(&report.sandbox_dir).unwrap().unwrap();
    assert_eq!(item.nodes, vec!["master", "node1", "node2"]);
    assert!(e.deployer.divergent_entries().unwrap().is_empty());
}

#[test]
fn group_bootstraps_first_node_before_others_join() {
    let e = env(&["8.0.30"]);
    let base = e.deployer.definition("8.0.30", Flavor::MySql);
    let req = TopologyRequest::new(TopologyKind::Group, 3);
    let report = e.deployer.deploy_topology(&base, &req).unwrap();

    let script = fs::read_to_string(report.sandbox_dir.join("initialize_nodes")).unwrap();
    let bootstrap = script.find("group_replication_bootstrap_group=ON").unwrap();
    for node in ["node2", "node3"] {
        let join = script
            .find(&format!("{node}/use\" -u root -e \"START GROUP_REPLICATION\""))
            .unwrap();
        assert!(bootstrap < join, "{node} joins before the group is bootstrapped");
    }
    assert!(script[..bootstrap].contains("node1"));
}

#[test]
fn fan_in_default_lists() {
    let e = env(&["8.0.30"]);
    let base = e.deployer.definition("8.0.30", Flavor::MySql);
    let req = TopologyRequest::new(TopologyKind::FanIn, 5);
    let report = e.deployer.deploy_topology(&base, &req).unwrap();

    let script = fs::read_to_string(report.sandbox_dir.join("initialize_nodes")).unwrap();
    for master in ["node1", "node2", "node3", "node4"] {
        assert!(script.contains(&format!("FOR CHANNEL '{master}'")), "{master}");
    }
    assert!(!script.contains("FOR CHANNEL 'node5'"));
    assert!(script.contains("node5/use"));
    assert!(!script.contains("node1/use"));
}

#[test]
fn pxc_first_node_bootstraps() {
    let e = env(&["8.0.30"]);
    let base = e.deployer.definition("8.0.30", Flavor::Pxc);
    let req = TopologyRequest::new(TopologyKind::Pxc, 3);
    let report = e.deployer.deploy_topology(&base, &req).unwrap();

    assert_eq!(report.nodes[0].start_args, vec!["--wsrep-new-cluster"]);
    assert!(report.nodes[0].load_grants);
    for node in &report.nodes[1..] {
        assert!(node.start_args.is_empty());
        assert!(!node.load_grants);
    }
    let calls: Vec<String> = e.mock.calls().iter().map(ToString::to_string).collect();
    let grants = calls.iter().filter(|c| c.ends_with("load_grants")).count();
    assert_eq!(grants, 1);
}

#[test]
fn pxc_concurrent_waves_hold_joiners_back() {
    let e = env(&["8.0.30"]);
    let mut base = e.deployer.definition("8.0.30", Flavor::Pxc);
    base.run_concurrently = true;
    let req = TopologyRequest::new(TopologyKind::Pxc, 3);
    let report = e.deployer.deploy_topology(&base, &req).unwrap();

    // init, node1 start, node1 grants, joiners
    assert_eq!(report.waves, 4);
    let names = e.mock.script_names();
    let calls: Vec<String> = e.mock.calls().iter().map(ToString::to_string).collect();
    let grants = position(&names, "node1/load_grants", &calls);
    for joiner in ["node2/start", "node3/start"] {
        assert!(grants < position(&names, joiner, &calls), "{joiner}");
    }
}

#[test]
fn ndb_cluster_layout() {
    let e = env(&["8.0.30"]);
    let base = e.deployer.definition("8.0.30", Flavor::Ndb);
    let req = TopologyRequest::new(TopologyKind::Ndb, 2);
    let report = e.deployer.deploy_topology(&base, &req).unwrap();

    for member in ["node1", "node2", "ndbnode1", "ndbnode2", "ndbnode3"] {
        assert!(report.sandbox_dir.join(member).is_dir(), "{member}");
    }
    assert!(report.sandbox_dir.join("ndb").join("config.ini").is_file());
    // SQL nodes are started by initialize_nodes, not by the scheduler
    let names = e.mock.script_names();
    assert!(!names.contains(&"start".to_owned()));
    assert_eq!(names.last().map(String::as_str), Some("initialize_nodes"));

    let desc = SandboxDescription::read(&report.sandbox_dir).unwrap();
    assert_eq!(desc.nodes, 5);
    assert_eq!(desc.sb_type, SandboxType::Ndb);
}

#[test]
fn every_topology_uses_distinct_ports_side_by_side() {
    let e = env(&["8.0.30"]);
    let base = e.deployer.definition("8.0.30", Flavor::MySql);
    let mut seen = std::collections::BTreeSet::new();
    for (kind, nodes) in [
        (TopologyKind::MasterSlave, 2),
        (TopologyKind::Group, 3),
        (TopologyKind::AllMasters, 3),
        (TopologyKind::Multiple, 2),
    ] {
        let report = e
            .deployer
            .deploy_topology(&base, &TopologyRequest::new(kind, nodes))
            .unwrap();
        for port in report.ports {
            assert!(seen.insert(port), "{kind}: port {port} reused");
        }
    }
    assert_eq!(e.deployer.list().unwrap().len(), 4);
}

#[test]
fn failing_node_rolls_back_the_whole_topology() {
    let e = env(&["8.0.30"]);
    e.mock.fail_on("node2/start").unwrap();
    let base = e.deployer.definition("8.0.30", Flavor::MySql);
    let req = TopologyRequest::new(TopologyKind::Group, 3);
    let err = e.deployer.deploy_topology(&base, &req).unwrap_err();
    assert!(matches!(err, CoreError::Runtime(_)));

    let path = e
        .deployer
        .layout()
        .sandbox_path("group_msb_8_0_30");
    assert!(!path.exists());
    assert!(e.deployer.list().unwrap().is_empty());
    let wal = WriteAheadLog::new(e.deployer.layout());
    assert!(wal.list_incomplete().unwrap().is_empty());
}

#[test]
fn existing_topology_needs_force() {
    let e = env(&["8.0.30"]);
    let mut base = e.deployer.definition("8.0.30", Flavor::MySql);
    let req = TopologyRequest::new(TopologyKind::MasterSlave, 2);
    let first = e.deployer.deploy_topology(&base, &req).unwrap();

    let err = e.deployer.deploy_topology(&base, &req).unwrap_err();
    assert!(matches!(err, CoreError::ResourceConflict(_)));
    assert!(first.sandbox_dir.join("master").is_dir());

    base.force = true;
    let second = e.deployer.deploy_topology(&base, &req).unwrap();
    assert_eq!(first.ports, second.ports);
    assert_eq!(e.deployer.list().unwrap().len(), 1);
}

#[test]
fn invalid_requests_touch_nothing() {
    let e = env(&["8.0.30"]);
    let base = e.deployer.definition("8.0.30", Flavor::MySql);

    let err = e
        .deployer
        .deploy_topology(&base, &TopologyRequest::new(TopologyKind::Group, 2))
        .unwrap_err();
    assert!(matches!(err, CoreError::Schema(_)));

    let err = e
        .deployer
        .deploy_topology(&base, &TopologyRequest::new(TopologyKind::Pxc, 3))
        .unwrap_err();
    assert!(matches!(err, CoreError::Prerequisite(_)));

    let home = e.deployer.layout().sandbox_home();
    assert_eq!(fs::read_dir(home).map(|d| d.count()).unwrap_or(0), 0);
    assert!(e.mock.calls().is_empty());
}

#[test]
fn missing_basedir_is_a_prerequisite_error() {
    let e = env(&[]);
    let base = e.deployer.definition("8.0.30", Flavor::MySql);
    let err = e
        .deployer
        .deploy_topology(&base, &TopologyRequest::new(TopologyKind::Multiple, 2))
        .unwrap_err();
    assert!(matches!(err, CoreError::Prerequisite(_)));
    assert!(!Path::new(&e.deployer.layout().sandbox_path("multi_msb_8_0_30")).exists());
}
