use dbsandbox_core::{CoreError, Deployer, ErrorKind};
use dbsandbox_runtime::MockRunner;
use dbsandbox_schema::{Defaults, Flavor, SandboxType};
use dbsandbox_store::{RollbackStep, SandboxDescription, SandboxLayout, WalOpKind, WriteAheadLog};
use std::fs;
use std::path::Path;
use std::sync::Arc;

fn fake_basedir(defaults: &Defaults, version: &str) {
    let base = defaults.sandbox_binary.join(version);
    for file in ["bin/mysqld", "bin/mysql", "scripts/mysql_install_db"] {
        let path = base.join(file);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "").unwrap();
    }
}

fn setup(home: &Path, versions: &[&str]) -> (Deployer, Arc<MockRunner>) {
    let defaults = Defaults::factory_in(home);
    for version in versions {
        fake_basedir(&defaults, version);
    }
    let mock = Arc::new(MockRunner::new());
    (Deployer::new(defaults, mock.clone()).unwrap(), mock)
}

#[test]
fn single_sandbox_uses_version_port() {
    let dir = tempfile::tempdir().unwrap();
    let (deployer, mock) = setup(dir.path(), &["8.0.30"]);
    let def = deployer.definition("8.0.30", Flavor::MySql);
    let report = deployer.deploy_single(&def).unwrap();

    assert!(report.sandbox_dir.ends_with("msb_8_0_30"));
    assert_eq!(report.nodes[0].port, 8030);
    assert_eq!(report.sb_type, SandboxType::Single);
    // mysqlx is on by default in 8.0.30
    assert_eq!(report.ports, vec![8030, 18_030]);
    assert_eq!(mock.script_names(), vec!["init_db", "start", "load_grants"]);

    let item = deployer.catalog().get(&report.sandbox_dir).unwrap().unwrap();
    assert_eq!(item.port, report.ports);
    assert_eq!(item.origin, deployer.layout().basedir("8.0.30"));
}

#[test]
fn second_sandbox_skips_used_ports() {
    let dir = tempfile::tempdir().unwrap();
    let (deployer, _mock) = setup(dir.path(), &["8.0.30"]);
    deployer
        .deploy_single(&deployer.definition("8.0.30", Flavor::MySql))
        .unwrap();

    let mut def = deployer.definition("8.0.30", Flavor::MySql);
    def.dir_name = Some("second".to_owned());
    let report = deployer.deploy_single(&def).unwrap();
    assert_eq!(report.nodes[0].port, 8031);
    assert!(deployer.installed_ports().unwrap().contains(&8031));
}

#[test]
fn explicit_port_in_use_is_a_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let (deployer, mock) = setup(dir.path(), &["8.0.30"]);
    let mut def = deployer.definition("8.0.30", Flavor::MySql);
    def.port = 3306;
    let err = deployer.deploy_single(&def).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceConflict);
    assert!(mock.calls().is_empty());
    assert!(!deployer.layout().sandbox_path("msb_8_0_30").exists());
}

#[test]
fn existing_directory_needs_force() {
    let dir = tempfile::tempdir().unwrap();
    let (deployer, mock) = setup(dir.path(), &["8.0.30"]);
    let mut def = deployer.definition("8.0.30", Flavor::MySql);
    let first = deployer.deploy_single(&def).unwrap();

    let err = deployer.deploy_single(&def).unwrap_err();
    assert!(matches!(err, CoreError::ResourceConflict(_)));
    assert!(first.sandbox_dir.join("start").is_file());

    def.force = true;
    let second = deployer.deploy_single(&def).unwrap();
    assert_eq!(second.ports, first.ports);
    assert!(mock.script_names().contains(&"stop".to_owned()));
    assert_eq!(deployer.list().unwrap().len(), 1);
}

#[test]
fn failed_start_leaves_nothing_behind() {
    let dir = tempfile::tempdir().unwrap();
    let (deployer, mock) = setup(dir.path(), &["8.0.30"]);
    mock.fail_on("msb_8_0_30/start").unwrap();
    let err = deployer
        .deploy_single(&deployer.definition("8.0.30", Flavor::MySql))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ChildProcess);
    assert!(!deployer.layout().sandbox_path("msb_8_0_30").exists());
    assert!(deployer.list().unwrap().is_empty());
}

#[test]
fn delete_sandbox_frees_ports_and_catalog_entry() {
    let dir = tempfile::tempdir().unwrap();
    let (deployer, mock) = setup(dir.path(), &["8.0.30"]);
    let report = deployer
        .deploy_single(&deployer.definition("8.0.30", Flavor::MySql))
        .unwrap();

    let freed = deployer.delete_sandbox("msb_8_0_30").unwrap();
    assert!(freed.contains(&8030));
    assert!(!report.sandbox_dir.exists());
    assert!(deployer.list().unwrap().is_empty());
    assert_eq!(mock.script_names().last().map(String::as_str), Some("stop"));

    assert!(matches!(
        deployer.delete_sandbox("msb_8_0_30"),
        Err(CoreError::SandboxNotFound(_))
    ));
}

#[test]
fn binaries_in_use_cannot_be_deleted() {
    let dir = tempfile::tempdir().unwrap();
    let (deployer, _mock) = setup(dir.path(), &["8.0.30"]);
    deployer
        .deploy_single(&deployer.definition("8.0.30", Flavor::MySql))
        .unwrap();

    let err = deployer.delete_binaries("8.0.30").unwrap_err();
    assert!(matches!(err, CoreError::ResourceConflict(_)));
    assert!(err.to_string().contains("msb_8_0_30"));

    deployer.delete_sandbox("msb_8_0_30").unwrap();
    let removed = deployer.delete_binaries("8.0.30").unwrap();
    assert!(!removed.exists());
    assert!(matches!(
        deployer.delete_binaries("8.0.30"),
        Err(CoreError::SandboxNotFound(_))
    ));
}

#[test]
fn legacy_server_uses_install_db() {
    let dir = tempfile::tempdir().unwrap();
    let (deployer, _mock) = setup(dir.path(), &["5.6.51"]);
    let report = deployer
        .deploy_single(&deployer.definition("5.6.51", Flavor::MySql))
        .unwrap();
    assert_eq!(report.ports, vec![5651]);
    let init = fs::read_to_string(report.sandbox_dir.join("init_db")).unwrap();
    assert!(init.contains("mysql_install_db"));
}

#[test]
fn operation_log_is_recorded_in_description() {
    let dir = tempfile::tempdir().unwrap();
    let mut defaults = Defaults::factory_in(dir.path());
    defaults.log_sb_operations = true;
    fake_basedir(&defaults, "8.0.30");
    let deployer = Deployer::new(defaults, Arc::new(MockRunner::new())).unwrap();
    let report = deployer
        .deploy_single(&deployer.definition("8.0.30", Flavor::MySql))
        .unwrap();

    let desc = SandboxDescription::read(&report.sandbox_dir).unwrap();
    let log = fs::read_to_string(&desc.log_file).unwrap();
    assert!(log.contains("allocated ports"));
    assert!(log.contains("registered in catalog"));
}

#[test]
fn startup_rolls_back_interrupted_deployments() {
    let dir = tempfile::tempdir().unwrap();
    let defaults = Defaults::factory_in(dir.path());
    let layout = SandboxLayout::from_defaults(&defaults);
    layout.initialize().unwrap();

    let orphan = layout.sandbox_path("msb_8_0_30");
    fs::create_dir_all(orphan.join("data")).unwrap();
    let wal = WriteAheadLog::new(&layout);
    wal.initialize().unwrap();
    let op = wal.begin(WalOpKind::DeploySingle, &orphan).unwrap();
    wal.add_rollback_step(&op, RollbackStep::RemoveDir(orphan.clone()))
        .unwrap();

    let _deployer = Deployer::new(defaults, Arc::new(MockRunner::new())).unwrap();
    assert!(!orphan.exists());
    assert!(wal.list_incomplete().unwrap().is_empty());
}
