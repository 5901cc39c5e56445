//! CLI subprocess integration tests.
//!
//! These tests invoke the `dbsandbox` binary with `--runner mock` and a
//! throwaway `HOME`, so scripts are written to disk but never executed.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

fn dbsandbox_bin(home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_dbsandbox"));
    cmd.env("HOME", home)
        .env_remove("SANDBOX_HOME")
        .env_remove("SANDBOX_BINARY")
        .env_remove("DBSANDBOX_LOG");
    cmd
}

fn fake_basedir(home: &Path, version: &str) {
    let base = home.join("opt").join("mysql").join(version);
    for file in ["bin/mysqld", "bin/mysql", "scripts/mysql_install_db"] {
        let path = base.join(file);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "").unwrap();
    }
}

fn run(home: &Path, args: &[&str]) -> Output {
    dbsandbox_bin(home)
        .args(["--runner", "mock"])
        .args(args)
        .output()
        .unwrap()
}

fn stdout_json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
        panic!(
            "stdout is not JSON ({e}): {}",
            String::from_utf8_lossy(&output.stdout)
        )
    })
}

#[test]
fn cli_version_exits_zero() {
    let home = tempfile::tempdir().unwrap();
    let output = dbsandbox_bin(home.path()).arg("--version").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("dbsandbox"), "{stdout}");
}

#[test]
fn cli_help_lists_commands() {
    let home = tempfile::tempdir().unwrap();
    let output = dbsandbox_bin(home.path()).arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["deploy", "list", "delete", "delete-binaries", "capabilities"] {
        assert!(stdout.contains(command), "help must list '{command}'");
    }
}

#[test]
fn cli_capabilities_at_version() {
    let home = tempfile::tempdir().unwrap();
    let output = run(
        home.path(),
        &["--json", "capabilities", "--flavor", "mysql", "--version", "5.7.16"],
    );
    assert!(output.status.success());
    let json = stdout_json(&output);
    let names: Vec<&str> = json["features"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|f| f["feature"].as_str())
        .collect();
    assert!(names.contains(&"gtid"));
    assert!(!names.contains(&"group_replication"));
}

#[test]
fn cli_capabilities_ignores_defaults_file() {
    let home = tempfile::tempdir().unwrap();
    let missing = home.path().join("missing.toml");
    let output = run(
        home.path(),
        &["--defaults", &missing.to_string_lossy(), "capabilities"],
    );
    assert!(output.status.success());
    assert!(!home.path().join(".dbsandbox").exists());

    let output = run(home.path(), &["--defaults", &missing.to_string_lossy(), "list"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn cli_capabilities_rejects_bad_version() {
    let home = tempfile::tempdir().unwrap();
    let output = run(home.path(), &["capabilities", "--version", "eight"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn cli_deploy_list_delete_roundtrip() {
    let home = tempfile::tempdir().unwrap();
    fake_basedir(home.path(), "8.0.30");

    let output = run(home.path(), &["--json", "deploy", "single", "8.0.30"]);
    assert!(
        output.status.success(),
        "deploy must exit 0. stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let report = stdout_json(&output);
    assert_eq!(report["ports"], serde_json::json!([8030, 18030]));
    let sandbox = home.path().join("sandboxes").join("msb_8_0_30");
    assert!(sandbox.join("start").is_file());

    let output = run(home.path(), &["--json", "list"]);
    assert!(output.status.success());
    let items = stdout_json(&output);
    assert_eq!(items.as_array().unwrap().len(), 1);
    assert_eq!(items[0]["version"], "8.0.30");

    let output = run(home.path(), &["--json", "delete", "msb_8_0_30"]);
    assert!(output.status.success());
    let deleted = stdout_json(&output);
    assert_eq!(deleted["status"], "deleted");
    assert!(!sandbox.exists());

    let output = run(home.path(), &["--json", "list"]);
    assert_eq!(stdout_json(&output), serde_json::json!([]));
}

#[test]
fn cli_topology_deploy_reports_nodes() {
    let home = tempfile::tempdir().unwrap();
    fake_basedir(home.path(), "8.0.30");
    let output = run(
        home.path(),
        &[
            "--json",
            "deploy",
            "replication",
            "8.0.30",
            "--topology",
            "group",
            "--nodes",
            "3",
            "--single-primary",
        ],
    );
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let report = stdout_json(&output);
    assert_eq!(report["nodes"].as_array().unwrap().len(), 3);
    assert!(home
        .path()
        .join("sandboxes")
        .join("group_sp_msb_8_0_30")
        .join("initialize_nodes")
        .is_file());
}

#[test]
fn cli_invalid_topology_exits_with_validation_code() {
    let home = tempfile::tempdir().unwrap();
    fake_basedir(home.path(), "8.0.30");
    let output = run(
        home.path(),
        &["deploy", "replication", "8.0.30", "--topology", "group", "--nodes", "2"],
    );
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error: validation"), "{stderr}");
}

#[test]
fn cli_reserved_port_is_a_conflict() {
    let home = tempfile::tempdir().unwrap();
    fake_basedir(home.path(), "8.0.30");
    let output = run(home.path(), &["deploy", "single", "8.0.30", "--port", "3306"]);
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn cli_missing_binaries_is_a_prerequisite() {
    let home = tempfile::tempdir().unwrap();
    let output = run(home.path(), &["deploy", "single", "8.0.30"]);
    assert_eq!(output.status.code(), Some(4));
    assert!(!home.path().join("sandboxes").join("msb_8_0_30").exists());
}

#[test]
fn cli_unknown_runner_is_a_prerequisite() {
    let home = tempfile::tempdir().unwrap();
    let output = dbsandbox_bin(home.path())
        .args(["--runner", "docker", "list"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(4));
}

#[test]
fn cli_binaries_in_use_are_kept() {
    let home = tempfile::tempdir().unwrap();
    fake_basedir(home.path(), "8.0.30");
    assert!(run(home.path(), &["deploy", "single", "8.0.30"]).status.success());

    let output = run(home.path(), &["delete-binaries", "8.0.30"]);
    assert_eq!(output.status.code(), Some(3));
    assert!(home.path().join("opt/mysql/8.0.30/bin/mysqld").is_file());
}
