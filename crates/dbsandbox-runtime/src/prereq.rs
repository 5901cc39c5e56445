use dbsandbox_schema::Flavor;
use std::fmt;
use std::path::Path;

/// A missing executable with an actionable hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingPrereq {
    pub name: String,
    pub purpose: &'static str,
    pub hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "  - {}: {} ({})", self.name, self.purpose, self.hint)
    }
}

const UNPACK_HINT: &str = "unpack a complete server tarball for this version into the binary directory";

fn require(basedir: &Path, relative: &str, purpose: &'static str, missing: &mut Vec<MissingPrereq>) {
    if !basedir.join(relative).is_file() {
        missing.push(MissingPrereq {
            name: basedir.join(relative).display().to_string(),
            purpose,
            hint: UNPACK_HINT,
        });
    }
}

/// Executables a basedir must provide for `flavor`.
///
/// Returns an empty list when everything is present.
pub fn check_basedir_prereqs(basedir: &Path, flavor: Flavor, uses_installdb: bool) -> Vec<MissingPrereq> {
    let mut missing = Vec::new();
    if !basedir.is_dir() {
        missing.push(MissingPrereq {
            name: basedir.display().to_string(),
            purpose: "server binaries for this version",
            hint: UNPACK_HINT,
        });
        return missing;
    }

    require(basedir, "bin/mysqld", "database server", &mut missing);
    require(basedir, "bin/mysql", "command line client used by the scripts", &mut missing);

    if uses_installdb
        && !basedir.join("scripts/mysql_install_db").is_file()
        && !basedir.join("bin/mysql_install_db").is_file()
    {
        missing.push(MissingPrereq {
            name: basedir.join("scripts/mysql_install_db").display().to_string(),
            purpose: "data directory initialisation for pre-5.7 servers",
            hint: UNPACK_HINT,
        });
    }

    if flavor == Flavor::Ndb {
        require(basedir, "bin/ndb_mgmd", "NDB management node", &mut missing);
        require(basedir, "bin/ndbd", "NDB data node", &mut missing);
    }
    missing
}

pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn basedir_with(files: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for f in files {
            let path = dir.path().join(f);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, "").unwrap();
        }
        dir
    }

    #[test]
    fn complete_basedir_has_no_missing_items() {
        let dir = basedir_with(&["bin/mysqld", "bin/mysql"]);
        assert!(check_basedir_prereqs(dir.path(), Flavor::MySql, false).is_empty());
    }

    #[test]
    fn missing_basedir_is_reported_once() {
        let dir = tempfile::tempdir().unwrap();
        let missing = check_basedir_prereqs(&dir.path().join("8.0.30"), Flavor::MySql, false);
        assert_eq!(missing.len(), 1);
        assert!(missing[0].name.ends_with("8.0.30"));
    }

    #[test]
    fn legacy_servers_need_install_db() {
        let dir = basedir_with(&["bin/mysqld", "bin/mysql"]);
        let missing = check_basedir_prereqs(dir.path(), Flavor::MySql, true);
        assert_eq!(missing.len(), 1);
        assert!(missing[0].name.contains("mysql_install_db"));

        let dir = basedir_with(&["bin/mysqld", "bin/mysql", "bin/mysql_install_db"]);
        assert!(check_basedir_prereqs(dir.path(), Flavor::MariaDb, true).is_empty());
    }

    #[test]
    fn ndb_needs_cluster_binaries() {
        let dir = basedir_with(&["bin/mysqld", "bin/mysql", "bin/ndb_mgmd"]);
        let missing = check_basedir_prereqs(dir.path(), Flavor::Ndb, false);
        assert_eq!(missing.len(), 1);
        assert!(missing[0].name.ends_with("ndbd"));
    }

    #[test]
    fn format_missing_produces_readable_output() {
        let basedir = basedir_with(&[]);
        let output = format_missing(&check_basedir_prereqs(basedir.path(), Flavor::MySql, false));
        assert!(output.contains("missing prerequisites:"));
        assert!(output.contains("bin/mysqld"));
        assert!(output.contains("bin/mysql:"));
    }
}
