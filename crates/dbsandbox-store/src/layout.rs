use crate::StoreError;
use dbsandbox_schema::Defaults;
use std::fs;
use std::path::{Path, PathBuf};

pub const CATALOG_FILE: &str = "sandboxes.json";
pub const DESCRIPTION_FILE: &str = "sbdescription.json";
const LOCK_FILE: &str = ".lock";

/// Paths used by a deployer.
///
/// Sandboxes live under `sandbox_home`, server trees under `sandbox_binary`
/// (one subdirectory per version), and the catalog, lock and cleanup log
/// under `catalog_dir`. Directories are created lazily by
/// [`initialize`](Self::initialize).
#[derive(Debug, Clone)]
pub struct SandboxLayout {
    sandbox_home: PathBuf,
    sandbox_binary: PathBuf,
    catalog_dir: PathBuf,
    log_directory: PathBuf,
}

impl SandboxLayout {
    pub fn new(
        sandbox_home: impl Into<PathBuf>,
        sandbox_binary: impl Into<PathBuf>,
        catalog_dir: impl Into<PathBuf>,
    ) -> Self {
        let catalog_dir = catalog_dir.into();
        Self {
            sandbox_home: sandbox_home.into(),
            sandbox_binary: sandbox_binary.into(),
            log_directory: catalog_dir.join("logs"),
            catalog_dir,
        }
    }

    pub fn from_defaults(defaults: &Defaults) -> Self {
        Self {
            sandbox_home: defaults.sandbox_home.clone(),
            sandbox_binary: defaults.sandbox_binary.clone(),
            catalog_dir: defaults.catalog_dir.clone(),
            log_directory: defaults.log_directory.clone(),
        }
    }

    #[inline]
    pub fn sandbox_home(&self) -> &Path {
        &self.sandbox_home
    }

    #[inline]
    pub fn sandbox_binary(&self) -> &Path {
        &self.sandbox_binary
    }

    #[inline]
    pub fn catalog_dir(&self) -> &Path {
        &self.catalog_dir
    }

    #[inline]
    pub fn log_directory(&self) -> &Path {
        &self.log_directory
    }

    #[inline]
    pub fn catalog_file(&self) -> PathBuf {
        self.catalog_dir.join(CATALOG_FILE)
    }

    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.catalog_dir.join(LOCK_FILE)
    }

    #[inline]
    pub fn wal_dir(&self) -> PathBuf {
        self.catalog_dir.join("wal")
    }

    #[inline]
    pub fn sandbox_path(&self, name: &str) -> PathBuf {
        self.sandbox_home.join(name)
    }

    #[inline]
    pub fn basedir(&self, version: &str) -> PathBuf {
        self.sandbox_binary.join(version)
    }

    pub fn operation_log(&self, sandbox_name: &str) -> PathBuf {
        self.log_directory.join(format!("{sandbox_name}.log"))
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.sandbox_home)?;
        fs::create_dir_all(&self.catalog_dir)?;
        fs::create_dir_all(self.wal_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths_are_correct() {
        let layout = SandboxLayout::new("/tmp/sb", "/tmp/opt/mysql", "/tmp/.dbsandbox");
        assert_eq!(layout.catalog_file(), PathBuf::from("/tmp/.dbsandbox/sandboxes.json"));
        assert_eq!(layout.lock_file(), PathBuf::from("/tmp/.dbsandbox/.lock"));
        assert_eq!(layout.wal_dir(), PathBuf::from("/tmp/.dbsandbox/wal"));
        assert_eq!(layout.basedir("8.0.30"), PathBuf::from("/tmp/opt/mysql/8.0.30"));
        assert_eq!(
            layout.operation_log("msb_8_0_30"),
            PathBuf::from("/tmp/.dbsandbox/logs/msb_8_0_30.log")
        );
    }

    #[test]
    fn initialize_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let layout = SandboxLayout::new(
            dir.path().join("sandboxes"),
            dir.path().join("opt"),
            dir.path().join("catalog"),
        );
        layout.initialize().unwrap();
        assert!(layout.sandbox_home().is_dir());
        assert!(layout.wal_dir().is_dir());
    }

    #[test]
    fn from_defaults_copies_paths() {
        let defaults = Defaults::factory_in(Path::new("/home/dev"));
        let layout = SandboxLayout::from_defaults(&defaults);
        assert_eq!(layout.sandbox_home(), Path::new("/home/dev/sandboxes"));
        assert_eq!(layout.log_directory(), Path::new("/home/dev/.dbsandbox/logs"));
    }
}
