use crate::catalog::SandboxCatalog;
use crate::layout::SandboxLayout;
use crate::{write_atomic, StoreError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A single cleanup action that undoes part of a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RollbackStep {
    /// Remove a directory tree (a sandbox or node directory).
    RemoveDir(PathBuf),
    /// Remove a single file (a description or operation log).
    RemoveFile(PathBuf),
    /// Drop a catalog entry written before the run failed.
    RemoveCatalogEntry { catalog: PathBuf, destination: PathBuf },
}

/// The type of mutating operation being tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalOpKind {
    DeploySingle,
    DeployTopology,
    DeleteSandbox,
}

impl std::fmt::Display for WalOpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WalOpKind::DeploySingle => write!(f, "deploy-single"),
            WalOpKind::DeployTopology => write!(f, "deploy-topology"),
            WalOpKind::DeleteSandbox => write!(f, "delete-sandbox"),
        }
    }
}

/// An in-flight operation and the steps that undo it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    pub op_id: String,
    pub kind: WalOpKind,
    pub target: PathBuf,
    pub timestamp: String,
    pub rollback_steps: Vec<RollbackStep>,
}

/// Persistent cleanup stack.
///
/// A deployment begins an entry before creating anything, registers a
/// rollback step before each side effect, and commits (removes) the entry
/// once the run succeeds. A failed run calls [`abort`](Self::abort); entries
/// left behind by a crashed process are rolled back by
/// [`recover`](Self::recover). Steps always run in reverse order.
pub struct WriteAheadLog {
    wal_dir: PathBuf,
}

impl WriteAheadLog {
    pub fn new(layout: &SandboxLayout) -> Self {
        Self {
            wal_dir: layout.wal_dir(),
        }
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.wal_dir)?;
        Ok(())
    }

    /// Begin a new entry for an operation on `target`. Returns the op_id.
    pub fn begin(&self, kind: WalOpKind, target: &Path) -> Result<String, StoreError> {
        let target_str = target.to_string_lossy();
        let op_id = format!(
            "{}-{}",
            chrono::Utc::now().format("%Y%m%d%H%M%S%3f"),
            &blake3::hash(target_str.as_bytes()).to_hex()[..8]
        );
        let entry = WalEntry {
            op_id: op_id.clone(),
            kind,
            target: target.to_path_buf(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            rollback_steps: Vec::new(),
        };
        self.write_entry(&entry)?;
        debug!("WAL begin: {kind} for {target_str} (op_id={op_id})");
        Ok(op_id)
    }

    pub fn add_rollback_step(&self, op_id: &str, step: RollbackStep) -> Result<(), StoreError> {
        let mut entry = self.read_entry(op_id)?;
        entry.rollback_steps.push(step);
        self.write_entry(&entry)
    }

    /// Remove an entry after successful completion.
    pub fn commit(&self, op_id: &str) -> Result<(), StoreError> {
        let path = self.entry_path(op_id);
        if path.exists() {
            fs::remove_file(&path)?;
            debug!("WAL commit: {op_id}");
        }
        Ok(())
    }

    /// Roll back one entry of the current process and remove it.
    pub fn abort(&self, op_id: &str) -> Result<(), StoreError> {
        let entry = self.read_entry(op_id)?;
        info!(
            "WAL abort: rolling back {} on {} (op_id={op_id})",
            entry.kind,
            entry.target.display()
        );
        rollback_entry(&entry);
        fs::remove_file(self.entry_path(op_id))?;
        Ok(())
    }

    pub fn list_incomplete(&self) -> Result<Vec<WalEntry>, StoreError> {
        if !self.wal_dir.exists() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for dir_entry in fs::read_dir(&self.wal_dir)? {
            let path = dir_entry?.path();
            if !path.extension().is_some_and(|e| e == "json") {
                continue;
            }
            let parsed = fs::read_to_string(&path)
                .map_err(StoreError::from)
                .and_then(|c| serde_json::from_str::<WalEntry>(&c).map_err(StoreError::from));
            match parsed {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    warn!("corrupt WAL entry {}: {e}", path.display());
                    let _ = fs::remove_file(&path);
                }
            }
        }
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(entries)
    }

    /// Roll back every entry left by a crashed run. Returns how many.
    pub fn recover(&self) -> Result<usize, StoreError> {
        let entries = self.list_incomplete()?;
        let count = entries.len();
        for entry in &entries {
            info!(
                "WAL recovery: rolling back {} on {} (op_id={})",
                entry.kind,
                entry.target.display(),
                entry.op_id
            );
            rollback_entry(entry);
            let _ = fs::remove_file(self.entry_path(&entry.op_id));
        }
        if count > 0 {
            info!("WAL recovery complete: {count} entries rolled back");
        }
        Ok(count)
    }

    fn entry_path(&self, op_id: &str) -> PathBuf {
        self.wal_dir.join(format!("{op_id}.json"))
    }

    fn write_entry(&self, entry: &WalEntry) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(entry)?;
        write_atomic(&self.entry_path(&entry.op_id), content.as_bytes())
    }

    fn read_entry(&self, op_id: &str) -> Result<WalEntry, StoreError> {
        let content = fs::read_to_string(self.entry_path(op_id))?;
        Ok(serde_json::from_str(&content)?)
    }
}

// Best effort: a failing step is logged and the remaining steps still run.
fn rollback_entry(entry: &WalEntry) {
    for step in entry.rollback_steps.iter().rev() {
        match step {
            RollbackStep::RemoveDir(path) => {
                if path.exists() {
                    if let Err(e) = fs::remove_dir_all(path) {
                        warn!("WAL rollback: failed to remove dir {}: {e}", path.display());
                    } else {
                        debug!("WAL rollback: removed dir {}", path.display());
                    }
                }
            }
            RollbackStep::RemoveFile(path) => {
                if path.exists() {
                    if let Err(e) = fs::remove_file(path) {
                        warn!("WAL rollback: failed to remove file {}: {e}", path.display());
                    } else {
                        debug!("WAL rollback: removed file {}", path.display());
                    }
                }
            }
            RollbackStep::RemoveCatalogEntry {
                catalog,
                destination,
            } => match SandboxCatalog::new(catalog).delete(destination) {
                Ok(_) => debug!("WAL rollback: dropped catalog entry {}", destination.display()),
                Err(StoreError::EntryNotFound(_)) => {}
                Err(e) => warn!(
                    "WAL rollback: failed to drop catalog entry {}: {e}",
                    destination.display()
                ),
            },
        }
    }
}
