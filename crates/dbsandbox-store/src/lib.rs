//! On-disk state for dbsandbox.
//!
//! `SandboxLayout` names every path under `SANDBOX_HOME` and the catalog
//! directory, `SandboxDescription` is the self-describing JSON kept inside
//! each sandbox, `SandboxCatalog` is the global path-keyed registry, and
//! `WriteAheadLog` records cleanup steps so that a failed or crashed
//! deployment can be rolled back.

pub mod catalog;
pub mod description;
pub mod layout;
pub mod wal;

pub use catalog::{CatalogDivergence, SandboxCatalog, SandboxItem};
pub use description::{collect_installed_ports, find_descriptions, SandboxDescription};
pub use layout::{SandboxLayout, CATALOG_FILE, DESCRIPTION_FILE};
pub use wal::{RollbackStep, WalEntry, WalOpKind, WriteAheadLog};

use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use thiserror::Error;

/// Fsync a directory so that a preceding `rename()` is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

/// Replace `dest` with `content` through a synced temp file in the same
/// directory.
pub(crate) fn write_atomic(dest: &Path, content: &[u8]) -> Result<(), StoreError> {
    let dir = dest
        .parent()
        .ok_or_else(|| StoreError::Io(std::io::Error::other("destination has no parent")))?;
    std::fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| StoreError::Io(e.error))?;
    fsync_dir(dir)?;
    Ok(())
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("no sandbox description in {0}")]
    DescriptionNotFound(String),
    #[error("catalog has no entry for {0}")]
    EntryNotFound(String),
    #[error("lock acquisition failed: {0}")]
    LockFailed(String),
}
