use crate::layout::DESCRIPTION_FILE;
use crate::{write_atomic, StoreError};
use dbsandbox_schema::{Flavor, SandboxType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Descriptor kept inside every sandbox directory.
///
/// Written once per single sandbox or node, and once per topology with the
/// union of all member ports. External tooling reads it back, so the key
/// names are a stable contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxDescription {
    pub basedir: PathBuf,
    #[serde(rename = "type")]
    pub sb_type: SandboxType,
    pub version: String,
    pub flavor: Flavor,
    pub port: Vec<u16>,
    pub nodes: u32,
    pub node_num: u32,
    #[serde(default)]
    pub log_file: String,
    #[serde(default)]
    pub timestamp: String,
}

impl SandboxDescription {
    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(DESCRIPTION_FILE)
    }

    pub fn write(&self, dir: &Path) -> Result<PathBuf, StoreError> {
        let dest = Self::path_in(dir);
        let mut stamped = self.clone();
        if stamped.timestamp.is_empty() {
            stamped.timestamp = chrono::Utc::now().to_rfc3339();
        }
        let content = serde_json::to_string_pretty(&stamped)?;
        write_atomic(&dest, content.as_bytes())?;
        Ok(dest)
    }

    pub fn read(dir: &Path) -> Result<Self, StoreError> {
        let path = Self::path_in(dir);
        if !path.exists() {
            return Err(StoreError::DescriptionNotFound(dir.display().to_string()));
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn port_set(&self) -> BTreeSet<u16> {
        self.port.iter().copied().collect()
    }
}

/// Every readable description directly under `home` and one level below it.
///
/// Unreadable or corrupt descriptions are skipped with a warning.
pub fn find_descriptions(home: &Path) -> Result<Vec<(PathBuf, SandboxDescription)>, StoreError> {
    let mut found = Vec::new();
    if !home.is_dir() {
        return Ok(found);
    }
    for dir in subdirectories(home)? {
        collect_one(&dir, &mut found);
        for nested in subdirectories(&dir)? {
            collect_one(&nested, &mut found);
        }
    }
    found.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(found)
}

/// Ports claimed by every sandbox found under `home`.
pub fn collect_installed_ports(home: &Path) -> Result<BTreeSet<u16>, StoreError> {
    Ok(find_descriptions(home)?
        .into_iter()
        .flat_map(|(_, desc)| desc.port)
        .collect())
}

fn subdirectories(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}

fn collect_one(dir: &Path, found: &mut Vec<(PathBuf, SandboxDescription)>) {
    if !SandboxDescription::path_in(dir).exists() {
        return;
    }
    match SandboxDescription::read(dir) {
        Ok(desc) => found.push((dir.to_path_buf(), desc)),
        Err(e) => warn!("skipping unreadable description in {}: {e}", dir.display()),
    }
}
