use crate::description::SandboxDescription;
use crate::{write_atomic, StoreError};
use dbsandbox_schema::{CatalogKey, Flavor, SandboxType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Registry record for one deployed sandbox or topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxItem {
    pub origin: PathBuf,
    #[serde(rename = "type")]
    pub sb_type: SandboxType,
    pub version: String,
    pub flavor: Flavor,
    pub port: Vec<u16>,
    /// Member directory names; empty for a single sandbox.
    pub nodes: Vec<String>,
    pub destination: PathBuf,
    #[serde(default)]
    pub log_directory: Option<PathBuf>,
}

impl SandboxItem {
    pub fn key(&self) -> CatalogKey {
        CatalogKey::from_path(&self.destination)
    }
}

/// A catalog entry whose ports no longer match the on-disk description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogDivergence {
    pub key: CatalogKey,
    pub catalog_ports: BTreeSet<u16>,
    /// `None` when the description is missing or unreadable.
    pub description_ports: Option<BTreeSet<u16>>,
}

/// Global path-keyed registry stored as a single JSON object.
///
/// Read-modify-write cycles are not synchronised here; callers hold the
/// catalog lock around them.
#[derive(Debug, Clone)]
pub struct SandboxCatalog {
    path: PathBuf,
}

impl SandboxCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> Result<BTreeMap<CatalogKey, SandboxItem>, StoreError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn write(&self, entries: &BTreeMap<CatalogKey, SandboxItem>) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(entries)?;
        write_atomic(&self.path, content.as_bytes())
    }

    /// Add or replace the entry keyed by `item.destination`.
    pub fn update(&self, item: SandboxItem) -> Result<(), StoreError> {
        let mut entries = self.read()?;
        let key = item.key();
        debug!("catalog update: {key}");
        entries.insert(key, item);
        self.write(&entries)
    }

    pub fn delete(&self, destination: &Path) -> Result<SandboxItem, StoreError> {
        let mut entries = self.read()?;
        let key = CatalogKey::from_path(destination);
        let removed = entries
            .remove(&key)
            .ok_or_else(|| StoreError::EntryNotFound(key.to_string()))?;
        self.write(&entries)?;
        debug!("catalog delete: {key}");
        Ok(removed)
    }

    pub fn get(&self, destination: &Path) -> Result<Option<SandboxItem>, StoreError> {
        Ok(self.read()?.remove(&CatalogKey::from_path(destination)))
    }

    pub fn list(&self) -> Result<Vec<SandboxItem>, StoreError> {
        Ok(self.read()?.into_values().collect())
    }

    /// Entries deployed from `basedir`.
    pub fn find_by_origin(&self, basedir: &Path) -> Result<Vec<SandboxItem>, StoreError> {
        Ok(self
            .read()?
            .into_values()
            .filter(|item| item.origin == basedir)
            .collect())
    }

    pub fn all_ports(&self) -> Result<BTreeSet<u16>, StoreError> {
        Ok(self
            .read()?
            .into_values()
            .flat_map(|item| item.port)
            .collect())
    }

    /// Entries whose port set disagrees with the description in their
    /// destination directory, which is what a crashed deployment leaves.
    pub fn divergent_entries(&self) -> Result<Vec<CatalogDivergence>, StoreError> {
        let mut out = Vec::new();
        for (key, item) in self.read()? {
            let catalog_ports: BTreeSet<u16> = item.port.iter().copied().collect();
            let description_ports = SandboxDescription::read(&item.destination)
                .ok()
                .map(|d| d.port_set());
            if description_ports.as_ref() != Some(&catalog_ports) {
                out.push(CatalogDivergence {
                    key,
                    catalog_ports,
                    description_ports,
                });
            }
        }
        Ok(out)
    }
}
