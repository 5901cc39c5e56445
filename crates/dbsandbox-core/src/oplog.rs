use crate::CoreError;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Append-only per-sandbox record of deployment steps.
///
/// A disabled log accepts every call and writes nothing.
#[derive(Debug, Clone)]
pub struct OperationLog {
    path: Option<PathBuf>,
}

impl OperationLog {
    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn open(path: &Path) -> Result<Self, CoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path: Some(path.to_path_buf()),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Path as recorded in a sandbox description; empty when disabled.
    pub fn description_value(&self) -> String {
        self.path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default()
    }

    /// Record one step. Failures are logged and otherwise ignored.
    pub fn record(&self, step: &str) {
        let Some(path) = &self.path else {
            return;
        };
        let line = format!("{} {step}\n", chrono::Utc::now().to_rfc3339());
        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| f.write_all(line.as_bytes()));
        if let Err(e) = written {
            warn!("operation log {}: {e}", path.display());
        }
    }
}
