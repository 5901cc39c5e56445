//! Deployment engine for dbsandbox.
//!
//! This crate ties the schema, store and runtime crates together into the
//! [`Deployer`]: it allocates conflict-free ports, materializes single
//! sandboxes through the [`NodeInstaller`], composes the installer over many
//! nodes for every replication and cluster topology, and keeps the catalog,
//! the per-sandbox descriptions and the write-ahead cleanup log consistent.

pub mod concurrency;
pub mod deployer;
pub mod installer;
pub mod oplog;
pub mod ports;
pub mod topology;

pub use concurrency::StoreLock;
pub use deployer::{DeploymentReport, Deployer, NodeReport};
pub use installer::{ExecMode, InstalledNode, NodeInstaller};
pub use oplog::OperationLog;
pub use ports::{
    check_port_availability, find_free_port, topology_base_port, PortAllocator,
    MAX_PORT_SCAN_ATTEMPTS,
};
pub use topology::TopologyPlan;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("schema error: {0}")]
    Schema(#[from] dbsandbox_schema::SchemaError),
    #[error("store error: {0}")]
    Store(#[from] dbsandbox_store::StoreError),
    #[error("runtime error: {0}")]
    Runtime(#[from] dbsandbox_runtime::RuntimeError),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("resource conflict: {0}")]
    ResourceConflict(String),
    #[error("missing prerequisite: {0}")]
    Prerequisite(String),
    #[error("no free run of {count} port(s) starting at {base}")]
    PortExhaustion { base: u32, count: u16 },
    #[error("sandbox not found: {0}")]
    SandboxNotFound(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse classification used by front-ends to pick an exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    ResourceConflict,
    Prerequisite,
    PortExhaustion,
    Io,
    ChildProcess,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::ResourceConflict => "resource-conflict",
            ErrorKind::Prerequisite => "prerequisite",
            ErrorKind::PortExhaustion => "port-exhaustion",
            ErrorKind::Io => "io",
            ErrorKind::ChildProcess => "child-process",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        use dbsandbox_runtime::RuntimeError;
        use dbsandbox_schema::SchemaError;
        use dbsandbox_store::StoreError;

        match self {
            CoreError::Validation(_) | CoreError::SandboxNotFound(_) => ErrorKind::Validation,
            CoreError::ResourceConflict(_) => ErrorKind::ResourceConflict,
            CoreError::Prerequisite(_) => ErrorKind::Prerequisite,
            CoreError::PortExhaustion { .. } => ErrorKind::PortExhaustion,
            CoreError::Io(_) | CoreError::Serialization(_) => ErrorKind::Io,
            CoreError::Schema(e) => match e {
                SchemaError::Io(_) => ErrorKind::Io,
                SchemaError::UnknownFlavor(_) => ErrorKind::Prerequisite,
                _ => ErrorKind::Validation,
            },
            CoreError::Store(e) => match e {
                StoreError::DescriptionNotFound(_) | StoreError::EntryNotFound(_) => {
                    ErrorKind::Validation
                }
                StoreError::LockFailed(_) => ErrorKind::ResourceConflict,
                _ => ErrorKind::Io,
            },
            CoreError::Runtime(e) => match e {
                RuntimeError::ChildProcess { .. }
                | RuntimeError::WaveFailed { .. }
                | RuntimeError::ExecFailed(_) => ErrorKind::ChildProcess,
                RuntimeError::RunnerUnavailable(_) => ErrorKind::Prerequisite,
                _ => ErrorKind::Io,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_exhaustion_display() {
        let e = CoreError::PortExhaustion {
            base: 65_000,
            count: 600,
        };
        assert_eq!(
            e.to_string(),
            "no free run of 600 port(s) starting at 65000"
        );
        assert_eq!(e.kind(), ErrorKind::PortExhaustion);
    }

    #[test]
    fn wrapped_errors_keep_their_kind() {
        let e = CoreError::from(dbsandbox_schema::SchemaError::Validation("x".to_owned()));
        assert_eq!(e.kind(), ErrorKind::Validation);

        let e = CoreError::from(dbsandbox_schema::SchemaError::InvalidVersion("8.0".to_owned()));
        assert_eq!(e.kind(), ErrorKind::Validation);

        let e = CoreError::from(dbsandbox_schema::SchemaError::UnknownFlavor("oracle".to_owned()));
        assert_eq!(e.kind(), ErrorKind::Prerequisite);

        let e = CoreError::from(dbsandbox_runtime::RuntimeError::ChildProcess {
            command: "/sb/start".to_owned(),
            code: Some(1),
            stderr: String::new(),
        });
        assert_eq!(e.kind(), ErrorKind::ChildProcess);

        let e = CoreError::from(std::io::Error::other("disk full"));
        assert_eq!(e.kind(), ErrorKind::Io);
        assert_eq!(e.kind().to_string(), "io");
    }
}
