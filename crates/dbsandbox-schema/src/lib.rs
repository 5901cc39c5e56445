//! Declarative inputs for dbsandbox deployments.
//!
//! This crate defines the value layer shared by every other crate: version
//! triples and flavors, the per-flavor `CapabilityMatrix` used for all version
//! gating, the `Defaults` configuration (TOML), the `SandboxDefinition` that is
//! threaded through node creation, and the validated `Topology` variants.

pub mod capability;
pub mod defaults;
pub mod definition;
pub mod flavor;
pub mod topology;
pub mod types;
pub mod version;

pub use capability::{features, Capability, CapabilityMatrix};
pub use defaults::Defaults;
pub use definition::{SandboxDefinition, SandboxType};
pub use flavor::Flavor;
pub use topology::{
    parse_node_list, validate_fan_in_lists, ReadOnly, Topology, TopologyKind, TopologyRequest,
};
pub use types::{CatalogKey, ServerUuid};
pub use version::{sandbox_suffix, VersionTriple};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("invalid version '{0}': expected <major>.<minor>.<revision>, optionally prefixed by letters")]
    InvalidVersion(String),
    #[error("unknown flavor: {0}")]
    UnknownFlavor(String),
    #[error("unknown topology: {0}")]
    UnknownTopology(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("failed to read defaults file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse defaults file: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("invalid defaults: {0}")]
    InvalidDefaults(String),
}
