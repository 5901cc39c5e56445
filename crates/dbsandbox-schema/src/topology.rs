//! Topology selection and validation.
//!
//! A [`TopologyRequest`] carries the loose caller-facing knobs; converting it
//! with [`Topology::from_request`] checks flag compatibility and node floors
//! and yields a variant that holds only the payload its topology needs.

use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

pub const MIN_MASTER_SLAVE_NODES: u32 = 2;
pub const MIN_GROUP_NODES: u32 = 3;
pub const MIN_PXC_NODES: u32 = 3;
pub const MIN_ALL_MASTERS_NODES: u32 = 2;
pub const MIN_FAN_IN_NODES: u32 = 2;
pub const MIN_MULTIPLE_NODES: u32 = 1;
pub const MIN_NDB_SQL_NODES: u32 = 2;
pub const MIN_NDB_DATA_NODES: u32 = 3;
pub const DEFAULT_NDB_DATA_NODES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TopologyKind {
    MasterSlave,
    Group,
    FanIn,
    AllMasters,
    Ndb,
    Pxc,
    Multiple,
}

impl TopologyKind {
    pub const ALL: [TopologyKind; 7] = [
        TopologyKind::MasterSlave,
        TopologyKind::Group,
        TopologyKind::FanIn,
        TopologyKind::AllMasters,
        TopologyKind::Ndb,
        TopologyKind::Pxc,
        TopologyKind::Multiple,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TopologyKind::MasterSlave => "master-slave",
            TopologyKind::Group => "group",
            TopologyKind::FanIn => "fan-in",
            TopologyKind::AllMasters => "all-masters",
            TopologyKind::Ndb => "ndb",
            TopologyKind::Pxc => "pxc",
            TopologyKind::Multiple => "multiple",
        }
    }

    fn min_nodes(self) -> u32 {
        match self {
            TopologyKind::MasterSlave => MIN_MASTER_SLAVE_NODES,
            TopologyKind::Group => MIN_GROUP_NODES,
            TopologyKind::FanIn => MIN_FAN_IN_NODES,
            TopologyKind::AllMasters => MIN_ALL_MASTERS_NODES,
            TopologyKind::Ndb => MIN_NDB_SQL_NODES,
            TopologyKind::Pxc => MIN_PXC_NODES,
            TopologyKind::Multiple => MIN_MULTIPLE_NODES,
        }
    }
}

impl fmt::Display for TopologyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TopologyKind {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "master-slave" | "replication" => Ok(TopologyKind::MasterSlave),
            "group" | "group-replication" => Ok(TopologyKind::Group),
            "fan-in" => Ok(TopologyKind::FanIn),
            "all-masters" => Ok(TopologyKind::AllMasters),
            "ndb" => Ok(TopologyKind::Ndb),
            "pxc" => Ok(TopologyKind::Pxc),
            "multiple" => Ok(TopologyKind::Multiple),
            other => Err(SchemaError::UnknownTopology(other.to_owned())),
        }
    }
}

/// Read-only mode applied to replica nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReadOnly {
    #[default]
    Off,
    ReadOnly,
    SuperReadOnly,
}

impl ReadOnly {
    pub fn is_off(self) -> bool {
        self == ReadOnly::Off
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyRequest {
    pub kind: TopologyKind,
    /// Node count; for NDB the number of SQL nodes.
    pub nodes: u32,
    pub single_primary: bool,
    pub semisync: bool,
    pub master_list: Option<String>,
    pub slave_list: Option<String>,
    pub ndb_nodes: Option<u32>,
    pub read_only: ReadOnly,
}

impl TopologyRequest {
    pub fn new(kind: TopologyKind, nodes: u32) -> Self {
        Self {
            kind,
            nodes,
            single_primary: false,
            semisync: false,
            master_list: None,
            slave_list: None,
            ndb_nodes: None,
            read_only: ReadOnly::Off,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topology {
    MasterSlave {
        nodes: u32,
        semisync: bool,
        read_only: ReadOnly,
    },
    Group {
        nodes: u32,
        single_primary: bool,
    },
    FanIn {
        nodes: u32,
        masters: Vec<u32>,
        slaves: Vec<u32>,
        read_only: ReadOnly,
    },
    AllMasters {
        nodes: u32,
    },
    Ndb {
        sql_nodes: u32,
        ndb_nodes: u32,
    },
    Pxc {
        nodes: u32,
    },
    Multiple {
        nodes: u32,
    },
}

impl Topology {
    /// Validate a request without touching the filesystem.
    pub fn from_request(req: &TopologyRequest) -> Result<Self, SchemaError> {
        check_flag_compatibility(req)?;

        let floor = req.kind.min_nodes();
        if req.nodes < floor {
            return Err(SchemaError::Validation(format!(
                "{} topology requires at least {floor} nodes, got {}",
                req.kind, req.nodes
            )));
        }

        let topology = match req.kind {
            TopologyKind::MasterSlave => Topology::MasterSlave {
                nodes: req.nodes,
                semisync: req.semisync,
                read_only: req.read_only,
            },
            TopologyKind::Group => Topology::Group {
                nodes: req.nodes,
                single_primary: req.single_primary,
            },
            TopologyKind::FanIn => {
                let (masters, slaves) = resolve_fan_in_lists(
                    req.nodes,
                    req.master_list.as_deref(),
                    req.slave_list.as_deref(),
                )?;
                Topology::FanIn {
                    nodes: req.nodes,
                    masters,
                    slaves,
                    read_only: req.read_only,
                }
            }
            TopologyKind::AllMasters => Topology::AllMasters { nodes: req.nodes },
            TopologyKind::Ndb => {
                let ndb_nodes = req.ndb_nodes.unwrap_or(DEFAULT_NDB_DATA_NODES);
                if ndb_nodes < MIN_NDB_DATA_NODES {
                    return Err(SchemaError::Validation(format!(
                        "ndb topology requires at least {MIN_NDB_DATA_NODES} data nodes, got {ndb_nodes}"
                    )));
                }
                Topology::Ndb {
                    sql_nodes: req.nodes,
                    ndb_nodes,
                }
            }
            TopologyKind::Pxc => Topology::Pxc { nodes: req.nodes },
            TopologyKind::Multiple => Topology::Multiple { nodes: req.nodes },
        };
        Ok(topology)
    }

    pub fn kind(&self) -> TopologyKind {
        match self {
            Topology::MasterSlave { .. } => TopologyKind::MasterSlave,
            Topology::Group { .. } => TopologyKind::Group,
            Topology::FanIn { .. } => TopologyKind::FanIn,
            Topology::AllMasters { .. } => TopologyKind::AllMasters,
            Topology::Ndb { .. } => TopologyKind::Ndb,
            Topology::Pxc { .. } => TopologyKind::Pxc,
            Topology::Multiple { .. } => TopologyKind::Multiple,
        }
    }

    /// Number of member directories the topology creates.
    pub fn node_count(&self) -> u32 {
        match self {
            Topology::MasterSlave { nodes, .. }
            | Topology::Group { nodes, .. }
            | Topology::FanIn { nodes, .. }
            | Topology::AllMasters { nodes }
            | Topology::Pxc { nodes }
            | Topology::Multiple { nodes } => *nodes,
            Topology::Ndb {
                sql_nodes,
                ndb_nodes,
            } => sql_nodes + ndb_nodes,
        }
    }
}

fn check_flag_compatibility(req: &TopologyRequest) -> Result<(), SchemaError> {
    let reject = |flag: &str, allowed: &str| {
        Err(SchemaError::Validation(format!(
            "{flag} is only valid with {allowed} topology, not {}",
            req.kind
        )))
    };

    if req.single_primary && req.kind != TopologyKind::Group {
        return reject("--single-primary", "group");
    }
    if req.ndb_nodes.is_some() && req.kind != TopologyKind::Ndb {
        return reject("--ndb-nodes", "ndb");
    }
    if (req.master_list.is_some() || req.slave_list.is_some()) && req.kind != TopologyKind::FanIn
    {
        return reject("--master-list/--slave-list", "fan-in");
    }
    if req.semisync && req.kind != TopologyKind::MasterSlave {
        return reject("--semi-sync", "master-slave");
    }
    if !req.read_only.is_off()
        && !matches!(req.kind, TopologyKind::MasterSlave | TopologyKind::FanIn)
    {
        return Err(SchemaError::Validation(format!(
            "--read-only/--super-read-only are not allowed with {} topology: every node accepts writes",
            req.kind
        )));
    }
    Ok(())
}

/// Parse `"1,2,3"` or `"1 2 3"` into node numbers.
pub fn parse_node_list(input: &str) -> Result<Vec<u32>, SchemaError> {
    input
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| match s.parse::<u32>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(SchemaError::Validation(format!(
                "invalid node number '{s}' in list '{input}'"
            ))),
        })
        .collect()
}

/// Accept only lists that exactly partition `1..=nodes`.
pub fn validate_fan_in_lists(masters: &[u32], slaves: &[u32], nodes: u32) -> Result<(), SchemaError> {
    if masters.is_empty() || slaves.is_empty() {
        return Err(SchemaError::Validation(
            "fan-in requires at least one master and one slave".to_owned(),
        ));
    }
    let mut seen = BTreeSet::new();
    for n in masters.iter().chain(slaves) {
        if *n == 0 || *n > nodes {
            return Err(SchemaError::Validation(format!(
                "node {n} is outside 1..{nodes}"
            )));
        }
        if !seen.insert(*n) {
            return Err(SchemaError::Validation(format!(
                "node {n} appears more than once in master and slave lists"
            )));
        }
    }
    if seen.len() != nodes as usize {
        return Err(SchemaError::Validation(format!(
            "master and slave lists cover {} of {nodes} nodes",
            seen.len()
        )));
    }
    Ok(())
}

fn resolve_fan_in_lists(
    nodes: u32,
    master_list: Option<&str>,
    slave_list: Option<&str>,
) -> Result<(Vec<u32>, Vec<u32>), SchemaError> {
    let complement = |taken: &[u32]| -> Vec<u32> {
        (1..=nodes).filter(|n| !taken.contains(n)).collect()
    };
    let (masters, slaves) = match (master_list, slave_list) {
        (None, None) => ((1..nodes).collect(), vec![nodes]),
        (Some(m), None) => {
            let masters = parse_node_list(m)?;
            let slaves = complement(&masters);
            (masters, slaves)
        }
        (None, Some(s)) => {
            let slaves = parse_node_list(s)?;
            let masters = complement(&slaves);
            (masters, slaves)
        }
        (Some(m), Some(s)) => (parse_node_list(m)?, parse_node_list(s)?),
    };
    validate_fan_in_lists(&masters, &slaves, nodes)?;
    Ok((masters, slaves))
}
