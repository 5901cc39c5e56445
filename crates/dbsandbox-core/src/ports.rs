//! Conflict-free port search.
//!
//! Every allocation works against a set of ports already in use. A candidate
//! window of `how_many` consecutive ports is accepted only when none of its
//! ports is used; on a conflict the scan resumes right after the highest
//! used port inside the window. The scan gives up after
//! [`MAX_PORT_SCAN_ATTEMPTS`] windows or when a window would pass 65535.

use crate::CoreError;
use dbsandbox_schema::VersionTriple;
use std::collections::BTreeSet;
use tracing::debug;

pub const MAX_PORT_SCAN_ATTEMPTS: u32 = 10_000;

/// First port `p` such that `p..p + how_many` does not intersect `used`.
pub fn find_free_port(base: u16, used: &BTreeSet<u16>, how_many: u16) -> Result<u16, CoreError> {
    scan(u32::from(base), used, how_many)
}

fn scan(base: u32, used: &BTreeSet<u16>, how_many: u16) -> Result<u16, CoreError> {
    if how_many == 0 {
        return Err(CoreError::Validation(
            "port request must ask for at least one port".to_owned(),
        ));
    }
    let span = u32::from(how_many);
    let mut candidate = base.max(1);
    for _ in 0..MAX_PORT_SCAN_ATTEMPTS {
        let last = candidate + span - 1;
        let (Ok(lo), Ok(hi)) = (u16::try_from(candidate), u16::try_from(last)) else {
            break;
        };
        match used.range(lo..=hi).next_back() {
            None => {
                if candidate != base {
                    debug!("ports {base}..: first free run of {how_many} starts at {candidate}");
                }
                return Ok(lo);
            }
            Some(&conflict) => candidate = u32::from(conflict) + 1,
        }
    }
    Err(CoreError::PortExhaustion {
        base,
        count: how_many,
    })
}

/// Single-port check used for ports chosen outside a bulk allocation.
pub fn check_port_availability(
    label: &str,
    port: u16,
    used: &BTreeSet<u16>,
) -> Result<(), CoreError> {
    if port == 0 {
        return Err(CoreError::Validation(format!("{label} port cannot be 0")));
    }
    if used.contains(&port) {
        return Err(CoreError::ResourceConflict(format!(
            "{label} port {port} is already in use"
        )));
    }
    Ok(())
}

/// `single_port + offset + revision * 100`, the first candidate for a
/// topology's data ports.
pub fn topology_base_port(
    single_port: u16,
    offset: u16,
    version: VersionTriple,
) -> Result<u16, CoreError> {
    let base = u64::from(single_port) + u64::from(offset) + u64::from(version.revision) * 100;
    u16::try_from(base).map_err(|_| CoreError::PortExhaustion {
        base: u32::try_from(base).unwrap_or(u32::MAX),
        count: 1,
    })
}

/// Allocates several port pools in turn, folding every pool into the used
/// set before the next pass so that pools never collide.
#[derive(Debug, Clone, Default)]
pub struct PortAllocator {
    used: BTreeSet<u16>,
}

impl PortAllocator {
    pub fn new(used: BTreeSet<u16>) -> Self {
        Self { used }
    }

    /// Reserve `count` consecutive ports, scanning upward from `start`.
    ///
    /// `start` is a `u32` so that callers can add port deltas without
    /// overflowing; anything past 65535 is exhaustion.
    pub fn pool(&mut self, label: &str, start: u32, count: u16) -> Result<Vec<u16>, CoreError> {
        let first = scan(start, &self.used, count)?;
        let ports: Vec<u16> = (0..count).map(|i| first + i).collect();
        self.used.extend(ports.iter().copied());
        debug!("allocated {label} pool: {first}..={}", first + count - 1);
        Ok(ports)
    }

    /// Reserve one explicitly requested port.
    pub fn claim(&mut self, label: &str, port: u16) -> Result<u16, CoreError> {
        check_port_availability(label, port, &self.used)?;
        self.used.insert(port);
        Ok(port)
    }

    pub fn used(&self) -> &BTreeSet<u16> {
        &self.used
    }
}
