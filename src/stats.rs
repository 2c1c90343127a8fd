//! Aggregated container statistics: cgroup usage, optional Intel RDT
//! counters, and per-veth host-side interface counters (spec §4.1 `stats`).
//!
//! Grounded on the teacher's `core::model` serde-derive style.

use serde::{Deserialize, Serialize};

use crate::cgroup::CgroupStats;
use crate::intel_rdt::RdtStats;

/// Host-side counters for a single veth interface attached to the
/// container's network namespace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VethStats {
    pub host_interface: String,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stats {
    pub cgroup: CgroupStats,
    pub rdt: Option<RdtStats>,
    pub veths: Vec<VethStats>,
}
