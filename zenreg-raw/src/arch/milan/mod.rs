//! AMD Milan (Zen 3, Family 19h Model 01h) register tables
//!
//! ## Topology
//!
//! - One I/O die per socket, data fabric revision 3.5
//! - Four IOMS (I/O master/slave) blocks per I/O die, each with an IOHC,
//!   IOAPIC, IOMMU and two PCIe cores
//!
//! ## References
//!
//! - PPR for AMD Family 19h Model 01h, Revision B1 Processors

pub mod nbio;

use crate::df::DfRev;
use crate::resolve::SmnFamily;

pub const DF_REV: DfRev = DfRev::V3p5;

/// Number of IOMS blocks per I/O die
pub const IOMS_COUNT: u8 = 4;

/// PCIe cores per IOMS reachable through the core family
pub const PCIE_CORES_PER_IOMS: u8 = 2;

/// Every SMN family on Milan
pub const SMN_FAMILIES: &[SmnFamily] = &[
    super::mp::SMU_RPC,
    super::mp::HSMP,
    super::mp::PSP,
    super::fch::I2C_SMN,
    super::fch::IOMUX_SMN,
    nbio::IOHC,
    nbio::IOAPIC,
    nbio::IOMMUL1,
    nbio::IOMMUL2,
    nbio::PCIE_CORE,
];
