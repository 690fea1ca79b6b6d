//! AMD Genoa (Zen 4, Family 19h Model 11h) register tables
//!
//! ## Topology
//!
//! - One I/O die per socket, data fabric revision 4
//! - Two NBIO blocks per I/O die with two IOHCs each
//! - PCIe core apertures are relative: descriptors carry only the offset
//!   within the core window
//!
//! ## References
//!
//! - PPR for AMD Family 19h Model 11h, Revision B1 Processors

pub mod nbio;

use crate::df::DfRev;
use crate::resolve::SmnFamily;

pub const DF_REV: DfRev = DfRev::V4;

/// IOHC instances per I/O die
pub const IOHC_COUNT: u8 = 4;

/// IOHCs on NBIO0; the rest sit on NBIO1
pub const IOHCS_PER_NBIO: u8 = 2;

pub const PCIE_CORES_PER_IOHC: u8 = 2;

/// Every SMN family on Genoa
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
