//! NBIO register definitions for Milan
//!
//! IOHC, IOAPIC and IOMMU L2 apertures are 1 MiB apart per IOMS.
//!
//! PCIe core descriptors are written at their full SMN address for IOMS 0,
//! core 0 (the family's aperture base is zero); the IOMS number lands in
//! bits 23:22 and the core number in bit 20, and a register offset must
//! leave exactly those bits clear.
//!
//! IOMMU L1 caches come in two kinds: the two PCIe L1s (numbers 0 and 1)
//! share one run of apertures, the IOAGR L1 (number 2) sits in a separate
//! block. The IOMS number is the sub-unit.

use super::{IOMS_COUNT, PCIE_CORES_PER_IOMS};
use crate::register::RegDef;
use crate::resolve::SmnFamily;
use crate::unit::RegisterUnit;

pub const IOHC: SmnFamily =
    SmnFamily::linear(RegisterUnit::Iohc, 0x13b0_0000, 20, IOMS_COUNT, 0xfff0_0000);

pub const IOAPIC: SmnFamily =
    SmnFamily::linear(RegisterUnit::Ioapic, 0x1430_0000, 20, IOMS_COUNT, 0xfff0_0000);

pub const IOMMUL2: SmnFamily =
    SmnFamily::linear(RegisterUnit::IommuL2, 0x13f0_0000, 20, IOMS_COUNT, 0xfff0_0000);

/// L1 numbers below this use the PCIe L1 block
pub const IOMMUL1_IOAGR: u8 = 2;

pub const IOMMUL1: SmnFamily = SmnFamily::split(
    RegisterUnit::IommuL1,
    IOMMUL1_IOAGR,
    0x1470_0000,
    0x1530_0000,
    22,
    3,
    0xfff0_0000,
)
.with_sub_units(20, IOMS_COUNT);

pub const PCIE_CORE: SmnFamily =
    SmnFamily::linear(RegisterUnit::PcieCore, 0, 22, IOMS_COUNT, 0x00d0_0000)
        .with_sub_units(20, PCIE_CORES_PER_IOMS);

/// IOHC registers
pub mod iohc {
    use super::*;

    /// Top of DRAM below 4 GiB
    pub const IOHC_TOM: RegDef = RegDef::new(RegisterUnit::Iohc, 0x10090);
    /// PCIe config space aperture base
    pub const IOHC_PCIE_MMIO_BASE: RegDef = RegDef::new(RegisterUnit::Iohc, 0x10020).with_size(8);
    /// SDP port control, one per NBIF/PCIe port
    pub const IOHC_SDP_PORT_CTL: RegDef = RegDef::new(RegisterUnit::Iohc, 0x44000)
        .with_stride(0x400)
        .with_count(16);
}

/// IOAPIC registers
pub mod ioapic {
    use super::*;

    pub const IOAPIC_BASE_ADDR_LO: RegDef = RegDef::new(RegisterUnit::Ioapic, 0x2f0);
    pub const IOAPIC_BASE_ADDR_HI: RegDef = RegDef::new(RegisterUnit::Ioapic, 0x2f4);
    /// Bridge interrupt routing, one per bridge
    pub const IOAPIC_BR_INTR_ROUTE: RegDef = RegDef::new(RegisterUnit::Ioapic, 0x40).with_count(22);
}

/// IOMMU registers
pub mod iommu {
    use super::*;

    pub const IOMMUL1_CTL0: RegDef = RegDef::new(RegisterUnit::IommuL1, 0x30);
    pub const IOMMUL2_CTL0: RegDef = RegDef::new(RegisterUnit::IommuL2, 0x40);
    pub const IOMMUL2_CTL1: RegDef = RegDef::new(RegisterUnit::IommuL2, 0x44);
}

/// PCIe core registers (IOMS 0, core 0 addresses)
pub mod pcie_core {
    use super::*;

    /// SDP control
    pub const PCIE_CORE_SDP_CTL: RegDef = RegDef::new(RegisterUnit::PcieCore, 0x1124_0294);
    /// Hardware debug
    pub const PCIE_CORE_HW_DEBUG: RegDef = RegDef::new(RegisterUnit::PcieCore, 0x1124_0008);
    /// Per-lane equalization control, sixteen lanes
    pub const PCIE_CORE_LANE_EQ: RegDef = RegDef::new(RegisterUnit::PcieCore, 0x1124_0c00)
        .with_count(16);
}
