//! NBIO register definitions for Genoa
//!
//! IOHC and IOAPIC apertures do not continue linearly from NBIO0 to NBIO1:
//! the second pair of IOHCs starts over at a separate base. Both are split
//! families keyed on the IOHC number.

use super::{IOHCS_PER_NBIO, IOHC_COUNT, PCIE_CORES_PER_IOHC};
use crate::register::RegDef;
use crate::resolve::SmnFamily;
use crate::unit::RegisterUnit;

pub const IOHC: SmnFamily = SmnFamily::split(
    RegisterUnit::Iohc,
    IOHCS_PER_NBIO,
    0x13b0_0000,
    0x1d40_0000,
    20,
    IOHC_COUNT,
    0xfff0_0000,
);

pub const IOAPIC: SmnFamily = SmnFamily::split(
    RegisterUnit::Ioapic,
    IOHCS_PER_NBIO,
    0x1430_0000,
    0x1d60_0000,
    20,
    IOHC_COUNT,
    0xfff0_0000,
);

pub const IOMMUL1: SmnFamily = SmnFamily::split(
    RegisterUnit::IommuL1,
    IOHCS_PER_NBIO,
    0x1470_0000,
    0x1d80_0000,
    20,
    IOHC_COUNT,
    0xfff0_0000,
);

pub const IOMMUL2: SmnFamily =
    SmnFamily::linear(RegisterUnit::IommuL2, 0x13f0_0000, 20, IOHC_COUNT, 0xfff0_0000);

pub const PCIE_CORE: SmnFamily =
    SmnFamily::linear(RegisterUnit::PcieCore, 0x1a38_0000, 20, IOHC_COUNT, 0xfff8_0000)
        .with_sub_units(19, PCIE_CORES_PER_IOHC);

/// IOHC registers
pub mod iohc {
    use super::*;

    pub const IOHC_TOM: RegDef = RegDef::new(RegisterUnit::Iohc, 0x10090);
    pub const IOHC_PCIE_MMIO_BASE: RegDef = RegDef::new(RegisterUnit::Iohc, 0x10020).with_size(8);
    pub const IOHC_SDP_PORT_CTL: RegDef = RegDef::new(RegisterUnit::Iohc, 0x44000)
        .with_stride(0x400)
        .with_count(16);
}

/// IOAPIC registers
pub mod ioapic {
    use super::*;

    pub const IOAPIC_BASE_ADDR_LO: RegDef = RegDef::new(RegisterUnit::Ioapic, 0x2f0);
    pub const IOAPIC_BASE_ADDR_HI: RegDef = RegDef::new(RegisterUnit::Ioapic, 0x2f4);
    pub const IOAPIC_BR_INTR_ROUTE: RegDef = RegDef::new(RegisterUnit::Ioapic, 0x40).with_count(22);
}

/// IOMMU registers
pub mod iommu {
    use super::*;

    pub const IOMMUL1_CTL0: RegDef = RegDef::new(RegisterUnit::IommuL1, 0x30);
    pub const IOMMUL2_CTL0: RegDef = RegDef::new(RegisterUnit::IommuL2, 0x40);
    pub const IOMMUL2_CTL1: RegDef = RegDef::new(RegisterUnit::IommuL2, 0x44);
}

/// PCIe core registers, relative to the core window
pub mod pcie_core {
    use super::*;

    pub const PCIE_CORE_SDP_CTL: RegDef = RegDef::new(RegisterUnit::PcieCore, 0x294);
    pub const PCIE_CORE_HW_DEBUG: RegDef = RegDef::new(RegisterUnit::PcieCore, 0x8);
    pub const PCIE_CORE_LANE_EQ: RegDef = RegDef::new(RegisterUnit::PcieCore, 0xc00).with_count(16);
}
