//! Functional unit tags
//!
//! Every register descriptor names exactly one unit. Resolvers and MMIO
//! blocks carry the unit they serve and refuse descriptors for any other.

crate::named_enum! {
    /// A functional hardware block reachable over SMN or MMIO
    pub enum RegisterUnit {
        /// Host System Management Port mailbox (in MP1)
        Hsmp => "hsmp",
        /// Platform Security Processor (MP0) mailboxes
        Psp => "psp",
        /// SMU (MP1) RPC mailbox
        SmuRpc => "smu_rpc",
        /// FCH pin multiplexer
        FchIomux => "fch_iomux",
        /// FCH DesignWare I2C controllers
        FchI2c => "fch_i2c",
        /// NBIO PCIe core (one per group of ports)
        PcieCore => "pcie_core",
        /// NBIO I/O hub controller
        Iohc => "iohc",
        /// NBIO I/O APIC
        Ioapic => "ioapic",
        /// IOMMU L1 translation caches
        IommuL1 => "iommul1",
        /// IOMMU L2
        IommuL2 => "iommul2",
    }
}
