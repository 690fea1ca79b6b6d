//! FCH (Fusion Controller Hub) register definitions
//!
//! The FCH peripherals are reachable both over SMN and through a fixed
//! memory-mapped alias below 4 GiB. Milan and Genoa place them identically.
//!
//! The six I2C controllers do not follow a stride: controllers 0 and 1 are
//! 4 KiB apart, controllers 2-4 continue that stride from an extra 64 KiB
//! further up, and controller 5 sits at its own offset. The table below is
//! the documented list and must not be replaced by a formula.

use crate::invariant::Invariant;
use crate::register::{MmioPhys, RegDef};
use crate::resolve::SmnFamily;
use crate::unit::RegisterUnit;

/// Number of I2C controllers
pub const I2C_COUNT: usize = 6;

/// Size of one I2C controller's register window
pub const I2C_WINDOW: u64 = 0x1000;

/// SMN aperture of each I2C controller
pub const I2C_SMN_APERTURES: [u32; I2C_COUNT] = [
    0x02dc_2000, // I2C0
    0x02dc_3000, // I2C1
    0x02dd_4000, // I2C2
    0x02dd_5000, // I2C3
    0x02dd_6000, // I2C4
    0x02dd_b000, // I2C5
];

/// Physical MMIO base of each I2C controller
pub const I2C_MMIO_BASES: [u64; I2C_COUNT] = [
    0xfedc_2000,
    0xfedc_3000,
    0xfedd_4000,
    0xfedd_5000,
    0xfedd_6000,
    0xfedd_b000,
];

pub const I2C_SMN: SmnFamily =
    SmnFamily::table(RegisterUnit::FchI2c, &I2C_SMN_APERTURES, 0xffff_f000);

/// IOMUX: one byte per pin selecting its function
pub const IOMUX_SMN_BASE: u32 = 0x02d0_1d00;
pub const IOMUX_MMIO_BASE: u64 = 0xfed8_0d00;
pub const IOMUX_WINDOW: u64 = 0x100;
pub const IOMUX_PIN_COUNT: u32 = 256;

pub const IOMUX_SMN: SmnFamily = SmnFamily::single(RegisterUnit::FchIomux, IOMUX_SMN_BASE, 0xffff_ff00);

/// Physical window of I2C controller `n`. Fatal if `n` is not a controller.
#[track_caller]
pub fn i2c_mmio_block(n: u8) -> MmioPhys {
    crate::invariant!(
        (n as usize) < I2C_COUNT,
        Invariant::OutOfRange,
        "FCH I2C controller {} >= {}",
        n,
        I2C_COUNT
    );
    MmioPhys::new(I2C_MMIO_BASES[n as usize], I2C_WINDOW)
}

pub fn iomux_mmio_block() -> MmioPhys {
    MmioPhys::new(IOMUX_MMIO_BASE, IOMUX_WINDOW)
}

/// DesignWare I2C controller registers
pub mod i2c {
    use super::*;

    /// Control
    pub const IC_CON: RegDef = RegDef::new(RegisterUnit::FchI2c, 0x00);
    /// Target address
    pub const IC_TAR: RegDef = RegDef::new(RegisterUnit::FchI2c, 0x04);
    /// Data buffer and command
    pub const IC_DATA_CMD: RegDef = RegDef::new(RegisterUnit::FchI2c, 0x10);
    /// Enable
    pub const IC_ENABLE: RegDef = RegDef::new(RegisterUnit::FchI2c, 0x6c);
    /// Status
    pub const IC_STATUS: RegDef = RegDef::new(RegisterUnit::FchI2c, 0x70);
    /// Enable status
    pub const IC_ENABLE_STATUS: RegDef = RegDef::new(RegisterUnit::FchI2c, 0x9c);
    /// Component type, reads 0x44570140
    pub const IC_COMP_TYPE: RegDef = RegDef::new(RegisterUnit::FchI2c, 0xfc);
}

/// IOMUX pin function select, one byte per pin
pub const IOMUX_PIN: RegDef = RegDef::new(RegisterUnit::FchIomux, 0x00)
    .with_size(1)
    .with_count(IOMUX_PIN_COUNT);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::{RegWidth, RegisterLocation};
    use crate::resolve::resolve;

    const BASE: u32 = 0x2dc2000;

    #[test]
    fn test_i2c_smn_instances_follow_documented_table() {
        let def = RegDef::new(RegisterUnit::FchI2c, 0);
        let addr = |n: u8| resolve(&I2C_SMN, &def, RegisterLocation::unit(n)).addr();

        assert_eq!(addr(0), BASE);
        assert_eq!(addr(1), BASE + 0x1000);
        assert_eq!(addr(2), BASE + 2 * 0x1000 + 0x10000);
        assert_eq!(addr(3), BASE + 3 * 0x1000 + 0x10000);
        assert_eq!(addr(4), BASE + 4 * 0x1000 + 0x10000);
        assert_eq!(addr(5), BASE + 0x19000);
        assert_ne!(addr(5), BASE + 5 * 0x1000 + 0x10000);
    }

    #[test]
    fn test_i2c_register_offsets_apply_per_controller() {
        let reg = resolve(&I2C_SMN, &i2c::IC_ENABLE, RegisterLocation::unit(5));
        assert_eq!(reg.addr(), BASE + 0x19000 + 0x6c);
        assert_eq!(reg.width(), RegWidth::W4);
    }

    #[test]
    fn test_i2c_mmio_and_smn_tables_agree() {
        for n in 0..I2C_COUNT {
            let smn_delta = I2C_SMN_APERTURES[n] - I2C_SMN_APERTURES[0];
            let mmio_delta = I2C_MMIO_BASES[n] - I2C_MMIO_BASES[0];
            assert_eq!(smn_delta as u64, mmio_delta, "controller {n}");
        }
        assert_eq!(i2c_mmio_block(5), MmioPhys::new(0xfedd_b000, 0x1000));
    }

    #[test]
    #[should_panic(expected = "invariant violated [out-of-range]")]
    fn test_i2c_controller_six_is_fatal() {
        resolve(&I2C_SMN, &i2c::IC_CON, RegisterLocation::unit(6));
    }

    #[test]
    fn test_iomux_byte_registers() {
        let reg = resolve(&IOMUX_SMN, &IOMUX_PIN, RegisterLocation::unit(0).with_instance(0x89));
        assert_eq!(reg.addr(), 0x02d0_1d89);
        assert_eq!(reg.width(), RegWidth::W1);
    }
}
