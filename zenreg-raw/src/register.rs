//! Register descriptor model
//!
//! A [`RegDef`] describes where a register (or a strided array of identical
//! registers) sits inside one functional unit's aperture. It carries no
//! location: resolvers in [`crate::resolve`] combine it with a
//! [`RegisterLocation`] to produce an [`SmnReg`], and MMIO blocks in the
//! access crate combine it with a mapped window.

use crate::invariant::Invariant;
use crate::unit::RegisterUnit;

/// Width of a single register access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegWidth {
    W1,
    W2,
    W4,
    W8,
}

impl RegWidth {
    /// Convert a byte count to a width. Anything other than 1, 2, 4 or 8 is fatal.
    #[track_caller]
    pub fn from_bytes(bytes: u32) -> RegWidth {
        match bytes {
            1 => RegWidth::W1,
            2 => RegWidth::W2,
            4 => RegWidth::W4,
            8 => RegWidth::W8,
            _ => crate::invariant::violated(
                Invariant::InvalidWidth,
                format_args!("register width {bytes} is not 1, 2, 4 or 8 bytes"),
            ),
        }
    }

    pub const fn bytes(self) -> u32 {
        match self {
            RegWidth::W1 => 1,
            RegWidth::W2 => 2,
            RegWidth::W4 => 4,
            RegWidth::W8 => 8,
        }
    }

    /// Largest value representable at this width
    pub const fn max_value(self) -> u64 {
        match self {
            RegWidth::W8 => u64::MAX,
            _ => (1u64 << (self.bytes() * 8)) - 1,
        }
    }
}

/// Declarative register descriptor
///
/// Zero values follow the hardware documentation conventions: a `size` of 0
/// means a 32-bit register, a `stride` of 0 means "same as the size", and a
/// `count` of 0 means a single instance.
///
/// ## Example
///
/// ```
/// use zenreg_raw::{RegDef, RegisterUnit};
///
/// // Eight consecutive 32-bit HSMP argument registers
/// const HSMP_ARG: RegDef = RegDef::new(RegisterUnit::Hsmp, 0x9e0).with_count(8);
/// assert_eq!(HSMP_ARG.stride(), 4);
/// assert_eq!(HSMP_ARG.offset_of(3), 0x9ec);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegDef {
    pub unit: RegisterUnit,
    pub reg: u32,
    pub size: u8,
    pub stride: u32,
    pub count: u32,
}

impl RegDef {
    /// A single 32-bit register at `reg`
    pub const fn new(unit: RegisterUnit, reg: u32) -> Self {
        Self {
            unit,
            reg,
            size: 0,
            stride: 0,
            count: 0,
        }
    }

    pub const fn with_size(self, size: u8) -> Self {
        Self { size, ..self }
    }

    pub const fn with_stride(self, stride: u32) -> Self {
        Self { stride, ..self }
    }

    pub const fn with_count(self, count: u32) -> Self {
        Self { count, ..self }
    }

    /// Access width; fatal if the descriptor's size is not a valid width.
    #[track_caller]
    pub fn width(&self) -> RegWidth {
        if self.size == 0 {
            RegWidth::W4
        } else {
            RegWidth::from_bytes(self.size as u32)
        }
    }

    /// Effective byte stride between instances
    #[track_caller]
    pub fn stride(&self) -> u32 {
        if self.stride == 0 {
            self.width().bytes()
        } else {
            self.stride
        }
    }

    /// Effective number of instances
    pub const fn instances(&self) -> u32 {
        if self.count == 0 {
            1
        } else {
            self.count
        }
    }

    /// Assert this descriptor belongs to `unit`.
    #[track_caller]
    pub fn expect_unit(&self, unit: RegisterUnit) {
        crate::invariant!(
            self.unit == unit,
            Invariant::UnitMismatch,
            "descriptor at 0x{:x} is for unit {}, used with {}",
            self.reg,
            self.unit,
            unit
        );
    }

    /// Offset of instance `instance` relative to the unit aperture:
    /// `reg + instance * stride`. Fatal if the instance is out of range or
    /// the arithmetic overflows.
    #[track_caller]
    pub fn offset_of(&self, instance: u32) -> u32 {
        crate::invariant!(
            instance < self.instances(),
            Invariant::OutOfRange,
            "{} register 0x{:x}: instance {} >= count {}",
            self.unit,
            self.reg,
            instance,
            self.instances()
        );
        match instance
            .checked_mul(self.stride())
            .and_then(|off| off.checked_add(self.reg))
        {
            Some(offset) => offset,
            None => crate::invariant::violated(
                Invariant::ApertureOverlap,
                format_args!(
                    "{} register 0x{:x}: instance {} overflows 32 bits",
                    self.unit, self.reg, instance
                ),
            ),
        }
    }
}

/// Where a register lives: which unit copy, which sub-unit, which instance
///
/// `unit` is the die-, node- or IOMS-level unit number (for FCH controllers
/// the controller number). `sub_unit` is used by families with a second
/// selector such as the PCIe core number within an IOMS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RegisterLocation {
    pub unit: u8,
    pub sub_unit: Option<u8>,
    pub instance: u16,
}

impl RegisterLocation {
    pub const fn unit(unit: u8) -> Self {
        Self {
            unit,
            sub_unit: None,
            instance: 0,
        }
    }

    pub const fn with_sub_unit(self, sub_unit: u8) -> Self {
        Self {
            sub_unit: Some(sub_unit),
            ..self
        }
    }

    pub const fn with_instance(self, instance: u16) -> Self {
        Self { instance, ..self }
    }
}

/// A resolved SMN register: 32-bit address plus access width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SmnReg {
    addr: u32,
    width: RegWidth,
    unit: RegisterUnit,
}

impl SmnReg {
    /// Build a resolved register. Fatal if `addr` is not aligned to `width`.
    #[track_caller]
    pub fn new(addr: u32, width: RegWidth, unit: RegisterUnit) -> Self {
        crate::invariant!(
            addr % width.bytes() == 0,
            Invariant::Misaligned,
            "{} SMN address 0x{:08x} is not {}-byte aligned",
            unit,
            addr,
            width.bytes()
        );
        Self { addr, width, unit }
    }

    pub const fn addr(&self) -> u32 {
        self.addr
    }

    pub const fn width(&self) -> RegWidth {
        self.width
    }

    pub const fn unit(&self) -> RegisterUnit {
        self.unit
    }
}

/// Physical location of a memory-mapped register block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MmioPhys {
    pub base: u64,
    pub len: u64,
}

impl MmioPhys {
    pub const fn new(base: u64, len: u64) -> Self {
        Self { base, len }
    }
}

/// Trait for register layouts that can be converted to/from raw values
///
/// This provides type-safe conversion between structured register layouts
/// and the 32-bit values written to or read from the hardware.
pub trait RegisterLayout: Sized {
    /// Convert this register layout to a raw value
    fn to_raw(&self) -> u32;

    /// Parse a raw value into this register layout
    fn from_raw(value: u32) -> Self;

    /// Validate that the field values fit their bit ranges
    ///
    /// Returns `Ok(())` if valid, or an error message if invalid.
    fn validate(&self) -> Result<(), &'static str> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_fields_take_defaults() {
        let def = RegDef::new(RegisterUnit::SmuRpc, 0x530);
        assert_eq!(def.width(), RegWidth::W4);
        assert_eq!(def.stride(), 4);
        assert_eq!(def.instances(), 1);
        assert_eq!(def.offset_of(0), 0x530);
    }

    #[test]
    fn test_stride_defaults_to_size() {
        let def = RegDef::new(RegisterUnit::FchIomux, 0x0)
            .with_size(1)
            .with_count(64);
        assert_eq!(def.stride(), 1);
        assert_eq!(def.offset_of(63), 63);
    }

    #[test]
    fn test_explicit_stride() {
        let def = RegDef::new(RegisterUnit::IommuL2, 0x100)
            .with_size(8)
            .with_stride(0x10)
            .with_count(4);
        assert_eq!(def.width(), RegWidth::W8);
        assert_eq!(def.offset_of(2), 0x120);
    }

    #[test]
    #[should_panic(expected = "invariant violated [out-of-range]")]
    fn test_instance_past_count_is_fatal() {
        let def = RegDef::new(RegisterUnit::Hsmp, 0x9e0).with_count(8);
        def.offset_of(8);
    }

    #[test]
    #[should_panic(expected = "invariant violated [invalid-width]")]
    fn test_bad_size_is_fatal() {
        RegDef::new(RegisterUnit::Psp, 0x10).with_size(3).width();
    }

    #[test]
    #[should_panic(expected = "invariant violated [unit-mismatch]")]
    fn test_unit_mismatch_is_fatal() {
        RegDef::new(RegisterUnit::Psp, 0x10).expect_unit(RegisterUnit::SmuRpc);
    }

    #[test]
    #[should_panic(expected = "invariant violated [misaligned]")]
    fn test_misaligned_smn_reg_is_fatal() {
        SmnReg::new(0x3b10532, RegWidth::W4, RegisterUnit::SmuRpc);
    }

    #[test]
    fn test_width_max_values() {
        assert_eq!(RegWidth::W1.max_value(), 0xff);
        assert_eq!(RegWidth::W2.max_value(), 0xffff);
        assert_eq!(RegWidth::W4.max_value(), 0xffff_ffff);
        assert_eq!(RegWidth::W8.max_value(), u64::MAX);
    }
}
