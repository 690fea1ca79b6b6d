//! SMN address resolution
//!
//! Every SMN-addressed unit is described by one [`SmnFamily`] record: where
//! its aperture starts, how unit and sub-unit numbers move the aperture, how
//! many of each exist, and which address bits belong to unit/instance
//! selection rather than to the register offset. [`resolve`] is the single
//! function turning a family, a descriptor and a location into an address.
//!
//! Most units are laid out linearly ([`ApertureBase::Fixed`]). A few are not,
//! and those are spelled out as explicit per-unit tables
//! ([`ApertureBase::Table`]) or as a pair of bases chosen by a unit-number
//! threshold ([`ApertureBase::Split`]), exactly as the hardware documents
//! them. There is deliberately no attempt to derive a formula for them.
//!
//! Resolution is pure: no hardware access, no shared state, usable before
//! anything is mapped.

use crate::invariant::{violated, Invariant};
use crate::register::{RegDef, RegisterLocation, SmnReg};
use crate::unit::RegisterUnit;

/// How the aperture base of unit number `n` is found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApertureBase {
    /// `base + (n << unit_shift)`
    Fixed(u32),
    /// `table[n]`, verbatim per-unit bases
    Table(&'static [u32]),
    /// `low + (n << unit_shift)` for `n < threshold`,
    /// `high + ((n - threshold) << unit_shift)` otherwise
    Split { threshold: u8, low: u32, high: u32 },
}

/// Address layout of one SMN-addressed unit type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmnFamily {
    pub unit: RegisterUnit,
    pub base: ApertureBase,
    pub unit_shift: u32,
    pub unit_count: u8,
    /// Shift applied to the sub-unit number; ignored when `sub_count` is 0
    pub sub_shift: u32,
    /// Number of sub-units, or 0 if the family has no sub-unit selector
    pub sub_count: u8,
    /// Bits a register offset must never set
    pub reserved_mask: u32,
}

impl SmnFamily {
    /// A unit with exactly one aperture at `base`
    pub const fn single(unit: RegisterUnit, base: u32, reserved_mask: u32) -> Self {
        Self {
            unit,
            base: ApertureBase::Fixed(base),
            unit_shift: 0,
            unit_count: 1,
            sub_shift: 0,
            sub_count: 0,
            reserved_mask,
        }
    }

    /// `unit_count` evenly spaced apertures starting at `base`
    pub const fn linear(
        unit: RegisterUnit,
        base: u32,
        unit_shift: u32,
        unit_count: u8,
        reserved_mask: u32,
    ) -> Self {
        Self {
            unit,
            base: ApertureBase::Fixed(base),
            unit_shift,
            unit_count,
            sub_shift: 0,
            sub_count: 0,
            reserved_mask,
        }
    }

    /// One aperture per table entry, taken verbatim
    pub const fn table(unit: RegisterUnit, bases: &'static [u32], reserved_mask: u32) -> Self {
        Self {
            unit,
            base: ApertureBase::Table(bases),
            unit_shift: 0,
            unit_count: bases.len() as u8,
            sub_shift: 0,
            sub_count: 0,
            reserved_mask,
        }
    }

    /// Two runs of evenly spaced apertures split at `threshold`
    pub const fn split(
        unit: RegisterUnit,
        threshold: u8,
        low: u32,
        high: u32,
        unit_shift: u32,
        unit_count: u8,
        reserved_mask: u32,
    ) -> Self {
        Self {
            unit,
            base: ApertureBase::Split {
                threshold,
                low,
                high,
            },
            unit_shift,
            unit_count,
            sub_shift: 0,
            sub_count: 0,
            reserved_mask,
        }
    }

    /// Add a sub-unit selector to the family
    pub const fn with_sub_units(self, sub_shift: u32, sub_count: u8) -> Self {
        Self {
            sub_shift,
            sub_count,
            ..self
        }
    }

    pub const fn has_sub_units(&self) -> bool {
        self.sub_count != 0
    }

    /// Aperture base for unit number `unit` and optional sub-unit `sub`.
    ///
    /// Fatal if either number is out of range for the family, if a sub-unit
    /// is supplied to a family without one (or missing from one that needs
    /// it), or if the arithmetic leaves the 32-bit SMN space.
    #[track_caller]
    pub fn aperture(&self, unit: u8, sub: Option<u8>) -> u32 {
        crate::invariant!(
            unit < self.unit_count,
            Invariant::OutOfRange,
            "{} unit {} >= {}",
            self.unit,
            unit,
            self.unit_count
        );

        let sub_offset = match (self.has_sub_units(), sub) {
            (true, Some(sub)) => {
                crate::invariant!(
                    sub < self.sub_count,
                    Invariant::OutOfRange,
                    "{} sub-unit {} >= {}",
                    self.unit,
                    sub,
                    self.sub_count
                );
                shifted(self.unit, sub, self.sub_shift)
            }
            (true, None) => violated(
                Invariant::OutOfRange,
                format_args!("{} requires a sub-unit number", self.unit),
            ),
            (false, Some(sub)) => violated(
                Invariant::OutOfRange,
                format_args!("{} has no sub-units, got {}", self.unit, sub),
            ),
            (false, None) => 0,
        };

        let unit_base = match self.base {
            ApertureBase::Fixed(base) => {
                checked_sum(self.unit, base, shifted(self.unit, unit, self.unit_shift))
            }
            ApertureBase::Table(bases) => {
                crate::invariant!(
                    bases.len() == self.unit_count as usize,
                    Invariant::OutOfRange,
                    "{} aperture table has {} entries for {} units",
                    self.unit,
                    bases.len(),
                    self.unit_count
                );
                bases[unit as usize]
            }
            ApertureBase::Split {
                threshold,
                low,
                high,
            } => {
                if unit < threshold {
                    checked_sum(self.unit, low, shifted(self.unit, unit, self.unit_shift))
                } else {
                    checked_sum(
                        self.unit,
                        high,
                        shifted(self.unit, unit - threshold, self.unit_shift),
                    )
                }
            }
        };

        checked_sum(self.unit, unit_base, sub_offset)
    }
}

#[track_caller]
fn shifted(unit: RegisterUnit, n: u8, shift: u32) -> u32 {
    match (n as u32).checked_shl(shift) {
        Some(v) if v >> shift == n as u32 => v,
        _ => violated(
            Invariant::ApertureOverlap,
            format_args!("{unit} selector {n} << {shift} leaves the SMN space"),
        ),
    }
}

#[track_caller]
fn checked_sum(unit: RegisterUnit, a: u32, b: u32) -> u32 {
    match a.checked_add(b) {
        Some(v) => v,
        None => violated(
            Invariant::ApertureOverlap,
            format_args!("{unit} address 0x{a:x} + 0x{b:x} leaves the SMN space"),
        ),
    }
}

/// Non-panicking form of every precondition [`resolve`] enforces, for
/// callers holding descriptors or locations built from untrusted input.
/// `Ok` guarantees `resolve(family, def, loc)` returns.
pub fn check_location(
    family: &SmnFamily,
    def: &RegDef,
    loc: RegisterLocation,
) -> Result<(), &'static str> {
    if def.unit != family.unit {
        return Err("descriptor belongs to another unit");
    }
    let width: u32 = match def.size {
        0 => 4,
        1 | 2 | 4 | 8 => def.size as u32,
        _ => return Err("access size must be 1, 2, 4 or 8 bytes"),
    };
    if loc.unit >= family.unit_count {
        return Err("unit number out of range");
    }
    match (family.has_sub_units(), loc.sub_unit) {
        (true, Some(sub)) if sub >= family.sub_count => {
            return Err("sub-unit number out of range")
        }
        (true, None) => return Err("unit requires a sub-unit number"),
        (false, Some(_)) => return Err("unit has no sub-units"),
        _ => {}
    }
    if loc.instance as u32 >= def.instances() {
        return Err("instance out of range");
    }

    let stride = if def.stride == 0 { width } else { def.stride };
    let reg = (loc.instance as u32)
        .checked_mul(stride)
        .and_then(|off| off.checked_add(def.reg))
        .ok_or("register offset overflows 32 bits")?;
    let last = reg
        .checked_add(width - 1)
        .ok_or("register offset overflows 32 bits")?;
    if (reg | last) & family.reserved_mask != 0 {
        return Err("register offset sets reserved bits");
    }

    let aperture = family.aperture(loc.unit, loc.sub_unit);
    if aperture & reg != 0 {
        return Err("register offset overlaps the aperture");
    }
    let addr = aperture
        .checked_add(reg)
        .ok_or("address leaves the SMN space")?;
    if addr % width != 0 {
        return Err("address is not naturally aligned");
    }
    Ok(())
}

/// Resolve `def` at `loc` within `family`.
///
/// Preconditions, all fatal:
/// - `def.unit == family.unit`
/// - `loc.instance < def.count`, unit and sub-unit numbers in range
/// - the register offset (first and last byte) sets no reserved bit
/// - the register offset does not overlap the aperture base bits
/// - the width is 1, 2, 4 or 8 bytes and the address is naturally aligned
#[track_caller]
pub fn resolve(family: &SmnFamily, def: &RegDef, loc: RegisterLocation) -> SmnReg {
    def.expect_unit(family.unit);

    let width = def.width();
    let reg = def.offset_of(loc.instance as u32);
    let last = checked_sum(family.unit, reg, width.bytes() - 1);
    crate::invariant!(
        reg & family.reserved_mask == 0 && last & family.reserved_mask == 0,
        Invariant::ApertureOverlap,
        "{} register offset 0x{:x} (instance {}) sets reserved bits 0x{:x}",
        family.unit,
        reg,
        loc.instance,
        reg & family.reserved_mask
    );

    let aperture = family.aperture(loc.unit, loc.sub_unit);
    crate::invariant!(
        aperture & reg == 0,
        Invariant::ApertureOverlap,
        "{} register offset 0x{:x} overlaps aperture 0x{:x}",
        family.unit,
        reg,
        aperture
    );

    SmnReg::new(checked_sum(family.unit, aperture, reg), width, family.unit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::RegWidth;

    const IOAPIC: SmnFamily =
        SmnFamily::linear(RegisterUnit::Ioapic, 0x1430_0000, 20, 4, 0xfff0_0000);

    const SPLIT: SmnFamily = SmnFamily::split(
        RegisterUnit::Iohc,
        2,
        0x13b0_0000,
        0x1d40_0000,
        20,
        4,
        0xfff0_0000,
    );

    const TABLE_BASES: [u32; 3] = [0x0200_0000, 0x0200_1000, 0x0201_8000];
    const TABLE: SmnFamily = SmnFamily::table(RegisterUnit::FchI2c, &TABLE_BASES, 0xffff_f000);

    #[test]
    fn test_linear_family() {
        let def = RegDef::new(RegisterUnit::Ioapic, 0x10);
        let reg = resolve(&IOAPIC, &def, RegisterLocation::unit(3));
        assert_eq!(reg.addr(), 0x1460_0010);
        assert_eq!(reg.width(), RegWidth::W4);
        assert_eq!(reg.unit(), RegisterUnit::Ioapic);
    }

    #[test]
    fn test_split_family_switches_base_at_threshold() {
        assert_eq!(SPLIT.aperture(0, None), 0x13b0_0000);
        assert_eq!(SPLIT.aperture(1, None), 0x13c0_0000);
        assert_eq!(SPLIT.aperture(2, None), 0x1d40_0000);
        assert_eq!(SPLIT.aperture(3, None), 0x1d50_0000);
    }

    #[test]
    fn test_table_family_uses_verbatim_bases() {
        let def = RegDef::new(RegisterUnit::FchI2c, 0x6c);
        let addrs: Vec<u32> = (0..3)
            .map(|n| resolve(&TABLE, &def, RegisterLocation::unit(n)).addr())
            .collect();
        assert_eq!(addrs, vec![0x0200_006c, 0x0200_106c, 0x0201_806c]);
    }

    #[test]
    fn test_instances_increase_with_stride() {
        let def = RegDef::new(RegisterUnit::Ioapic, 0x100)
            .with_stride(0x20)
            .with_count(16);
        let addrs: Vec<u32> = (0..16)
            .map(|i| resolve(&IOAPIC, &def, RegisterLocation::unit(1).with_instance(i)).addr())
            .collect();
        assert!(addrs.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(addrs[15] - addrs[0], 15 * 0x20);
    }

    #[test]
    fn test_sub_units() {
        let family = SmnFamily::linear(RegisterUnit::PcieCore, 0, 22, 4, 0x00d0_0000)
            .with_sub_units(20, 2);
        assert_eq!(family.aperture(0, Some(0)), 0);
        assert_eq!(family.aperture(0, Some(1)), 0x0010_0000);
        assert_eq!(family.aperture(3, Some(1)), 0x00d0_0000);
    }

    #[test]
    fn test_check_location_rejects_what_resolve_would_panic_on() {
        let def = RegDef::new(RegisterUnit::Ioapic, 0x10);
        assert_eq!(check_location(&IOAPIC, &def, RegisterLocation::unit(3)), Ok(()));
        assert!(check_location(&IOAPIC, &def, RegisterLocation::unit(4)).is_err());
        assert!(check_location(
            &IOAPIC,
            &def,
            RegisterLocation::unit(0).with_sub_unit(0)
        )
        .is_err());
        assert!(check_location(&IOAPIC, &def, RegisterLocation::unit(0).with_instance(1)).is_err());

        let wrong_unit = RegDef::new(RegisterUnit::Iohc, 0x10);
        assert!(check_location(&IOAPIC, &wrong_unit, RegisterLocation::unit(0)).is_err());

        let reserved = RegDef::new(RegisterUnit::Ioapic, 0x0010_0000);
        assert!(check_location(&IOAPIC, &reserved, RegisterLocation::unit(0)).is_err());

        let crossing = RegDef::new(RegisterUnit::FchI2c, 0xffc).with_size(8);
        assert!(check_location(&TABLE, &crossing, RegisterLocation::unit(0)).is_err());

        let odd = RegDef::new(RegisterUnit::Ioapic, 0x12);
        assert!(check_location(&IOAPIC, &odd, RegisterLocation::unit(0)).is_err());
        let bad_size = RegDef::new(RegisterUnit::Ioapic, 0x10).with_size(3);
        assert!(check_location(&IOAPIC, &bad_size, RegisterLocation::unit(0)).is_err());
    }

    #[test]
    fn test_check_location_sub_units() {
        let family = SmnFamily::linear(RegisterUnit::PcieCore, 0, 22, 4, 0x00d0_0000)
            .with_sub_units(20, 2);
        let def = RegDef::new(RegisterUnit::PcieCore, 0x40);
        let loc = RegisterLocation::unit(3);
        assert_eq!(check_location(&family, &def, loc.with_sub_unit(1)), Ok(()));
        assert!(check_location(&family, &def, loc.with_sub_unit(2)).is_err());
        assert!(check_location(&family, &def, loc).is_err());
    }

    #[test]
    #[should_panic(expected = "invariant violated [unit-mismatch]")]
    fn test_wrong_unit_is_fatal() {
        let def = RegDef::new(RegisterUnit::Iohc, 0x10);
        resolve(&IOAPIC, &def, RegisterLocation::unit(0));
    }

    #[test]
    #[should_panic(expected = "invariant violated [out-of-range]")]
    fn test_unit_number_out_of_range_is_fatal() {
        let def = RegDef::new(RegisterUnit::Ioapic, 0x10);
        resolve(&IOAPIC, &def, RegisterLocation::unit(4));
    }

    #[test]
    #[should_panic(expected = "invariant violated [out-of-range]")]
    fn test_missing_sub_unit_is_fatal() {
        let family = SmnFamily::linear(RegisterUnit::PcieCore, 0, 22, 4, 0x00d0_0000)
            .with_sub_units(20, 2);
        family.aperture(0, None);
    }

    #[test]
    #[should_panic(expected = "invariant violated [out-of-range]")]
    fn test_unexpected_sub_unit_is_fatal() {
        let def = RegDef::new(RegisterUnit::Ioapic, 0x10);
        resolve(
            &IOAPIC,
            &def,
            RegisterLocation::unit(0).with_sub_unit(1),
        );
    }

    #[test]
    #[should_panic(expected = "invariant violated [aperture-overlap]")]
    fn test_offset_in_reserved_bits_is_fatal() {
        let def = RegDef::new(RegisterUnit::Ioapic, 0x0010_0000);
        resolve(&IOAPIC, &def, RegisterLocation::unit(0));
    }

    #[test]
    #[should_panic(expected = "invariant violated [aperture-overlap]")]
    fn test_strided_instance_spilling_into_reserved_bits_is_fatal() {
        let def = RegDef::new(RegisterUnit::Ioapic, 0xf_f000)
            .with_stride(0x1000)
            .with_count(2);
        resolve(&IOAPIC, &def, RegisterLocation::unit(0).with_instance(1));
    }

    #[test]
    #[should_panic(expected = "invariant violated [aperture-overlap]")]
    fn test_last_byte_crossing_window_is_fatal() {
        let def = RegDef::new(RegisterUnit::FchI2c, 0xffc).with_size(8);
        resolve(&TABLE, &def, RegisterLocation::unit(0));
    }
}
