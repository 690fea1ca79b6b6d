//! Data fabric register definitions
//!
//! Data fabric registers live in PCI configuration space of the fabric node
//! (bus 0, devices 0x18.. on the first socket). Most of them exist once per
//! fabric component instance and are only reachable through the indirect
//! access mailbox: write an address-select value (FICAA) naming function,
//! instance and register, then read or write the data register (FICAD).
//!
//! Which registers form the mailbox, and how the address-select value is
//! laid out, depends on the fabric revision. The layouts below are keyed by
//! revision and kept as separate hardware facts.
//!
//! ## References
//!
//! - AMD Processor Programming Reference (PPR) for Family 17h/19h/1Ah,
//!   DF::FabricIndirectConfigAccessAddress / DataLo / DataHi

use crate::invariant::{violated, Invariant};
use crate::register::RegisterLayout;

/// PCI device number of the first fabric node
pub const DF_FIRST_DEVICE: u8 = 0x18;

/// Maximum number of fabric nodes addressable on bus 0
pub const DF_MAX_NODES: u8 = 8;

/// Number of PCI functions exposed by a fabric node
pub const DF_FUNC_COUNT: u8 = 8;

/// Instance number placed in the address-select value for broadcasts
pub const DF_BCAST_INSTANCE: u8 = 0;

/// Data fabric major revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DfRev {
    /// Zen 1 (Naples)
    V2,
    /// Zen 2 (Rome)
    V3,
    /// Zen 3 (Milan)
    V3p5,
    /// Zen 4 (Genoa)
    V4,
    /// Zen 5 (Turin), DFv4 with v4.2 extensions
    V4D2,
    /// Discovery did not recognize the revision
    Unknown,
}

impl DfRev {
    pub fn name(&self) -> &'static str {
        match self {
            DfRev::V2 => "DFv2",
            DfRev::V3 => "DFv3",
            DfRev::V3p5 => "DFv3.5",
            DfRev::V4 => "DFv4",
            DfRev::V4D2 => "DFv4D2",
            DfRev::Unknown => "unknown",
        }
    }

    pub const fn bit(self) -> u8 {
        match self {
            DfRev::V2 => 1 << 0,
            DfRev::V3 => 1 << 1,
            DfRev::V3p5 => 1 << 2,
            DfRev::V4 => 1 << 3,
            DfRev::V4D2 => 1 << 4,
            DfRev::Unknown => 0,
        }
    }

    /// Highest register offset the revision's FICAA index field can carry,
    /// `None` for an unrecognized revision.
    pub const fn indirect_reg_limit(self) -> Option<u16> {
        match self {
            DfRev::V2 | DfRev::V3 | DfRev::V3p5 => Some(0x7fc),
            DfRev::V4 | DfRev::V4D2 => Some(0xffc),
            DfRev::Unknown => None,
        }
    }
}

/// Set of fabric revisions a register definition is valid on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DfRevSet(u8);

impl DfRevSet {
    pub const V2_3: DfRevSet = DfRevSet(DfRev::V2.bit() | DfRev::V3.bit() | DfRev::V3p5.bit());
    pub const V4: DfRevSet = DfRevSet(DfRev::V4.bit() | DfRev::V4D2.bit());
    pub const ALL: DfRevSet = DfRevSet(Self::V2_3.0 | Self::V4.0);

    pub const fn only(rev: DfRev) -> DfRevSet {
        DfRevSet(rev.bit())
    }

    pub const fn contains(self, rev: DfRev) -> bool {
        rev.bit() != 0 && self.0 & rev.bit() != 0
    }
}

/// A data fabric register: revisions it exists on, PCI function, byte offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DfRegDef {
    pub revs: DfRevSet,
    pub func: u8,
    pub reg: u16,
}

impl DfRegDef {
    pub const fn new(revs: DfRevSet, func: u8, reg: u16) -> Self {
        Self { revs, func, reg }
    }

    /// Assert the definition is usable on a fabric of revision `rev`.
    #[track_caller]
    pub fn check_for(&self, rev: DfRev) {
        crate::invariant!(
            self.revs.contains(rev),
            Invariant::FabricRevision,
            "DF register F{}x{:03x} is not defined on {}",
            self.func,
            self.reg,
            rev.name()
        );
        self.check_shape();
    }

    /// Function in range and offset dword aligned, independent of revision.
    #[track_caller]
    pub fn check_shape(&self) {
        crate::invariant!(
            self.func < DF_FUNC_COUNT,
            Invariant::OutOfRange,
            "DF function {} >= {}",
            self.func,
            DF_FUNC_COUNT
        );
        crate::invariant!(
            self.reg % 4 == 0,
            Invariant::Misaligned,
            "DF register offset 0x{:x} is not 4-byte aligned",
            self.reg
        );
    }
}

/// Fabric block instance count
pub const DF_FBICNT: DfRegDef = DfRegDef::new(DfRevSet::ALL, 0, 0x40);
/// Fabric block instance information 0 (per instance)
pub const DF_FBIINFO0: DfRegDef = DfRegDef::new(DfRevSet::ALL, 0, 0x44);
/// Configuration address control (PCI bus number of this node)
pub const DF_CFG_ADDR_CTL_V2: DfRegDef = DfRegDef::new(DfRevSet::V2_3, 0, 0x84);
pub const DF_CFG_ADDR_CTL_V4: DfRegDef = DfRegDef::new(DfRevSet::V4, 0, 0xc04);
/// System configuration (node id, die type)
pub const DF_SYSCFG_V2: DfRegDef = DfRegDef::new(DfRevSet::V2_3, 1, 0x200);
pub const DF_SYSCFG_V4: DfRegDef = DfRegDef::new(DfRevSet::V4, 4, 0x180);

/// Indirect access address-select register
pub const DF_FICAA_V2: DfRegDef = DfRegDef::new(DfRevSet::V2_3, 4, 0x5c);
pub const DF_FICAA_V4: DfRegDef = DfRegDef::new(DfRevSet::V4, 4, 0x8c);
/// Indirect access data register, low 32 bits
pub const DF_FICAD_LO_V2: DfRegDef = DfRegDef::new(DfRevSet::V2_3, 4, 0x98);
pub const DF_FICAD_LO_V4: DfRegDef = DfRegDef::new(DfRevSet::V4, 4, 0xb8);

/// Register offsets are stored in FICAA as a dword index
pub const DF_FICAA_REG_SHIFT: u32 = 2;

/// Which register pair a fabric revision uses for indirect access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxLayout {
    pub ficaa: DfRegDef,
    pub ficad: DfRegDef,
}

const MAILBOX_V2: MailboxLayout = MailboxLayout {
    ficaa: DF_FICAA_V2,
    ficad: DF_FICAD_LO_V2,
};

const MAILBOX_V4: MailboxLayout = MailboxLayout {
    ficaa: DF_FICAA_V4,
    ficad: DF_FICAD_LO_V4,
};

/// Mailbox register pair for `rev`. Fatal for an unrecognized revision.
#[track_caller]
pub fn mailbox_layout(rev: DfRev) -> &'static MailboxLayout {
    match rev {
        DfRev::V2 | DfRev::V3 | DfRev::V3p5 => &MAILBOX_V2,
        DfRev::V4 | DfRev::V4D2 => &MAILBOX_V4,
        DfRev::Unknown => violated(
            Invariant::FabricRevision,
            format_args!("no indirect access mailbox for fabric revision {}", rev.name()),
        ),
    }
}

/// FICAA layout for DFv2 through DFv3.5
///
/// | Bits  | Field             |
/// |-------|-------------------|
/// | 0     | target inst valid |
/// | 10:2  | register dword    |
/// | 13:11 | function          |
/// | 14    | 64-bit transfer   |
/// | 23:16 | instance          |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FicaaV2 {
    pub target_instance: bool,
    pub reg_index: u16,
    pub func: u8,
    pub xfer_64: bool,
    pub instance: u8,
}

impl RegisterLayout for FicaaV2 {
    fn to_raw(&self) -> u32 {
        (self.target_instance as u32)
            | ((self.reg_index as u32 & 0x1ff) << 2)
            | ((self.func as u32 & 0x7) << 11)
            | ((self.xfer_64 as u32) << 14)
            | ((self.instance as u32) << 16)
    }

    fn from_raw(value: u32) -> Self {
        Self {
            target_instance: value & 1 != 0,
            reg_index: ((value >> 2) & 0x1ff) as u16,
            func: ((value >> 11) & 0x7) as u8,
            xfer_64: value & (1 << 14) != 0,
            instance: ((value >> 16) & 0xff) as u8,
        }
    }

    fn validate(&self) -> Result<(), &'static str> {
        if self.reg_index > 0x1ff {
            return Err("Register index must be <= 0x1ff (9 bits)");
        }
        if self.func > 7 {
            return Err("Function must be <= 7 (3 bits)");
        }
        Ok(())
    }
}

/// FICAA layout for DFv4 and later: the register dword index widens to
/// bits 10:1, everything else stays in place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FicaaV4 {
    pub target_instance: bool,
    pub reg_index: u16,
    pub func: u8,
    pub xfer_64: bool,
    pub instance: u8,
}

impl RegisterLayout for FicaaV4 {
    fn to_raw(&self) -> u32 {
        (self.target_instance as u32)
            | ((self.reg_index as u32 & 0x3ff) << 1)
            | ((self.func as u32 & 0x7) << 11)
            | ((self.xfer_64 as u32) << 14)
            | ((self.instance as u32) << 16)
    }

    fn from_raw(value: u32) -> Self {
        Self {
            target_instance: value & 1 != 0,
            reg_index: ((value >> 1) & 0x3ff) as u16,
            func: ((value >> 11) & 0x7) as u8,
            xfer_64: value & (1 << 14) != 0,
            instance: ((value >> 16) & 0xff) as u8,
        }
    }

    fn validate(&self) -> Result<(), &'static str> {
        if self.reg_index > 0x3ff {
            return Err("Register index must be <= 0x3ff (10 bits)");
        }
        if self.func > 7 {
            return Err("Function must be <= 7 (3 bits)");
        }
        Ok(())
    }
}

/// Target of one indirect access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DfTarget {
    /// A specific component instance
    Instance(u8),
    /// All instances (reads return the broadcast view)
    Broadcast,
}

/// Build the 32-bit address-select value for `def` on a fabric of revision `rev`.
///
/// Only 32-bit transfers are issued, so the 64-bit flag is always clear.
/// Fatal if the revision is unknown, the definition is absent on it, or the
/// register offset does not fit the revision's index field.
#[track_caller]
pub fn ficaa_value(rev: DfRev, def: &DfRegDef, target: DfTarget) -> u32 {
    def.check_for(rev);

    let (target_instance, instance) = match target {
        DfTarget::Instance(inst) => (true, inst),
        DfTarget::Broadcast => (false, DF_BCAST_INSTANCE),
    };
    let reg_index = def.reg >> DF_FICAA_REG_SHIFT;

    let checked = |res: Result<(), &'static str>, raw: u32| -> u32 {
        if let Err(e) = res {
            violated(
                Invariant::OutOfRange,
                format_args!("DF register F{}x{:03x} on {}: {}", def.func, def.reg, rev.name(), e),
            );
        }
        raw
    };

    match rev {
        DfRev::V2 | DfRev::V3 | DfRev::V3p5 => {
            let v = FicaaV2 {
                target_instance,
                reg_index,
                func: def.func,
                xfer_64: false,
                instance,
            };
            checked(v.validate(), v.to_raw())
        }
        DfRev::V4 | DfRev::V4D2 => {
            let v = FicaaV4 {
                target_instance,
                reg_index,
                func: def.func,
                xfer_64: false,
                instance,
            };
            checked(v.validate(), v.to_raw())
        }
        DfRev::Unknown => violated(
            Invariant::FabricRevision,
            format_args!("cannot encode FICAA for fabric revision {}", rev.name()),
        ),
    }
}

/// Decode an address-select value back into (target, function, register offset).
///
/// Used by software models of the fabric; fatal for an unknown revision.
#[track_caller]
pub fn decode_ficaa(rev: DfRev, raw: u32) -> (DfTarget, u8, u16) {
    let (target_instance, func, reg_index, instance) = match rev {
        DfRev::V2 | DfRev::V3 | DfRev::V3p5 => {
            let v = FicaaV2::from_raw(raw);
            (v.target_instance, v.func, v.reg_index, v.instance)
        }
        DfRev::V4 | DfRev::V4D2 => {
            let v = FicaaV4::from_raw(raw);
            (v.target_instance, v.func, v.reg_index, v.instance)
        }
        DfRev::Unknown => violated(
            Invariant::FabricRevision,
            format_args!("cannot decode FICAA for fabric revision {}", rev.name()),
        ),
    };
    let target = if target_instance {
        DfTarget::Instance(instance)
    } else {
        DfTarget::Broadcast
    };
    (target, func, reg_index << DF_FICAA_REG_SHIFT)
}
