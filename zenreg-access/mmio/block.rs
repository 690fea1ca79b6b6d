use zenreg_raw::invariant::Invariant;
use zenreg_raw::{MmioPhys, RegDef, RegWidth, RegisterUnit};

use super::{HostHandle, Provenance};

/// A mapped register window
///
/// Only the mapper creates these, and releasing one consumes it. Register
/// handles borrow the block, so none can outlive the mapping.
#[derive(Debug)]
pub struct MmioRegisterBlock {
    unit: RegisterUnit,
    va: usize,
    phys: MmioPhys,
    provenance: Provenance,
    /// Page-aligned start and length of the underlying mapping
    map_va: usize,
    map_len: usize,
    host: Option<HostHandle>,
}

impl MmioRegisterBlock {
    pub(crate) fn new(
        unit: RegisterUnit,
        phys: MmioPhys,
        provenance: Provenance,
        map_va: usize,
        map_len: usize,
        page_offset: usize,
        host: Option<HostHandle>,
    ) -> Self {
        Self {
            unit,
            va: map_va + page_offset,
            phys,
            provenance,
            map_va,
            map_len,
            host,
        }
    }

    pub fn unit(&self) -> RegisterUnit {
        self.unit
    }

    /// Virtual address of `phys.base`
    pub fn va(&self) -> usize {
        self.va
    }

    pub fn phys(&self) -> MmioPhys {
        self.phys
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    pub(crate) fn mapping(&self) -> (usize, usize) {
        (self.map_va, self.map_len)
    }

    pub(crate) fn host_handle(&self) -> Option<HostHandle> {
        self.host
    }

    /// Resolve `def` at `instance` inside this window.
    ///
    /// Fatal if the descriptor is for another unit, the instance is out of
    /// range, the width is invalid, the register runs past the end of the
    /// window, or its address is not naturally aligned.
    #[track_caller]
    pub fn reg(&self, def: &RegDef, instance: u32) -> MmioReg<'_> {
        def.expect_unit(self.unit);
        let offset = def.offset_of(instance);
        let width = def.width();

        zenreg_raw::invariant!(
            offset as u64 + width.bytes() as u64 <= self.phys.len,
            Invariant::OutOfRange,
            "{} register 0x{:x} (instance {}) runs past the 0x{:x}-byte window",
            self.unit,
            offset,
            instance,
            self.phys.len
        );

        let addr = self.va + offset as usize;
        zenreg_raw::invariant!(
            addr % width.bytes() as usize == 0,
            Invariant::Misaligned,
            "{} register at 0x{:x} is not {}-byte aligned",
            self.unit,
            addr,
            width.bytes()
        );

        MmioReg {
            block: self,
            offset,
            addr,
            width,
        }
    }
}

/// A register inside a mapped block
#[derive(Debug, Clone, Copy)]
pub struct MmioReg<'a> {
    block: &'a MmioRegisterBlock,
    offset: u32,
    addr: usize,
    width: RegWidth,
}

impl<'a> MmioReg<'a> {
    pub fn block(&self) -> &'a MmioRegisterBlock {
        self.block
    }

    /// Offset from the start of the block
    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn addr(&self) -> usize {
        self.addr
    }

    pub fn width(&self) -> RegWidth {
        self.width
    }

    pub fn unit(&self) -> RegisterUnit {
        self.block.unit
    }

    pub fn provenance(&self) -> Provenance {
        self.block.provenance
    }

    /// Physical address of this register
    pub fn phys_addr(&self) -> u64 {
        self.block.phys.base + self.offset as u64
    }
}
