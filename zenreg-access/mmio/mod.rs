//! MMIO window mapping and width-dispatching register access
//!
//! A physical register block becomes usable through one of three paths,
//! recorded in the block as its [`Provenance`]:
//!
//! | Provenance      | Obtained by                 | Released by                |
//! |-----------------|-----------------------------|----------------------------|
//! | `EarlyBoot`     | `map` before `enter_runtime`| `unmap` (leaked if late)   |
//! | `DeviceArena`   | `map` after `enter_runtime` | `unmap`                    |
//! | `HostFramework` | `host_map`                  | `host_unmap` only          |
//!
//! Early windows are built a page at a time through an [`EarlyVm`]; runtime
//! windows come from a [`DeviceArena`] in one piece. `unmap` follows the
//! provenance recorded at map time, never the current phase.

mod access;
mod block;
mod devmem;
mod mapper;

pub use access::{host_reg_read, host_reg_write, reg_read, reg_write};
pub use block::{MmioReg, MmioRegisterBlock};
pub use devmem::{DevMemArena, NoEarlyVm};
pub use mapper::{LeakedWindow, MmioMapper};

use zenreg_raw::MmioPhys;

pub const PAGE_SIZE: usize = 4096;

zenreg_raw::named_enum! {
    /// How a register block was mapped
    pub enum Provenance {
        EarlyBoot => "early_boot",
        DeviceArena => "device_arena",
        HostFramework => "host_framework",
    }
}

/// Which VM regime `map` uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BootPhase {
    EarlyBoot = 0,
    Runtime = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// Uncached
    Uncached,
    /// Uncached with strict ordering of every access
    StrictOrder,
}

/// Page attributes requested for a register window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapAttrs {
    pub cache: CacheMode,
    pub writable: bool,
}

impl MapAttrs {
    /// Early-boot page table entries: caching disabled, writable
    pub const EARLY: MapAttrs = MapAttrs {
        cache: CacheMode::Uncached,
        writable: true,
    };

    /// Runtime device mappings
    pub const DEVICE: MapAttrs = MapAttrs {
        cache: CacheMode::StrictOrder,
        writable: true,
    };
}

/// Early-boot VA allocator and page table writer
///
/// # Safety
///
/// `alloc_va` must return page-aligned, currently unused virtual addresses.
/// After `map_page(va, ..)` the page at `va` must stay valid for volatile
/// reads and writes until `unmap_page(va)`.
pub unsafe trait EarlyVm {
    fn alloc_va(&self, pages: usize) -> usize;
    fn map_page(&self, va: usize, pa: u64, attrs: MapAttrs);
    fn unmap_page(&self, va: usize);
    fn free_va(&self, va: usize, pages: usize);
}

/// Runtime device address-space allocator
///
/// # Safety
///
/// `alloc` must return a page-aligned, currently unused range. After
/// `load(va, pa, bytes, ..)` the range must stay valid for volatile reads and
/// writes until `unload(va, bytes)`.
pub unsafe trait DeviceArena {
    fn alloc(&self, bytes: usize) -> usize;
    fn load(&self, va: usize, pa: u64, bytes: usize, attrs: MapAttrs);
    fn unload(&self, va: usize, bytes: usize);
    fn free(&self, va: usize, bytes: usize);
}

/// Opaque token the host framework hands out for one mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostHandle(pub u64);

/// A surrounding driver framework that maps registers itself and performs
/// every access through its own calls
pub trait HostFramework {
    fn regs_map(&self, phys: MmioPhys) -> (usize, HostHandle);
    fn get8(&self, handle: HostHandle, va: usize) -> u8;
    fn get16(&self, handle: HostHandle, va: usize) -> u16;
    fn get32(&self, handle: HostHandle, va: usize) -> u32;
    fn get64(&self, handle: HostHandle, va: usize) -> u64;
    fn put8(&self, handle: HostHandle, va: usize, value: u8);
    fn put16(&self, handle: HostHandle, va: usize, value: u16);
    fn put32(&self, handle: HostHandle, va: usize, value: u32);
    fn put64(&self, handle: HostHandle, va: usize, value: u64);
    fn regs_free(&self, handle: HostHandle);
}
