//! Width-dispatching register access
//!
//! [`reg_read`]/[`reg_write`] do volatile loads and stores at the block's
//! virtual address and serve `EarlyBoot` and `DeviceArena` blocks.
//! [`host_reg_read`]/[`host_reg_write`] go through the host framework's own
//! get/put calls and serve only `HostFramework` blocks.

use zenreg_raw::invariant::Invariant;
use zenreg_raw::RegWidth;

use super::block::MmioReg;
use super::{HostFramework, HostHandle, Provenance};

#[track_caller]
fn expect_direct(reg: &MmioReg<'_>) {
    zenreg_raw::invariant!(
        reg.provenance() != Provenance::HostFramework,
        Invariant::Provenance,
        "{} register at 0x{:x} is host framework mapped; use host_reg_read/host_reg_write",
        reg.unit(),
        reg.addr()
    );
}

#[track_caller]
fn expect_host(reg: &MmioReg<'_>) -> HostHandle {
    match (reg.provenance(), reg.block().host_handle()) {
        (Provenance::HostFramework, Some(handle)) => handle,
        (provenance, _) => zenreg_raw::invariant::violated(
            Invariant::Provenance,
            format_args!(
                "{} register at 0x{:x} is {} mapped, not host framework",
                reg.unit(),
                reg.addr(),
                provenance
            ),
        ),
    }
}

#[track_caller]
fn expect_fits(reg: &MmioReg<'_>, value: u64) {
    zenreg_raw::invariant!(
        value <= reg.width().max_value(),
        Invariant::InvalidWidth,
        "value 0x{:x} does not fit {}-byte {} register at 0x{:x}",
        value,
        reg.width().bytes(),
        reg.unit(),
        reg.addr()
    );
}

/// Volatile read at the register's width, zero-extended.
#[track_caller]
pub fn reg_read(reg: &MmioReg<'_>) -> u64 {
    expect_direct(reg);
    let addr = reg.addr();
    // SAFETY: the block was mapped by an EarlyVm or DeviceArena, whose
    // contracts keep the window valid until unmap, and the borrow in `reg`
    // keeps the block alive. `MmioRegisterBlock::reg` checked bounds and
    // alignment.
    let value = unsafe {
        match reg.width() {
            RegWidth::W1 => (addr as *const u8).read_volatile() as u64,
            RegWidth::W2 => (addr as *const u16).read_volatile() as u64,
            RegWidth::W4 => (addr as *const u32).read_volatile() as u64,
            RegWidth::W8 => (addr as *const u64).read_volatile(),
        }
    };
    tracing::debug!(
        "MMIO read: {} +0x{:x} = 0x{:x}",
        reg.unit(),
        reg.offset(),
        value
    );
    value
}

/// Volatile write at the register's width. Fatal if `value` is wider than
/// the register.
#[track_caller]
pub fn reg_write(reg: &MmioReg<'_>, value: u64) {
    expect_direct(reg);
    expect_fits(reg, value);
    tracing::debug!(
        "MMIO write: {} +0x{:x} = 0x{:x}",
        reg.unit(),
        reg.offset(),
        value
    );
    let addr = reg.addr();
    // SAFETY: as in reg_read.
    unsafe {
        match reg.width() {
            RegWidth::W1 => (addr as *mut u8).write_volatile(value as u8),
            RegWidth::W2 => (addr as *mut u16).write_volatile(value as u16),
            RegWidth::W4 => (addr as *mut u32).write_volatile(value as u32),
            RegWidth::W8 => (addr as *mut u64).write_volatile(value),
        }
    }
}

/// Read through the host framework's accessor of the register's width.
#[track_caller]
pub fn host_reg_read(host: &dyn HostFramework, reg: &MmioReg<'_>) -> u64 {
    let handle = expect_host(reg);
    let addr = reg.addr();
    let value = match reg.width() {
        RegWidth::W1 => host.get8(handle, addr) as u64,
        RegWidth::W2 => host.get16(handle, addr) as u64,
        RegWidth::W4 => host.get32(handle, addr) as u64,
        RegWidth::W8 => host.get64(handle, addr),
    };
    tracing::debug!(
        "Host read: {} +0x{:x} = 0x{:x}",
        reg.unit(),
        reg.offset(),
        value
    );
    value
}

/// Write through the host framework's accessor of the register's width.
#[track_caller]
pub fn host_reg_write(host: &dyn HostFramework, reg: &MmioReg<'_>, value: u64) {
    let handle = expect_host(reg);
    expect_fits(reg, value);
    tracing::debug!(
        "Host write: {} +0x{:x} = 0x{:x}",
        reg.unit(),
        reg.offset(),
        value
    );
    let addr = reg.addr();
    match reg.width() {
        RegWidth::W1 => host.put8(handle, addr, value as u8),
        RegWidth::W2 => host.put16(handle, addr, value as u16),
        RegWidth::W4 => host.put32(handle, addr, value as u32),
        RegWidth::W8 => host.put64(handle, addr, value),
    }
}
