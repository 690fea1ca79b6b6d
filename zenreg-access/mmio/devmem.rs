//! Userspace runtime mappings over `/dev/mem`
//!
//! VA is reserved with an inaccessible anonymous mapping, `load` replaces it
//! in place with a shared mapping of `/dev/mem` at the physical offset, and
//! `unload` puts the reservation back. Requires CAP_SYS_RAWIO and a kernel
//! that allows the range (`CONFIG_STRICT_DEVMEM` blocks most of RAM but not
//! MMIO apertures).

use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::c_void;
use std::fs::{File, OpenOptions};
use std::num::NonZeroUsize;
use std::os::fd::BorrowedFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use zenreg_raw::invariant::{violated, Invariant};

use super::{DeviceArena, EarlyVm, MapAttrs};
use crate::error::{Result, ZenregError};

pub const DEV_MEM: &str = "/dev/mem";

pub struct DevMemArena {
    file: File,
    /// Reserved ranges: va -> bytes
    reserved: Mutex<HashMap<usize, usize>>,
}

impl DevMemArena {
    pub fn open() -> Result<Self> {
        Self::open_path(Path::new(DEV_MEM))
    }

    pub fn open_path(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(path)
            .map_err(|e| ZenregError::MapError(format!("Failed to open {}: {e}", path.display())))?;
        tracing::info!("Opened {} for register windows", path.display());
        Ok(Self {
            file,
            reserved: Mutex::new(HashMap::new()),
        })
    }

    #[track_caller]
    fn reserve_at(&self, va: Option<NonZeroUsize>, bytes: usize) -> usize {
        let mut flags = MapFlags::MAP_PRIVATE | MapFlags::MAP_ANONYMOUS | MapFlags::MAP_NORESERVE;
        if va.is_some() {
            flags |= MapFlags::MAP_FIXED;
        }
        // SAFETY: an anonymous PROT_NONE mapping either at a fresh address or
        // over a range this arena reserved itself.
        let res = unsafe {
            mmap(
                va,
                nonzero(bytes),
                ProtFlags::PROT_NONE,
                flags,
                None::<BorrowedFd<'_>>,
                0,
            )
        };
        match res {
            Ok(ptr) => ptr as usize,
            Err(e) => violated(
                Invariant::Access,
                format_args!("reserving 0x{bytes:x} bytes of VA failed: {e}"),
            ),
        }
    }
}

#[track_caller]
fn nonzero(bytes: usize) -> NonZeroUsize {
    match NonZeroUsize::new(bytes) {
        Some(n) => n,
        None => violated(Invariant::MappingState, format_args!("zero-length mapping")),
    }
}

#[track_caller]
fn expect_reserved(reserved: &HashMap<usize, usize>, va: usize, bytes: usize) {
    zenreg_raw::invariant!(
        reserved.get(&va) == Some(&bytes),
        Invariant::MappingState,
        "0x{:x}+0x{:x} is not a range this arena reserved",
        va,
        bytes
    );
}

// SAFETY: ranges come from mmap and stay mapped to /dev/mem between load
// and unload.
unsafe impl DeviceArena for DevMemArena {
    fn alloc(&self, bytes: usize) -> usize {
        let va = self.reserve_at(None, bytes);
        self.reserved.lock().insert(va, bytes);
        va
    }

    fn load(&self, va: usize, pa: u64, bytes: usize, attrs: MapAttrs) {
        expect_reserved(&self.reserved.lock(), va, bytes);
        let offset = match libc::off_t::try_from(pa) {
            Ok(offset) => offset,
            Err(_) => violated(
                Invariant::MappingState,
                format_args!("physical address 0x{pa:x} does not fit off_t"),
            ),
        };
        let mut prot = ProtFlags::PROT_READ;
        if attrs.writable {
            prot |= ProtFlags::PROT_WRITE;
        }
        // SAFETY: replaces this arena's own reservation at `va`. O_SYNC on
        // the file makes the kernel map the range uncached.
        let res = unsafe {
            mmap(
                NonZeroUsize::new(va),
                nonzero(bytes),
                prot,
                MapFlags::MAP_SHARED | MapFlags::MAP_FIXED,
                Some(&self.file),
                offset,
            )
        };
        if let Err(e) = res {
            violated(
                Invariant::Access,
                format_args!("mapping /dev/mem 0x{pa:x}+0x{bytes:x} failed: {e}"),
            );
        }
    }

    fn unload(&self, va: usize, bytes: usize) {
        expect_reserved(&self.reserved.lock(), va, bytes);
        self.reserve_at(NonZeroUsize::new(va), bytes);
    }

    fn free(&self, va: usize, bytes: usize) {
        let mut reserved = self.reserved.lock();
        expect_reserved(&reserved, va, bytes);
        // SAFETY: the range is this arena's reservation and nothing maps it.
        if let Err(e) = unsafe { munmap(va as *mut c_void, bytes) } {
            violated(
                Invariant::Access,
                format_args!("munmap 0x{va:x}+0x{bytes:x} failed: {e}"),
            );
        }
        reserved.remove(&va);
    }
}

/// Stand-in early VM for processes that start in the runtime phase
pub struct NoEarlyVm;

#[track_caller]
fn no_early_vm() -> ! {
    violated(
        Invariant::MappingState,
        format_args!("no early-boot VM in this process"),
    )
}

// SAFETY: never hands out an address.
unsafe impl EarlyVm for NoEarlyVm {
    fn alloc_va(&self, _pages: usize) -> usize {
        no_early_vm()
    }

    fn map_page(&self, _va: usize, _pa: u64, _attrs: MapAttrs) {
        no_early_vm()
    }

    fn unmap_page(&self, _va: usize) {
        no_early_vm()
    }

    fn free_va(&self, _va: usize, _pages: usize) {
        no_early_vm()
    }
}

impl<A: DeviceArena> super::MmioMapper<NoEarlyVm, A> {
    /// A mapper that is already in the runtime phase
    pub fn runtime_only(arena: A) -> Self {
        let mapper = Self::new(NoEarlyVm, arena);
        mapper.enter_runtime();
        mapper
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmio::PAGE_SIZE;

    #[test]
    fn test_open_missing_device_fails() {
        assert!(matches!(
            DevMemArena::open_path(Path::new("/nonexistent/mem")),
            Err(ZenregError::MapError(_))
        ));
    }

    #[test]
    #[should_panic(expected = "invariant violated [mapping-state]")]
    fn test_no_early_vm_is_fatal() {
        NoEarlyVm.alloc_va(1);
    }

    #[test]
    fn test_reserve_and_free_round_trip() {
        // Any readable file will do; alloc/free never touch it.
        let arena = DevMemArena {
            file: File::open("/proc/self/stat").unwrap(),
            reserved: Mutex::new(HashMap::new()),
        };
        let va = arena.alloc(2 * PAGE_SIZE);
        assert_eq!(va % PAGE_SIZE, 0);
        arena.unload(va, 2 * PAGE_SIZE);
        arena.free(va, 2 * PAGE_SIZE);
        assert!(arena.reserved.lock().is_empty());
    }
}
