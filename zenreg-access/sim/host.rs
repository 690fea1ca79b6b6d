use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use zenreg_raw::invariant::{violated, Invariant};
use zenreg_raw::MmioPhys;

use super::vm::VaSpace;
use crate::mmio::{HostFramework, HostHandle, PAGE_SIZE};

struct HostMapping {
    region: usize,
    pages: usize,
    va: usize,
    len: usize,
}

#[derive(Default)]
struct HostState {
    space: VaSpace,
    next: u64,
    handles: HashMap<HostHandle, HostMapping>,
}

/// Driver framework that owns its mappings and performs accesses itself
#[derive(Default)]
pub struct SimHost {
    state: Mutex<HostState>,
    accesses: AtomicU64,
}

impl SimHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mappings handed out and not yet freed
    pub fn live_handles(&self) -> usize {
        self.state.lock().handles.len()
    }

    /// get/put calls served so far
    pub fn accesses(&self) -> u64 {
        self.accesses.load(Ordering::Relaxed)
    }

    /// Check `va..va + bytes` against the mapping behind `handle`.
    #[track_caller]
    fn check(&self, handle: HostHandle, va: usize, bytes: usize) {
        let state = self.state.lock();
        let Some(mapping) = state.handles.get(&handle) else {
            violated(
                Invariant::Provenance,
                format_args!("host access through unknown handle {}", handle.0),
            );
        };
        zenreg_raw::invariant!(
            va >= mapping.va && va + bytes <= mapping.va + mapping.len,
            Invariant::OutOfRange,
            "host access at 0x{:x} outside handle {} mapping 0x{:x}+0x{:x}",
            va,
            handle.0,
            mapping.va,
            mapping.len
        );
        self.accesses.fetch_add(1, Ordering::Relaxed);
    }
}

macro_rules! host_accessors {
    ($($get:ident, $put:ident: $ty:ty;)+) => {
        $(
            fn $get(&self, handle: HostHandle, va: usize) -> $ty {
                self.check(handle, va, std::mem::size_of::<$ty>());
                // SAFETY: `check` confirmed the range lies in a live mapping
                unsafe { (va as *const $ty).read_volatile() }
            }

            fn $put(&self, handle: HostHandle, va: usize, value: $ty) {
                self.check(handle, va, std::mem::size_of::<$ty>());
                // SAFETY: as above
                unsafe { (va as *mut $ty).write_volatile(value) }
            }
        )+
    };
}

impl HostFramework for SimHost {
    fn regs_map(&self, phys: MmioPhys) -> (usize, HostHandle) {
        let offset = (phys.base % PAGE_SIZE as u64) as usize;
        let len = match usize::try_from(phys.len) {
            Ok(len) if len > 0 => len,
            _ => violated(
                Invariant::MappingState,
                format_args!("host cannot map 0x{:x} bytes", phys.len),
            ),
        };
        let pages = (offset + len).div_ceil(PAGE_SIZE);

        let mut state = self.state.lock();
        let region = state.space.alloc(pages);
        state.next += 1;
        let handle = HostHandle(state.next);
        let va = region + offset;
        state.handles.insert(
            handle,
            HostMapping {
                region,
                pages,
                va,
                len,
            },
        );
        (va, handle)
    }

    host_accessors! {
        get8, put8: u8;
        get16, put16: u16;
        get32, put32: u32;
        get64, put64: u64;
    }

    fn regs_free(&self, handle: HostHandle) {
        let mut state = self.state.lock();
        match state.handles.remove(&handle) {
            Some(mapping) => state.space.free(mapping.region, mapping.pages),
            None => violated(
                Invariant::Provenance,
                format_args!("host free of unknown handle {}", handle.0),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_access_free() {
        let host = SimHost::new();
        let (va, handle) = host.regs_map(MmioPhys::new(0xfedc_2004, 0x100));
        assert_eq!(va % PAGE_SIZE, 4);

        host.put32(handle, va + 0x10, 0xdead_beef);
        assert_eq!(host.get32(handle, va + 0x10), 0xdead_beef);
        assert_eq!(host.get8(handle, va + 0x10), 0xef);
        assert_eq!(host.accesses(), 3);

        host.regs_free(handle);
        assert_eq!(host.live_handles(), 0);
    }

    #[test]
    #[should_panic(expected = "invariant violated [out-of-range]")]
    fn test_access_past_mapping_is_fatal() {
        let host = SimHost::new();
        let (va, handle) = host.regs_map(MmioPhys::new(0x1000, 0x10));
        host.get32(handle, va + 0x10);
    }

    #[test]
    #[should_panic(expected = "invariant violated [provenance]")]
    fn test_double_free_is_fatal() {
        let host = SimHost::new();
        let (_, handle) = host.regs_map(MmioPhys::new(0x1000, 0x10));
        host.regs_free(handle);
        host.regs_free(handle);
    }
}
