//! Page-backed models of the two mapping services
//!
//! Both hand out real, zeroed, page-aligned host memory, so registers
//! mapped through them can be read and written with volatile accesses.
//! Every call is checked against the model's own records and a call the
//! real service would reject is fatal.

use parking_lot::Mutex;
use std::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};
use std::collections::BTreeMap;

use zenreg_raw::invariant::{violated, Invariant};

use crate::mmio::{DeviceArena, EarlyVm, MapAttrs, PAGE_SIZE};

struct Region {
    layout: Layout,
    pages: usize,
}

/// Page-aligned host allocations keyed by start address
#[derive(Default)]
pub(crate) struct VaSpace {
    regions: BTreeMap<usize, Region>,
}

impl VaSpace {
    #[track_caller]
    pub(crate) fn alloc(&mut self, pages: usize) -> usize {
        zenreg_raw::invariant!(pages > 0, Invariant::MappingState, "allocation of zero pages");
        let layout = match pages
            .checked_mul(PAGE_SIZE)
            .and_then(|bytes| Layout::from_size_align(bytes, PAGE_SIZE).ok())
        {
            Some(layout) => layout,
            None => violated(
                Invariant::MappingState,
                format_args!("cannot lay out {pages} pages"),
            ),
        };
        // SAFETY: layout has a non-zero size
        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            handle_alloc_error(layout);
        }
        self.regions.insert(ptr as usize, Region { layout, pages });
        ptr as usize
    }

    #[track_caller]
    pub(crate) fn free(&mut self, va: usize, pages: usize) {
        match self.regions.get(&va) {
            Some(region) if region.pages == pages => {}
            Some(region) => violated(
                Invariant::MappingState,
                format_args!(
                    "free of 0x{va:x} with {pages} pages, allocated with {}",
                    region.pages
                ),
            ),
            None => violated(
                Invariant::MappingState,
                format_args!("free of 0x{va:x} which was never allocated"),
            ),
        }
        if let Some(region) = self.regions.remove(&va) {
            // SAFETY: allocated in `alloc` with this layout and not yet freed
            unsafe { dealloc(va as *mut u8, region.layout) };
        }
    }

    /// Whether `[va, va + bytes)` lies inside one allocation
    pub(crate) fn contains(&self, va: usize, bytes: usize) -> bool {
        self.regions
            .range(..=va)
            .next_back()
            .is_some_and(|(start, region)| va + bytes <= start + region.pages * PAGE_SIZE)
    }

    pub(crate) fn pages(&self) -> usize {
        self.regions.values().map(|r| r.pages).sum()
    }
}

impl Drop for VaSpace {
    fn drop(&mut self) {
        for (va, region) in std::mem::take(&mut self.regions) {
            // SAFETY: every region still in the map is a live allocation
            unsafe { dealloc(va as *mut u8, region.layout) };
        }
    }
}

#[derive(Default)]
struct EarlyState {
    space: VaSpace,
    /// va page -> (pa page, attrs)
    ptes: BTreeMap<usize, (u64, MapAttrs)>,
}

/// Early-boot VA allocator plus a page table
#[derive(Default)]
pub struct SimEarlyVm {
    state: Mutex<EarlyState>,
}

impl SimEarlyVm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pages of VA currently reserved
    pub fn allocated_pages(&self) -> usize {
        self.state.lock().space.pages()
    }

    /// Pages currently backed by a translation
    pub fn mapped_pages(&self) -> usize {
        self.state.lock().ptes.len()
    }

    /// Physical address `va` translates to, if mapped
    pub fn translate(&self, va: usize) -> Option<u64> {
        let page = va & !(PAGE_SIZE - 1);
        let state = self.state.lock();
        state
            .ptes
            .get(&page)
            .map(|(pa, _)| pa + (va - page) as u64)
    }

    pub fn attrs(&self, va: usize) -> Option<MapAttrs> {
        let page = va & !(PAGE_SIZE - 1);
        self.state.lock().ptes.get(&page).map(|(_, attrs)| *attrs)
    }
}

// SAFETY: VAs returned by alloc_va are live, page-aligned host allocations
// owned by this model until free_va.
unsafe impl EarlyVm for SimEarlyVm {
    fn alloc_va(&self, pages: usize) -> usize {
        self.state.lock().space.alloc(pages)
    }

    fn map_page(&self, va: usize, pa: u64, attrs: MapAttrs) {
        let mut state = self.state.lock();
        zenreg_raw::invariant!(
            va % PAGE_SIZE == 0 && pa % PAGE_SIZE as u64 == 0,
            Invariant::Misaligned,
            "map_page 0x{:x} -> 0x{:x} is not page aligned",
            va,
            pa
        );
        zenreg_raw::invariant!(
            state.space.contains(va, PAGE_SIZE),
            Invariant::MappingState,
            "map_page at 0x{:x} outside any VA allocation",
            va
        );
        if state.ptes.insert(va, (pa, attrs)).is_some() {
            violated(
                Invariant::MappingState,
                format_args!("map_page at 0x{va:x} which is already mapped"),
            );
        }
    }

    fn unmap_page(&self, va: usize) {
        if self.state.lock().ptes.remove(&va).is_none() {
            violated(
                Invariant::MappingState,
                format_args!("unmap_page at 0x{va:x} which is not mapped"),
            );
        }
    }

    fn free_va(&self, va: usize, pages: usize) {
        let mut state = self.state.lock();
        let end = va + pages * PAGE_SIZE;
        zenreg_raw::invariant!(
            state.ptes.range(va..end).next().is_none(),
            Invariant::MappingState,
            "free_va of 0x{:x} with pages still mapped",
            va
        );
        state.space.free(va, pages);
    }
}

#[derive(Default)]
struct ArenaState {
    space: VaSpace,
    /// va -> (pa, bytes, attrs)
    loads: BTreeMap<usize, (u64, usize, MapAttrs)>,
}

/// Runtime device-mapping arena
#[derive(Default)]
pub struct SimArena {
    state: Mutex<ArenaState>,
}

impl SimArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocated_bytes(&self) -> usize {
        self.state.lock().space.pages() * PAGE_SIZE
    }

    pub fn loaded_bytes(&self) -> usize {
        self.state.lock().loads.values().map(|(_, bytes, _)| bytes).sum()
    }

    pub fn translate(&self, va: usize) -> Option<u64> {
        let state = self.state.lock();
        let (start, (pa, bytes, _)) = state.loads.range(..=va).next_back()?;
        (va < start + bytes).then(|| pa + (va - start) as u64)
    }
}

// SAFETY: as for SimEarlyVm, allocations stay live until free.
unsafe impl DeviceArena for SimArena {
    fn alloc(&self, bytes: usize) -> usize {
        zenreg_raw::invariant!(
            bytes % PAGE_SIZE == 0,
            Invariant::Misaligned,
            "arena allocation of {} bytes is not whole pages",
            bytes
        );
        self.state.lock().space.alloc(bytes / PAGE_SIZE)
    }

    fn load(&self, va: usize, pa: u64, bytes: usize, attrs: MapAttrs) {
        let mut state = self.state.lock();
        zenreg_raw::invariant!(
            state.space.contains(va, bytes),
            Invariant::MappingState,
            "arena load at 0x{:x}+0x{:x} outside any allocation",
            va,
            bytes
        );
        if state.loads.insert(va, (pa, bytes, attrs)).is_some() {
            violated(
                Invariant::MappingState,
                format_args!("arena load at 0x{va:x} which is already loaded"),
            );
        }
    }

    fn unload(&self, va: usize, bytes: usize) {
        match self.state.lock().loads.remove(&va) {
            Some((_, loaded, _)) if loaded == bytes => {}
            other => violated(
                Invariant::MappingState,
                format_args!("arena unload of 0x{va:x}+0x{bytes:x} does not match {other:?}"),
            ),
        }
    }

    fn free(&self, va: usize, bytes: usize) {
        let mut state = self.state.lock();
        zenreg_raw::invariant!(
            !state.loads.contains_key(&va),
            Invariant::MappingState,
            "arena free of 0x{:x} while still loaded",
            va
        );
        state.space.free(va, bytes / PAGE_SIZE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_early_vm_translates_mapped_pages() {
        let vm = SimEarlyVm::new();
        let va = vm.alloc_va(2);
        vm.map_page(va, 0xfed8_0000, MapAttrs::EARLY);
        vm.map_page(va + PAGE_SIZE, 0xfed8_1000, MapAttrs::EARLY);

        assert_eq!(vm.translate(va + 0x10), Some(0xfed8_0010));
        assert_eq!(vm.translate(va + PAGE_SIZE + 4), Some(0xfed8_1004));
        assert_eq!(vm.attrs(va), Some(MapAttrs::EARLY));
        assert_eq!(vm.mapped_pages(), 2);

        vm.unmap_page(va);
        vm.unmap_page(va + PAGE_SIZE);
        vm.free_va(va, 2);
        assert_eq!(vm.allocated_pages(), 0);
    }

    #[test]
    #[should_panic(expected = "invariant violated [mapping-state]")]
    fn test_early_vm_double_map_is_fatal() {
        let vm = SimEarlyVm::new();
        let va = vm.alloc_va(1);
        vm.map_page(va, 0x1000, MapAttrs::EARLY);
        vm.map_page(va, 0x2000, MapAttrs::EARLY);
    }

    #[test]
    #[should_panic(expected = "invariant violated [mapping-state]")]
    fn test_early_vm_free_while_mapped_is_fatal() {
        let vm = SimEarlyVm::new();
        let va = vm.alloc_va(1);
        vm.map_page(va, 0x1000, MapAttrs::EARLY);
        vm.free_va(va, 1);
    }

    #[test]
    fn test_arena_accounting() {
        let arena = SimArena::new();
        let va = arena.alloc(3 * PAGE_SIZE);
        arena.load(va, 0x1_0000_0000, 3 * PAGE_SIZE, MapAttrs::DEVICE);
        assert_eq!(arena.loaded_bytes(), 3 * PAGE_SIZE);
        assert_eq!(arena.translate(va + 0x2004), Some(0x1_0000_2004));
        assert_eq!(arena.translate(va + 3 * PAGE_SIZE), None);

        arena.unload(va, 3 * PAGE_SIZE);
        arena.free(va, 3 * PAGE_SIZE);
        assert_eq!(arena.allocated_bytes(), 0);
    }

    #[test]
    #[should_panic(expected = "invariant violated [mapping-state]")]
    fn test_arena_unload_size_mismatch_is_fatal() {
        let arena = SimArena::new();
        let va = arena.alloc(2 * PAGE_SIZE);
        arena.load(va, 0x2000, 2 * PAGE_SIZE, MapAttrs::DEVICE);
        arena.unload(va, PAGE_SIZE);
    }
}
