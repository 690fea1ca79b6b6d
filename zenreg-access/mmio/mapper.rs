use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use zenreg_raw::invariant::{violated, Invariant};
use zenreg_raw::{MmioPhys, RegisterUnit};

use super::block::MmioRegisterBlock;
use super::{BootPhase, DeviceArena, EarlyVm, HostFramework, MapAttrs, Provenance, PAGE_SIZE};
use crate::telemetry::AccessMetrics;

/// An early-boot window released after the runtime transition. Its pages
/// are still mapped and its VA still allocated; reclaiming them is left to
/// whoever owns the early allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeakedWindow {
    pub unit: RegisterUnit,
    pub va: usize,
    pub pages: usize,
    pub phys: MmioPhys,
}

/// Boot-phase-aware window mapper
pub struct MmioMapper<E, A> {
    phase: AtomicU8,
    early: E,
    arena: A,
    leaked: Mutex<Vec<LeakedWindow>>,
    metrics: Option<Arc<AccessMetrics>>,
}

/// Page-aligned cover of a physical window: (first page, offset of the
/// window in it, total bytes)
#[track_caller]
fn page_span(unit: RegisterUnit, phys: MmioPhys) -> (u64, usize, usize) {
    zenreg_raw::invariant!(
        phys.len > 0,
        Invariant::MappingState,
        "{} window at 0x{:x} has zero length",
        unit,
        phys.base
    );
    let end = match phys.base.checked_add(phys.len) {
        Some(end) => end,
        None => violated(
            Invariant::MappingState,
            format_args!(
                "{} window 0x{:x}+0x{:x} overflows the physical address space",
                unit, phys.base, phys.len
            ),
        ),
    };

    let page = PAGE_SIZE as u64;
    let start = phys.base & !(page - 1);
    let span = (end - start)
        .div_ceil(page)
        .checked_mul(page)
        .and_then(|span| usize::try_from(span).ok());
    match span {
        Some(span) => (start, (phys.base - start) as usize, span),
        None => violated(
            Invariant::MappingState,
            format_args!("{unit} window of 0x{:x} bytes cannot be mapped", phys.len),
        ),
    }
}

impl<E: EarlyVm, A: DeviceArena> MmioMapper<E, A> {
    /// A mapper starting in [`BootPhase::EarlyBoot`]
    pub fn new(early: E, arena: A) -> Self {
        Self {
            phase: AtomicU8::new(BootPhase::EarlyBoot as u8),
            early,
            arena,
            leaked: Mutex::new(Vec::new()),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<AccessMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn early(&self) -> &E {
        &self.early
    }

    pub fn arena(&self) -> &A {
        &self.arena
    }

    pub fn phase(&self) -> BootPhase {
        match self.phase.load(Ordering::Acquire) {
            0 => BootPhase::EarlyBoot,
            _ => BootPhase::Runtime,
        }
    }

    /// Switch to the runtime regime. Happens once; a second call is fatal.
    #[track_caller]
    pub fn enter_runtime(&self) {
        if self
            .phase
            .compare_exchange(
                BootPhase::EarlyBoot as u8,
                BootPhase::Runtime as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            violated(
                Invariant::MappingState,
                format_args!("boot phase already switched to runtime"),
            );
        }
        tracing::info!("MMIO mapper entering runtime phase");
    }

    /// Map `phys` for registers of `unit` using the current phase's regime.
    ///
    /// Must not race with [`MmioMapper::enter_runtime`].
    #[track_caller]
    pub fn map(&self, unit: RegisterUnit, phys: MmioPhys) -> MmioRegisterBlock {
        let (pa, page_offset, span) = page_span(unit, phys);
        let pages = span / PAGE_SIZE;

        let (va, provenance) = match self.phase() {
            BootPhase::EarlyBoot => {
                let va = self.early.alloc_va(pages);
                for page in 0..pages {
                    self.early.map_page(
                        va + page * PAGE_SIZE,
                        pa + (page * PAGE_SIZE) as u64,
                        MapAttrs::EARLY,
                    );
                }
                (va, Provenance::EarlyBoot)
            }
            BootPhase::Runtime => {
                let va = self.arena.alloc(span);
                self.arena.load(va, pa, span, MapAttrs::DEVICE);
                (va, Provenance::DeviceArena)
            }
        };

        tracing::debug!(
            "Mapped {} window 0x{:x}+0x{:x} at 0x{:x} ({}, {} pages)",
            unit,
            phys.base,
            phys.len,
            va + page_offset,
            provenance,
            pages
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_map(provenance, span);
        }

        MmioRegisterBlock::new(unit, phys, provenance, va, span, page_offset, None)
    }

    /// Release a block from [`MmioMapper::map`].
    ///
    /// Follows the block's recorded provenance. An early-boot block released
    /// after the runtime transition is left mapped and recorded in
    /// [`MmioMapper::leaked_windows`]. Host framework blocks are fatal here.
    #[track_caller]
    pub fn unmap(&self, block: MmioRegisterBlock) {
        let (va, span) = block.mapping();
        let pages = span / PAGE_SIZE;

        match block.provenance() {
            Provenance::HostFramework => violated(
                Invariant::Provenance,
                format_args!(
                    "{} block at 0x{:x} belongs to the host framework; release it with host_unmap",
                    block.unit(),
                    block.va()
                ),
            ),
            Provenance::EarlyBoot if self.phase() == BootPhase::Runtime => {
                tracing::warn!(
                    "Leaking early {} window at 0x{:x} ({} pages) after runtime transition",
                    block.unit(),
                    va,
                    pages
                );
                self.leaked.lock().push(LeakedWindow {
                    unit: block.unit(),
                    va,
                    pages,
                    phys: block.phys(),
                });
                if let Some(metrics) = &self.metrics {
                    metrics.record_leak(span);
                }
                return;
            }
            Provenance::EarlyBoot => {
                for page in 0..pages {
                    self.early.unmap_page(va + page * PAGE_SIZE);
                }
                self.early.free_va(va, pages);
            }
            Provenance::DeviceArena => {
                self.arena.unload(va, span);
                self.arena.free(va, span);
            }
        }

        tracing::debug!(
            "Unmapped {} window at 0x{:x} ({})",
            block.unit(),
            block.va(),
            block.provenance()
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_unmap(block.provenance(), span);
        }
    }

    /// Map `phys` through the host framework's own mapping call.
    #[track_caller]
    pub fn host_map(
        &self,
        host: &dyn HostFramework,
        unit: RegisterUnit,
        phys: MmioPhys,
    ) -> MmioRegisterBlock {
        let (_, _, span) = page_span(unit, phys);
        let (va, handle) = host.regs_map(phys);
        tracing::debug!(
            "Host framework mapped {} window 0x{:x}+0x{:x} at 0x{:x}",
            unit,
            phys.base,
            phys.len,
            va
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_map(Provenance::HostFramework, span);
        }
        MmioRegisterBlock::new(unit, phys, Provenance::HostFramework, va, span, 0, Some(handle))
    }

    /// Release a block from [`MmioMapper::host_map`]. Fatal for any other
    /// provenance.
    #[track_caller]
    pub fn host_unmap(&self, host: &dyn HostFramework, block: MmioRegisterBlock) {
        let handle = match (block.provenance(), block.host_handle()) {
            (Provenance::HostFramework, Some(handle)) => handle,
            (provenance, _) => violated(
                Invariant::Provenance,
                format_args!(
                    "{} block at 0x{:x} is {}, not a host framework mapping",
                    block.unit(),
                    block.va(),
                    provenance
                ),
            ),
        };
        host.regs_free(handle);
        if let Some(metrics) = &self.metrics {
            metrics.record_unmap(Provenance::HostFramework, block.mapping().1);
        }
    }

    /// Early windows given up after the runtime transition
    pub fn leaked_windows(&self) -> Vec<LeakedWindow> {
        self.leaked.lock().clone()
    }

    pub fn leaked_bytes(&self) -> usize {
        self.leaked.lock().iter().map(|w| w.pages * PAGE_SIZE).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmio::{host_reg_read, host_reg_write, reg_read, reg_write};
    use crate::sim::{SimArena, SimEarlyVm, SimHost};
    use zenreg_raw::arch::fch::{self, i2c, IOMUX_PIN};

    fn mapper() -> MmioMapper<SimEarlyVm, SimArena> {
        MmioMapper::new(SimEarlyVm::new(), SimArena::new())
    }

    #[test]
    fn test_page_span_covers_unaligned_window() {
        let (pa, offset, span) = page_span(RegisterUnit::FchIomux, fch::iomux_mmio_block());
        assert_eq!(pa, 0xfed8_0000);
        assert_eq!(offset, 0xd00);
        assert_eq!(span, PAGE_SIZE);

        let (_, _, span) = page_span(RegisterUnit::Iohc, MmioPhys::new(0xfff, 2));
        assert_eq!(span, 2 * PAGE_SIZE);
    }

    #[test]
    fn test_early_map_and_unmap() {
        let mapper = mapper();
        let block = mapper.map(RegisterUnit::FchIomux, fch::iomux_mmio_block());
        assert_eq!(block.provenance(), Provenance::EarlyBoot);
        assert_eq!(block.va() % PAGE_SIZE, 0xd00);
        assert_eq!(mapper.early().mapped_pages(), 1);
        assert_eq!(mapper.early().translate(block.va()), Some(0xfed8_0d00));
        assert_eq!(mapper.early().attrs(block.va()), Some(MapAttrs::EARLY));

        mapper.unmap(block);
        assert_eq!(mapper.early().mapped_pages(), 0);
        assert_eq!(mapper.early().allocated_pages(), 0);
        assert!(mapper.leaked_windows().is_empty());
    }

    #[test]
    fn test_runtime_map_uses_arena() {
        let metrics = Arc::new(AccessMetrics::new().unwrap());
        let mapper = mapper().with_metrics(metrics.clone());
        mapper.enter_runtime();

        let block = mapper.map(RegisterUnit::FchI2c, fch::i2c_mmio_block(3));
        assert_eq!(block.provenance(), Provenance::DeviceArena);
        assert_eq!(mapper.arena().loaded_bytes(), PAGE_SIZE);
        assert_eq!(mapper.arena().translate(block.va()), Some(0xfedd_5000));
        assert_eq!(mapper.early().allocated_pages(), 0);
        assert_eq!(metrics.mapped_bytes(Provenance::DeviceArena), PAGE_SIZE as i64);

        mapper.unmap(block);
        assert_eq!(mapper.arena().allocated_bytes(), 0);
        assert_eq!(metrics.mapped_bytes(Provenance::DeviceArena), 0);
    }

    #[test]
    fn test_early_block_released_after_transition_is_leaked() {
        let metrics = Arc::new(AccessMetrics::new().unwrap());
        let mapper = mapper().with_metrics(metrics.clone());
        let early = mapper.map(RegisterUnit::FchI2c, fch::i2c_mmio_block(0));
        let va = early.va();

        mapper.enter_runtime();
        let runtime = mapper.map(RegisterUnit::FchI2c, fch::i2c_mmio_block(1));
        mapper.unmap(early);
        mapper.unmap(runtime);

        assert_eq!(
            mapper.leaked_windows(),
            vec![LeakedWindow {
                unit: RegisterUnit::FchI2c,
                va,
                pages: 1,
                phys: fch::i2c_mmio_block(0),
            }]
        );
        assert_eq!(mapper.leaked_bytes(), PAGE_SIZE);
        assert_eq!(mapper.early().mapped_pages(), 1);
        assert_eq!(metrics.leaked_bytes(), PAGE_SIZE as i64);
        assert_eq!(metrics.mapped_bytes(Provenance::EarlyBoot), 0);
        assert_eq!(mapper.arena().allocated_bytes(), 0);
    }

    #[test]
    fn test_register_round_trip_by_width() {
        let mapper = mapper();
        let i2c_block = mapper.map(RegisterUnit::FchI2c, fch::i2c_mmio_block(2));
        let enable = i2c_block.reg(&i2c::IC_ENABLE, 0);
        assert_eq!(enable.phys_addr(), 0xfedd_406c);

        reg_write(&enable, 1);
        assert_eq!(reg_read(&enable), 1);
        assert_eq!(reg_read(&i2c_block.reg(&i2c::IC_STATUS, 0)), 0);

        let iomux = mapper.map(RegisterUnit::FchIomux, fch::iomux_mmio_block());
        let pin = iomux.reg(&IOMUX_PIN, 0x93);
        reg_write(&pin, 0x2);
        assert_eq!(reg_read(&pin), 0x2);
        assert_eq!(reg_read(&iomux.reg(&IOMUX_PIN, 0x92)), 0);

        mapper.unmap(iomux);
        mapper.unmap(i2c_block);
    }

    #[test]
    fn test_host_framework_block() {
        let mapper = mapper();
        let host = SimHost::new();
        let block = mapper.host_map(&host, RegisterUnit::FchI2c, fch::i2c_mmio_block(5));
        assert_eq!(block.provenance(), Provenance::HostFramework);

        let tar = block.reg(&i2c::IC_TAR, 0);
        host_reg_write(&host, &tar, 0x55);
        assert_eq!(host_reg_read(&host, &tar), 0x55);
        assert_eq!(host.accesses(), 2);

        mapper.host_unmap(&host, block);
        assert_eq!(host.live_handles(), 0);
        assert_eq!(mapper.early().allocated_pages(), 0);
    }

    #[test]
    #[should_panic(expected = "invariant violated [mapping-state]")]
    fn test_second_runtime_transition_is_fatal() {
        let mapper = mapper();
        mapper.enter_runtime();
        mapper.enter_runtime();
    }

    #[test]
    #[should_panic(expected = "invariant violated [mapping-state]")]
    fn test_zero_length_window_is_fatal() {
        mapper().map(RegisterUnit::Iohc, MmioPhys::new(0x1000, 0));
    }

    #[test]
    #[should_panic(expected = "invariant violated [mapping-state]")]
    fn test_window_past_address_space_is_fatal() {
        mapper().map(RegisterUnit::Iohc, MmioPhys::new(u64::MAX - 0xff, 0x1000));
    }

    #[test]
    #[should_panic(expected = "invariant violated [provenance]")]
    fn test_unmap_of_host_block_is_fatal() {
        let mapper = mapper();
        let host = SimHost::new();
        let block = mapper.host_map(&host, RegisterUnit::FchI2c, fch::i2c_mmio_block(0));
        mapper.unmap(block);
    }

    #[test]
    #[should_panic(expected = "invariant violated [provenance]")]
    fn test_host_unmap_of_mapped_block_is_fatal() {
        let mapper = mapper();
        let host = SimHost::new();
        let block = mapper.map(RegisterUnit::FchI2c, fch::i2c_mmio_block(0));
        mapper.host_unmap(&host, block);
    }

    #[test]
    #[should_panic(expected = "invariant violated [provenance]")]
    fn test_direct_read_of_host_block_is_fatal() {
        let mapper = mapper();
        let host = SimHost::new();
        let block = mapper.host_map(&host, RegisterUnit::FchI2c, fch::i2c_mmio_block(0));
        reg_read(&block.reg(&i2c::IC_CON, 0));
    }

    #[test]
    #[should_panic(expected = "invariant violated [provenance]")]
    fn test_host_read_of_mapped_block_is_fatal() {
        let mapper = mapper();
        let host = SimHost::new();
        let block = mapper.map(RegisterUnit::FchI2c, fch::i2c_mmio_block(0));
        host_reg_read(&host, &block.reg(&i2c::IC_CON, 0));
    }

    #[test]
    #[should_panic(expected = "invariant violated [invalid-width]")]
    fn test_value_wider_than_register_is_fatal() {
        let mapper = mapper();
        let block = mapper.map(RegisterUnit::FchIomux, fch::iomux_mmio_block());
        reg_write(&block.reg(&IOMUX_PIN, 0), 0x100);
    }

    #[test]
    #[should_panic(expected = "invariant violated [out-of-range]")]
    fn test_register_past_window_is_fatal() {
        let mapper = mapper();
        let block = mapper.map(RegisterUnit::FchI2c, MmioPhys::new(0xfedc_2000, 0x70));
        block.reg(&i2c::IC_STATUS, 0);
    }

    #[test]
    #[should_panic(expected = "invariant violated [unit-mismatch]")]
    fn test_register_of_other_unit_is_fatal() {
        let mapper = mapper();
        let block = mapper.map(RegisterUnit::FchI2c, fch::i2c_mmio_block(0));
        block.reg(&IOMUX_PIN, 0);
    }
}
