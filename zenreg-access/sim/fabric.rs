use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use zenreg_raw::df::{
    decode_ficaa, mailbox_layout, DfTarget, MailboxLayout, DF_BCAST_INSTANCE, DF_CFG_ADDR_CTL_V2,
    DF_CFG_ADDR_CTL_V4, DF_FBICNT, DF_FIRST_DEVICE, DF_FUNC_COUNT, DF_MAX_NODES,
};
use zenreg_raw::{DfRev, Invariant};

use crate::common::pci::{ConfigSpace, PciAddress, AMD_VENDOR_ID};

#[derive(Default)]
struct FabricState {
    direct: HashMap<(PciAddress, u16), u32>,
    /// Latched address-select value per die
    ficaa: HashMap<u8, u32>,
    /// (die, function, register, instance) -> value
    indirect: HashMap<(u8, u8, u16, u8), u32>,
}

/// Data fabric nodes on bus 0 with a working indirect access mailbox
///
/// Each config access takes the model's lock on its own; nothing ties the
/// address-select write to the data access that follows, just as on
/// hardware.
pub struct SimFabric {
    rev: DfRev,
    nodes: u8,
    instances: u8,
    layout: &'static MailboxLayout,
    state: Mutex<FabricState>,
    ficaa_writes: AtomicU64,
}

impl SimFabric {
    /// `nodes` fabric nodes of revision `rev`, each with `instances`
    /// component instances.
    #[track_caller]
    pub fn new(rev: DfRev, nodes: u8, instances: u8) -> Self {
        zenreg_raw::invariant!(
            nodes <= DF_MAX_NODES,
            Invariant::OutOfRange,
            "{} fabric nodes > {}",
            nodes,
            DF_MAX_NODES
        );
        let layout = mailbox_layout(rev);

        let device_id: u16 = match rev {
            DfRev::V3p5 => 0x1650,
            DfRev::V4 => 0x14ad,
            _ => 0x1460,
        };
        let cfg_addr_ctl = match rev {
            DfRev::V4 | DfRev::V4D2 => DF_CFG_ADDR_CTL_V4,
            _ => DF_CFG_ADDR_CTL_V2,
        };

        let mut state = FabricState::default();
        for die in 0..nodes {
            let device = DF_FIRST_DEVICE + die;
            for func in 0..DF_FUNC_COUNT {
                let id = AMD_VENDOR_ID as u32 | ((device_id + func as u16) as u32) << 16;
                state.direct.insert((PciAddress::new(0, device, func), 0), id);
            }
            state.direct.insert(
                (PciAddress::new(0, device, DF_FBICNT.func), DF_FBICNT.reg),
                instances as u32,
            );
            state.direct.insert(
                (PciAddress::new(0, device, cfg_addr_ctl.func), cfg_addr_ctl.reg),
                Self::bus_for(die) as u32,
            );
        }

        Self {
            rev,
            nodes,
            instances,
            layout,
            state: Mutex::new(state),
            ficaa_writes: AtomicU64::new(0),
        }
    }

    fn bus_for(die: u8) -> u8 {
        die * 0x20
    }

    pub fn rev(&self) -> DfRev {
        self.rev
    }

    pub fn nodes(&self) -> u8 {
        self.nodes
    }

    /// Root bus number reported by die `die`
    pub fn bus_number(&self, die: u8) -> u8 {
        Self::bus_for(die)
    }

    pub fn indirect(&self, die: u8, func: u8, reg: u16, inst: u8) -> Option<u32> {
        self.state
            .lock()
            .indirect
            .get(&(die, func, reg, inst))
            .copied()
    }

    pub fn set_indirect(&self, die: u8, func: u8, reg: u16, inst: u8, value: u32) {
        self.state
            .lock()
            .indirect
            .insert((die, func, reg, inst), value);
    }

    pub fn last_ficaa(&self, die: u8) -> Option<u32> {
        self.state.lock().ficaa.get(&die).copied()
    }

    /// Address-select writes seen across all dies
    pub fn ficaa_writes(&self) -> u64 {
        self.ficaa_writes.load(Ordering::Relaxed)
    }

    fn die_of(&self, addr: PciAddress) -> Option<u8> {
        let first = DF_FIRST_DEVICE;
        if addr.bus == 0 && addr.device >= first && addr.device < first + self.nodes {
            Some(addr.device - first)
        } else {
            None
        }
    }

    fn is(reg: &zenreg_raw::DfRegDef, addr: PciAddress, offset: u16) -> bool {
        addr.function == reg.func && offset == reg.reg
    }
}

impl ConfigSpace for SimFabric {
    fn read32(&self, addr: PciAddress, offset: u16) -> u32 {
        let Some(die) = self.die_of(addr) else {
            return 0xffff_ffff;
        };
        let state = self.state.lock();

        if Self::is(&self.layout.ficaa, addr, offset) {
            return state.ficaa.get(&die).copied().unwrap_or(0);
        }
        if Self::is(&self.layout.ficad, addr, offset) {
            let ficaa = state.ficaa.get(&die).copied().unwrap_or(0);
            let (target, func, reg) = decode_ficaa(self.rev, ficaa);
            let inst = match target {
                DfTarget::Instance(inst) => inst,
                DfTarget::Broadcast => DF_BCAST_INSTANCE,
            };
            return state
                .indirect
                .get(&(die, func, reg, inst))
                .copied()
                .unwrap_or(0);
        }
        state.direct.get(&(addr, offset)).copied().unwrap_or(0)
    }

    fn write32(&self, addr: PciAddress, offset: u16, value: u32) {
        let Some(die) = self.die_of(addr) else {
            return;
        };
        let mut state = self.state.lock();

        if Self::is(&self.layout.ficaa, addr, offset) {
            state.ficaa.insert(die, value);
            self.ficaa_writes.fetch_add(1, Ordering::Relaxed);
            return;
        }
        if Self::is(&self.layout.ficad, addr, offset) {
            let ficaa = state.ficaa.get(&die).copied().unwrap_or(0);
            match decode_ficaa(self.rev, ficaa) {
                (DfTarget::Instance(inst), func, reg) => {
                    state.indirect.insert((die, func, reg, inst), value);
                }
                (DfTarget::Broadcast, func, reg) => {
                    for inst in 0..self.instances {
                        state.indirect.insert((die, func, reg, inst), value);
                    }
                }
            }
            return;
        }
        state.direct.insert((addr, offset), value);
    }
}
