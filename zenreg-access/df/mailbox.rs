use zenreg_raw::df::{ficaa_value, DfTarget, DF_CFG_ADDR_CTL_V2, DF_CFG_ADDR_CTL_V4, DF_FBICNT};
use zenreg_raw::invariant::violated;
use zenreg_raw::{DfRegDef, DfRev, Invariant};

use super::IoDie;
use crate::telemetry::DfOp;

#[derive(Clone, Copy)]
enum Xfer {
    Read,
    Write(u32),
}

impl IoDie {
    /// One address-select/data sequence under the die's mailbox lock.
    #[track_caller]
    fn transact(&self, def: &DfRegDef, target: DfTarget, xfer: Xfer) -> u32 {
        let rev = self.node.rev;
        let layout = self.mailbox.layout();
        let ficaa = ficaa_value(rev, def, target);
        let ficaa_addr = self.node.function(layout.ficaa.func);
        let ficad_addr = self.node.function(layout.ficad.func);

        let value = {
            let _guard = self.mailbox.lock.lock();
            self.cfg.write32(ficaa_addr, layout.ficaa.reg, ficaa);
            match xfer {
                Xfer::Read => self.cfg.read32(ficad_addr, layout.ficad.reg),
                Xfer::Write(value) => {
                    self.cfg.write32(ficad_addr, layout.ficad.reg, value);
                    value
                }
            }
        };

        let op = match (&xfer, target) {
            (Xfer::Write(_), _) => DfOp::Write,
            (Xfer::Read, DfTarget::Broadcast) => DfOp::BcastRead,
            (Xfer::Read, DfTarget::Instance(_)) => DfOp::Read,
        };
        tracing::debug!(
            "DF {}: die {} F{}x{:03x} {:?} ficaa=0x{:08x} value=0x{:08x}",
            op,
            self.index,
            def.func,
            def.reg,
            target,
            ficaa,
            value
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_df(self.index, op);
        }
        value
    }

    /// Broadcast read through the mailbox (target-instance-valid clear),
    /// for use once per-die state exists.
    #[track_caller]
    pub fn df_bcast_read32(&self, def: &DfRegDef) -> u32 {
        self.transact(def, DfTarget::Broadcast, Xfer::Read)
    }

    /// Read a register directly from the node's own config space.
    #[track_caller]
    pub fn read_direct32(&self, def: &DfRegDef) -> u32 {
        def.check_for(self.node.rev);
        self.cfg.read32(self.node.function(def.func), def.reg)
    }

    /// Number of fabric component instances on this die
    pub fn instance_count(&self) -> u8 {
        (self.read_direct32(&DF_FBICNT) & 0xff) as u8
    }

    /// PCI bus number this die's root complexes start at
    #[track_caller]
    pub fn bus_number(&self) -> u8 {
        let def = match self.node.rev {
            DfRev::V2 | DfRev::V3 | DfRev::V3p5 => &DF_CFG_ADDR_CTL_V2,
            DfRev::V4 | DfRev::V4D2 => &DF_CFG_ADDR_CTL_V4,
            DfRev::Unknown => violated(
                Invariant::FabricRevision,
                format_args!("die {} has an unknown fabric revision", self.index),
            ),
        };
        (self.read_direct32(def) & 0xff) as u8
    }
}

/// Read `def` on component instance `inst` of `die`.
///
/// Fatal if the register does not exist on the die's fabric revision.
#[track_caller]
pub fn df_read32(die: &IoDie, inst: u8, def: &DfRegDef) -> u32 {
    die.transact(def, DfTarget::Instance(inst), Xfer::Read)
}

/// Write `value` to `def` on component instance `inst` of `die`.
#[track_caller]
pub fn df_write32(die: &IoDie, inst: u8, def: &DfRegDef, value: u32) {
    die.transact(def, DfTarget::Instance(inst), Xfer::Write(value));
}
