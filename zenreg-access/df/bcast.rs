use zenreg_raw::df::{ficaa_value, mailbox_layout, DfTarget, DF_FIRST_DEVICE};
use zenreg_raw::DfRegDef;

use super::DfNode;
use crate::common::mech1::{Mech1, PortIo};
use crate::common::pci::PciAddress;

/// Broadcast read of `def` over legacy port I/O.
///
/// Takes no lock: only for single-threaded bring-up, before the die's
/// [`super::IoDie`] exists. Fatal for an unknown revision or a register
/// absent on it.
#[track_caller]
pub fn df_broadcast_read32<P: PortIo>(mech1: &Mech1<P>, node: &DfNode, def: &DfRegDef) -> u32 {
    let layout = mailbox_layout(node.rev);
    let ficaa = ficaa_value(node.rev, def, DfTarget::Broadcast);
    mech1.write32(node.function(layout.ficaa.func), layout.ficaa.reg, ficaa);
    let value = mech1.read32(node.function(layout.ficad.func), layout.ficad.reg);
    tracing::debug!(
        "DF early bcast read: node {:02x} F{}x{:03x} = 0x{:08x}",
        node.device,
        def.func,
        def.reg,
        value
    );
    value
}

/// Broadcast write of `def` over legacy port I/O. Same restrictions as
/// [`df_broadcast_read32`].
#[track_caller]
pub fn df_broadcast_write32<P: PortIo>(
    mech1: &Mech1<P>,
    node: &DfNode,
    def: &DfRegDef,
    value: u32,
) {
    let layout = mailbox_layout(node.rev);
    let ficaa = ficaa_value(node.rev, def, DfTarget::Broadcast);
    tracing::debug!(
        "DF early bcast write: node {:02x} F{}x{:03x} = 0x{:08x}",
        node.device,
        def.func,
        def.reg,
        value
    );
    mech1.write32(node.function(layout.ficaa.func), layout.ficaa.reg, ficaa);
    mech1.write32(node.function(layout.ficad.func), layout.ficad.reg, value);
}

/// Read a direct register that is identical on every die, from the first
/// fabric node, with no per-die state at all.
///
/// Registers above 0xff, such as the DFv4 system configuration registers,
/// need a [`Mech1::with_extended_config`]; through a classic [`Mech1::new`]
/// they are fatal.
#[track_caller]
pub fn df_early_read32<P: PortIo>(mech1: &Mech1<P>, def: &DfRegDef) -> u32 {
    def.check_shape();
    mech1.read32(PciAddress::new(0, DF_FIRST_DEVICE, def.func), def.reg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::pci::ConfigSpace;
    use crate::sim::{SimFabric, SimPorts};
    use std::sync::Arc;
    use zenreg_raw::df::{DF_CFG_ADDR_CTL_V4, DF_FBICNT, DF_FBIINFO0, DF_SYSCFG_V4};
    use zenreg_raw::DfRev;

    fn mech1(fabric: &Arc<SimFabric>) -> Mech1<SimPorts> {
        Mech1::new(SimPorts::new(fabric.clone()))
    }

    #[test]
    fn test_broadcast_write_reaches_every_instance() {
        let fabric = Arc::new(SimFabric::new(DfRev::V4, 2, 4));
        let mech = mech1(&fabric);
        let node = DfNode::for_die(1, DfRev::V4);

        df_broadcast_write32(&mech, &node, &DF_FBIINFO0, 0x77);
        for inst in 0..4 {
            assert_eq!(fabric.indirect(1, 0, 0x44, inst), Some(0x77));
        }
        assert_eq!(fabric.indirect(0, 0, 0x44, 0), None);
        assert_eq!(df_broadcast_read32(&mech, &node, &DF_FBIINFO0), 0x77);
    }

    #[test]
    fn test_broadcast_uses_port_mechanism() {
        let fabric = Arc::new(SimFabric::new(DfRev::V3p5, 1, 4));
        let mech = mech1(&fabric);
        let node = DfNode::for_die(0, DfRev::V3p5);

        df_broadcast_read32(&mech, &node, &DF_FBIINFO0);
        // last CF8 value selects the data register, F4x98 on node 0x18
        assert_eq!(mech.ports().last_address(), Some(0x8000_c498));
        assert_eq!(fabric.last_ficaa(0).map(|v| v & 1), Some(0));
    }

    #[test]
    fn test_early_read_targets_first_node() {
        let fabric = Arc::new(SimFabric::new(DfRev::V4, 2, 12));
        let mech = mech1(&fabric);
        assert_eq!(df_early_read32(&mech, &DF_FBICNT), 12);
        assert_eq!(mech.ports().last_address(), Some(0x8000_c040));
    }

    #[test]
    fn test_early_read_of_dfv4_system_registers() {
        let fabric = Arc::new(SimFabric::new(DfRev::V4, 1, 4));
        fabric.write32(PciAddress::new(0, DF_FIRST_DEVICE, 4), 0x180, 0x0000_1a05);
        let mech = Mech1::with_extended_config(SimPorts::new(fabric.clone()));

        assert_eq!(df_early_read32(&mech, &DF_SYSCFG_V4), 0x0000_1a05);
        assert_eq!(mech.ports().last_address(), Some(0x8100_c480));

        assert_eq!(df_early_read32(&mech, &DF_CFG_ADDR_CTL_V4), 0);
        assert_eq!(mech.ports().last_address(), Some(0x8c00_c004));
    }

    #[test]
    #[should_panic(expected = "invariant violated [out-of-range]")]
    fn test_early_read_past_classic_range_is_fatal() {
        let fabric = Arc::new(SimFabric::new(DfRev::V4, 1, 4));
        df_early_read32(&mech1(&fabric), &DF_SYSCFG_V4);
    }

    #[test]
    #[should_panic(expected = "invariant violated [fabric-revision]")]
    fn test_broadcast_register_missing_on_revision_is_fatal() {
        let fabric = Arc::new(SimFabric::new(DfRev::V3, 1, 4));
        let mech = mech1(&fabric);
        df_broadcast_read32(&mech, &DfNode::for_die(0, DfRev::V3), &DF_SYSCFG_V4);
    }
}
