use parking_lot::Mutex;
use std::sync::Arc;

use crate::common::mech1::{PortIo, MECH1_ENABLE, PCI_CONFIG_ADDRESS, PCI_CONFIG_DATA};
use crate::common::pci::{ConfigSpace, PciAddress};

/// CF8/CFC port pair in front of a config space model
///
/// Models a core with the extended register number enabled, so bits 27:24
/// of the address port always select reg[11:8].
pub struct SimPorts {
    cfg: Arc<dyn ConfigSpace>,
    address: Mutex<Option<u32>>,
}

impl SimPorts {
    pub fn new(cfg: Arc<dyn ConfigSpace>) -> Self {
        Self {
            cfg,
            address: Mutex::new(None),
        }
    }

    /// Last value written to the address port
    pub fn last_address(&self) -> Option<u32> {
        *self.address.lock()
    }

    fn target(&self) -> Option<(PciAddress, u16)> {
        let cf8 = (*self.address.lock())?;
        if cf8 & MECH1_ENABLE == 0 {
            return None;
        }
        let addr = PciAddress::new(
            (cf8 >> 16) as u8,
            ((cf8 >> 11) & 0x1f) as u8,
            ((cf8 >> 8) & 0x7) as u8,
        );
        let reg = ((cf8 >> 24) & 0xf) << 8 | (cf8 & 0xfc);
        Some((addr, reg as u16))
    }
}

impl PortIo for SimPorts {
    fn outl(&self, port: u16, value: u32) {
        match port {
            PCI_CONFIG_ADDRESS => *self.address.lock() = Some(value),
            PCI_CONFIG_DATA => {
                if let Some((addr, reg)) = self.target() {
                    self.cfg.write32(addr, reg, value);
                }
            }
            _ => tracing::warn!("write to unmodelled port 0x{:04x} dropped", port),
        }
    }

    fn inl(&self, port: u16) -> u32 {
        match (port, self.target()) {
            (PCI_CONFIG_DATA, Some((addr, reg))) => self.cfg.read32(addr, reg),
            _ => 0xffff_ffff,
        }
    }
}
