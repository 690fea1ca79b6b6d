//! PCI configuration space backends
//!
//! [`ConfigSpace`] is the seam every config-space consumer goes through: the
//! data fabric mailbox, discovery, and the software fabric model used by
//! tests. [`ProcPci`] is the Linux backend over `/proc/bus/pci`.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use zenreg_raw::invariant::{violated, Invariant};

use crate::error::{Result, ZenregError};

pub const AMD_VENDOR_ID: u16 = 0x1022;

/// Default procfs root for PCI config space
pub const PROC_PCI_ROOT: &str = "/proc/bus/pci";

/// Environment variable overriding [`PROC_PCI_ROOT`] (containers mount the
/// host's procfs elsewhere)
pub const PROC_PCI_ENV: &str = "ZENREG_PROC_PCI";

/// Bus/device/function on PCI segment 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PciAddress {
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

impl PciAddress {
    pub const fn new(bus: u8, device: u8, function: u8) -> Self {
        Self {
            bus,
            device,
            function,
        }
    }
}

impl fmt::Display for PciAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}:{:02x}.{}", self.bus, self.device, self.function)
    }
}

/// 32-bit configuration space access
///
/// Accesses do not fail: an implementation that cannot complete one reports
/// it as a fatal invariant violation. Anything that can fail for ordinary
/// reasons (opening files, privileges) belongs in the constructor.
pub trait ConfigSpace: Send + Sync {
    fn read32(&self, addr: PciAddress, offset: u16) -> u32;
    fn write32(&self, addr: PciAddress, offset: u16, value: u32);
}

/// One open `/proc/bus/pci/BB/DD.F` file
pub struct PciHandle {
    file: Mutex<File>,
    address: PciAddress,
}

impl PciHandle {
    pub fn open(root: &Path, address: PciAddress) -> Result<Self> {
        let path = Self::path(root, address);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| {
                ZenregError::PciError(format!(
                    "Failed to open PCI device {address} at {}: {e}",
                    path.display()
                ))
            })?;

        Ok(Self {
            file: Mutex::new(file),
            address,
        })
    }

    fn path(root: &Path, address: PciAddress) -> PathBuf {
        root.join(format!("{:02x}", address.bus))
            .join(format!("{:02x}.{}", address.device, address.function))
    }

    pub fn address(&self) -> PciAddress {
        self.address
    }

    pub fn read32(&self, offset: u16) -> Result<u32> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset as u64)).map_err(|e| {
            ZenregError::PciError(format!("Failed to seek to offset {offset:#x}: {e}"))
        })?;

        let mut buffer = [0u8; 4];
        file.read_exact(&mut buffer).map_err(|e| {
            ZenregError::PciError(format!("Failed to read at offset {offset:#x}: {e}"))
        })?;

        Ok(u32::from_le_bytes(buffer))
    }

    pub fn write32(&self, offset: u16, value: u32) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset as u64)).map_err(|e| {
            ZenregError::PciError(format!("Failed to seek to offset {offset:#x}: {e}"))
        })?;

        file.write_all(&value.to_le_bytes()).map_err(|e| {
            ZenregError::PciError(format!("Failed to write at offset {offset:#x}: {e}"))
        })?;

        Ok(())
    }

    /// Vendor and device ID from the config header
    pub fn ids(&self) -> Result<(u16, u16)> {
        let value = self.read32(0)?;
        Ok(((value & 0xffff) as u16, (value >> 16) as u16))
    }
}

/// Config space through procfs
///
/// Handles are opened explicitly with [`ProcPci::open`] or
/// [`ProcPci::open_node`] and cached; a [`ConfigSpace`] access to a function
/// that was never opened is fatal.
pub struct ProcPci {
    root: PathBuf,
    handles: RwLock<HashMap<PciAddress, Arc<PciHandle>>>,
}

impl ProcPci {
    /// Backend rooted at `$ZENREG_PROC_PCI`, or `/proc/bus/pci`
    pub fn new() -> Self {
        Self::with_root(Self::root_from_env())
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            handles: RwLock::new(HashMap::new()),
        }
    }

    pub fn root_from_env() -> PathBuf {
        std::env::var_os(PROC_PCI_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(PROC_PCI_ROOT))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn open(&self, address: PciAddress) -> Result<Arc<PciHandle>> {
        {
            let handles = self.handles.read();
            if let Some(handle) = handles.get(&address) {
                return Ok(Arc::clone(handle));
            }
        }

        let handle = Arc::new(PciHandle::open(&self.root, address)?);
        tracing::debug!("Opened PCI config space {address}");

        let mut handles = self.handles.write();
        Ok(Arc::clone(handles.entry(address).or_insert(handle)))
    }

    /// Open every function of a multi-function device
    pub fn open_node(&self, bus: u8, device: u8, functions: u8) -> Result<()> {
        for function in 0..functions {
            self.open(PciAddress::new(bus, device, function))?;
        }
        Ok(())
    }

    #[track_caller]
    fn handle(&self, address: PciAddress) -> Arc<PciHandle> {
        match self.handles.read().get(&address) {
            Some(handle) => Arc::clone(handle),
            None => violated(
                Invariant::Access,
                format_args!("PCI function {address} was never opened"),
            ),
        }
    }
}

impl Default for ProcPci {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigSpace for ProcPci {
    fn read32(&self, addr: PciAddress, offset: u16) -> u32 {
        match self.handle(addr).read32(offset) {
            Ok(value) => {
                tracing::debug!("PCI read: {addr} +0x{offset:03x} = 0x{value:08x}");
                value
            }
            Err(e) => violated(Invariant::Access, format_args!("{addr}: {e}")),
        }
    }

    fn write32(&self, addr: PciAddress, offset: u16, value: u32) {
        tracing::debug!("PCI write: {addr} +0x{offset:03x} = 0x{value:08x}");
        if let Err(e) = self.handle(addr).write32(offset, value) {
            violated(Invariant::Access, format_args!("{addr}: {e}"));
        }
    }
}

pub fn device_exists(root: &Path, address: PciAddress) -> bool {
    PciHandle::open(root, address).is_ok()
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_address_display() {
        assert_eq!(PciAddress::new(0, 0x18, 4).to_string(), "00:18.4");
        assert_eq!(PciAddress::new(0x80, 0x1f, 7).to_string(), "80:1f.7");
    }

    #[test]
    fn test_proc_pci_read_write() {
        let root = scratch_root("procpci-rw");
        let addr = PciAddress::new(0, 0x18, 4);
        fake_function(&root, addr, AMD_VENDOR_ID, 0x1654);

        let pci = ProcPci::with_root(&root);
        let handle = pci.open(addr).unwrap();
        assert_eq!(handle.ids().unwrap(), (AMD_VENDOR_ID, 0x1654));

        pci.write32(addr, 0x5c, 0xdead_beef);
        assert_eq!(pci.read32(addr, 0x5c), 0xdead_beef);
        assert_eq!(pci.read32(addr, 0), 0x1654_1022);

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_open_missing_device_fails() {
        let root = scratch_root("procpci-missing");
        let pci = ProcPci::with_root(&root);
        assert!(matches!(
            pci.open(PciAddress::new(0, 0x19, 0)),
            Err(ZenregError::PciError(_))
        ));
        assert!(!device_exists(&root, PciAddress::new(0, 0x19, 0)));
        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_open_node_opens_all_functions() {
        let root = scratch_root("procpci-node");
        for function in 0..8 {
            fake_function(&root, PciAddress::new(0, 0x18, function), AMD_VENDOR_ID, 0x14ad);
        }
        let pci = ProcPci::with_root(&root);
        pci.open_node(0, 0x18, 8).unwrap();
        assert_eq!(pci.read32(PciAddress::new(0, 0x18, 7), 0) & 0xffff, 0x1022);
        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    #[should_panic(expected = "invariant violated [access-failed]")]
    fn test_access_to_unopened_function_is_fatal() {
        let pci = ProcPci::with_root("/nonexistent");
        pci.read32(PciAddress::new(0, 0x18, 0), 0);
    }
}
