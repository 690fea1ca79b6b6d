//! Legacy PCI configuration mechanism #1 (ports 0xCF8/0xCFC)
//!
//! Used only during early bring-up, before config space is reachable any
//! other way. The address/data port pair is itself a two-step sequence and
//! nothing here serializes it: callers rely on running single-threaded.
//!
//! ## Address register layout
//!
//! | Bits  | Field           |
//! |-------|-----------------|
//! | 31    | enable          |
//! | 27:24 | register[11:8]  |
//! | 23:16 | bus             |
//! | 15:11 | device          |
//! | 10:8  | function        |
//! | 7:2   | register dword  |
//!
//! Bits 27:24 are AMD's extended register number. They are only decoded when
//! firmware has set EnableCf8ExtCfg (NB_CFG, MSR C001_001F bit 46); without
//! it the mechanism reaches the first 256 bytes of each function.

use zenreg_raw::invariant::Invariant;

use crate::common::pci::{ConfigSpace, PciAddress};
use crate::error::{Result, ZenregError};

pub const PCI_CONFIG_ADDRESS: u16 = 0xcf8;
pub const PCI_CONFIG_DATA: u16 = 0xcfc;

pub const MECH1_ENABLE: u32 = 1 << 31;

/// Highest register offset reachable through mechanism #1
pub const MECH1_MAX_REG: u16 = 0xff;

/// Highest register offset reachable with the extended register number
pub const MECH1_EXT_MAX_REG: u16 = 0xfff;

/// Encode a mechanism #1 address register value.
///
/// Fatal if the device, function or register is outside what the mechanism
/// can express, or the register is not dword aligned.
#[track_caller]
pub fn mech1_address(addr: PciAddress, reg: u16) -> u32 {
    encode(addr, reg, MECH1_MAX_REG)
}

/// Encode an address register value carrying reg[11:8] in bits 27:24.
///
/// Same preconditions as [`mech1_address`] with the register limit raised
/// to [`MECH1_EXT_MAX_REG`].
#[track_caller]
pub fn mech1_ext_address(addr: PciAddress, reg: u16) -> u32 {
    encode(addr, reg, MECH1_EXT_MAX_REG)
}

#[track_caller]
fn encode(addr: PciAddress, reg: u16, max_reg: u16) -> u32 {
    zenreg_raw::invariant!(
        addr.device < 32 && addr.function < 8,
        Invariant::OutOfRange,
        "mechanism #1 cannot address {}",
        addr
    );
    zenreg_raw::invariant!(
        reg <= max_reg,
        Invariant::OutOfRange,
        "mechanism #1 register 0x{:x} > 0x{:x}",
        reg,
        max_reg
    );
    zenreg_raw::invariant!(
        reg % 4 == 0,
        Invariant::Misaligned,
        "mechanism #1 register 0x{:x} is not dword aligned",
        reg
    );

    MECH1_ENABLE
        | (reg as u32 >> 8) << 24
        | (addr.bus as u32) << 16
        | (addr.device as u32) << 11
        | (addr.function as u32) << 8
        | (reg as u32 & 0xfc)
}

/// 32-bit x86 I/O port access
pub trait PortIo: Send + Sync {
    fn outl(&self, port: u16, value: u32);
    fn inl(&self, port: u16) -> u32;
}

/// Real I/O ports, available after raising the I/O privilege level
pub struct X86Ports {
    _priv: (),
}

impl X86Ports {
    /// Raise the I/O privilege level of this process. Requires CAP_SYS_RAWIO.
    #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
    pub fn acquire() -> Result<Self> {
        // SAFETY: iopl only changes this process's I/O privilege level.
        let rc = unsafe { libc::iopl(3) };
        if rc != 0 {
            return Err(ZenregError::PortIoError(format!(
                "iopl(3) failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        tracing::info!("Acquired I/O privilege for legacy config access");
        Ok(Self { _priv: () })
    }

    #[cfg(not(all(target_os = "linux", target_arch = "x86_64")))]
    pub fn acquire() -> Result<Self> {
        Err(ZenregError::UnsupportedArchitecture(
            "port I/O requires Linux on x86_64".to_string(),
        ))
    }
}

#[cfg(target_arch = "x86_64")]
impl PortIo for X86Ports {
    fn outl(&self, port: u16, value: u32) {
        // SAFETY: an X86Ports only exists after iopl(3) succeeded.
        unsafe {
            std::arch::asm!(
                "out dx, eax",
                in("dx") port,
                in("eax") value,
                options(nomem, nostack, preserves_flags)
            );
        }
    }

    fn inl(&self, port: u16) -> u32 {
        let value: u32;
        // SAFETY: as above.
        unsafe {
            std::arch::asm!(
                "in eax, dx",
                out("eax") value,
                in("dx") port,
                options(nomem, nostack, preserves_flags)
            );
        }
        value
    }
}

#[cfg(not(target_arch = "x86_64"))]
impl PortIo for X86Ports {
    fn outl(&self, port: u16, _value: u32) {
        zenreg_raw::invariant::violated(
            Invariant::Access,
            format_args!("no I/O port 0x{port:x} on this architecture"),
        )
    }

    fn inl(&self, port: u16) -> u32 {
        zenreg_raw::invariant::violated(
            Invariant::Access,
            format_args!("no I/O port 0x{port:x} on this architecture"),
        )
    }
}

/// Mechanism #1 config access over some [`PortIo`]
pub struct Mech1<P> {
    ports: P,
    extended: bool,
}

impl<P: PortIo> Mech1<P> {
    /// Classic encoding, registers 0x00..=0xff only
    pub fn new(ports: P) -> Self {
        Self {
            ports,
            extended: false,
        }
    }

    /// Extended encoding, registers up to 0xfff. The caller vouches that
    /// EnableCf8ExtCfg is set on the core issuing the accesses.
    pub fn with_extended_config(ports: P) -> Self {
        Self {
            ports,
            extended: true,
        }
    }

    pub fn ports(&self) -> &P {
        &self.ports
    }

    /// Highest register offset this instance can encode
    pub fn max_reg(&self) -> u16 {
        if self.extended {
            MECH1_EXT_MAX_REG
        } else {
            MECH1_MAX_REG
        }
    }

    #[track_caller]
    fn address(&self, addr: PciAddress, reg: u16) -> u32 {
        encode(addr, reg, self.max_reg())
    }

    #[track_caller]
    pub fn read32(&self, addr: PciAddress, reg: u16) -> u32 {
        let cf8 = self.address(addr, reg);
        self.ports.outl(PCI_CONFIG_ADDRESS, cf8);
        let value = self.ports.inl(PCI_CONFIG_DATA);
        tracing::debug!("CF8 read: {addr} +0x{reg:02x} (0x{cf8:08x}) = 0x{value:08x}");
        value
    }

    #[track_caller]
    pub fn write32(&self, addr: PciAddress, reg: u16, value: u32) {
        let cf8 = self.address(addr, reg);
        tracing::debug!("CF8 write: {addr} +0x{reg:02x} (0x{cf8:08x}) = 0x{value:08x}");
        self.ports.outl(PCI_CONFIG_ADDRESS, cf8);
        self.ports.outl(PCI_CONFIG_DATA, value);
    }
}

impl<P: PortIo> ConfigSpace for Mech1<P> {
    fn read32(&self, addr: PciAddress, offset: u16) -> u32 {
        Mech1::read32(self, addr, offset)
    }

    fn write32(&self, addr: PciAddress, offset: u16, value: u32) {
        Mech1::write32(self, addr, offset, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingPorts {
        log: Mutex<Vec<(char, u16, u32)>>,
    }

    impl PortIo for RecordingPorts {
        fn outl(&self, port: u16, value: u32) {
            self.log.lock().push(('w', port, value));
        }

        fn inl(&self, port: u16) -> u32 {
            self.log.lock().push(('r', port, 0));
            0x1234_5678
        }
    }

    #[test]
    fn test_address_encoding() {
        assert_eq!(mech1_address(PciAddress::new(0, 0x18, 4), 0x5c), 0x8000_c45c);
        assert_eq!(
            mech1_address(PciAddress::new(0x40, 0x1f, 7), 0xfc),
            0x8000_0000 | 0x40 << 16 | 0x1f << 11 | 7 << 8 | 0xfc
        );
        assert_eq!(mech1_address(PciAddress::new(0, 0, 0), 0), MECH1_ENABLE);
    }

    #[test]
    fn test_write_then_read_sequence() {
        let mech = Mech1::new(RecordingPorts::default());
        let addr = PciAddress::new(0, 0x18, 4);
        mech.write32(addr, 0x5c, 0xabcd);
        assert_eq!(mech.read32(addr, 0x98), 0x1234_5678);

        let log = mech.ports().log.lock().clone();
        assert_eq!(
            log,
            vec![
                ('w', PCI_CONFIG_ADDRESS, 0x8000_c45c),
                ('w', PCI_CONFIG_DATA, 0xabcd),
                ('w', PCI_CONFIG_ADDRESS, 0x8000_c498),
                ('r', PCI_CONFIG_DATA, 0),
            ]
        );
    }

    #[test]
    fn test_extended_address_encoding() {
        let addr = PciAddress::new(0, 0x18, 0);
        assert_eq!(mech1_ext_address(addr, 0xc04), 0x8c00_c004);
        assert_eq!(
            mech1_ext_address(PciAddress::new(0, 0x18, 4), 0x180),
            0x8100_c480
        );
        // low registers encode identically either way
        assert_eq!(mech1_ext_address(addr, 0x5c), mech1_address(addr, 0x5c));
    }

    #[test]
    fn test_extended_mech_reaches_high_registers() {
        let mech = Mech1::with_extended_config(RecordingPorts::default());
        assert_eq!(mech.max_reg(), MECH1_EXT_MAX_REG);
        mech.read32(PciAddress::new(0, 0x18, 0), 0xffc);
        assert_eq!(mech.ports().log.lock()[0], ('w', PCI_CONFIG_ADDRESS, 0x8f00_c0fc));
    }

    #[test]
    #[should_panic(expected = "invariant violated [out-of-range]")]
    fn test_classic_register_past_0xff_is_fatal() {
        mech1_address(PciAddress::new(0, 0x18, 0), 0x100);
    }

    #[test]
    #[should_panic(expected = "invariant violated [out-of-range]")]
    fn test_classic_mech_rejects_high_register() {
        let mech = Mech1::new(RecordingPorts::default());
        mech.read32(PciAddress::new(0, 0x18, 0), 0x180);
    }

    #[test]
    #[should_panic(expected = "invariant violated [out-of-range]")]
    fn test_register_past_extended_space_is_fatal() {
        mech1_ext_address(PciAddress::new(0, 0x18, 0), 0x1000);
    }

    #[test]
    #[should_panic(expected = "invariant violated [misaligned]")]
    fn test_unaligned_register_is_fatal() {
        mech1_address(PciAddress::new(0, 0x18, 0), 0x5e);
    }

    #[test]
    #[should_panic(expected = "invariant violated [out-of-range]")]
    fn test_device_out_of_range_is_fatal() {
        mech1_address(PciAddress::new(0, 32, 0), 0);
    }
}
