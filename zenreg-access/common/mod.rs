pub mod arch;
pub mod cpuid;
pub mod mech1;
pub mod pci;

pub use arch::{CpuInfo, CPU_ARCH};
pub use mech1::{Mech1, PortIo, X86Ports};
pub use pci::{ConfigSpace, PciAddress, ProcPci};
