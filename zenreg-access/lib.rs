//! Register access for AMD Zen SoCs
//!
//! Register layouts and address resolution live in `zenreg-raw`; this crate
//! moves the bits. It opens config space, drives the data fabric's indirect
//! access mailbox, maps MMIO windows under the boot-phase rules and performs
//! width-dispatched loads and stores.

pub mod common;
pub mod config;
pub mod df;
pub mod error;
pub mod mmio;
pub mod sim;
pub mod telemetry;

pub use config::PlatformConfig;
pub use df::{df_read32, df_write32, DfMailbox, DfNode, IoDie};
pub use error::{Result, ZenregError};
pub use mmio::{MmioMapper, MmioReg, MmioRegisterBlock, Provenance};
pub use telemetry::AccessMetrics;
