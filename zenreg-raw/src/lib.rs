//! # zenreg-raw
//!
//! Register descriptors and address resolution for AMD Zen server SoCs.
//!
//! This crate turns declarative register descriptions into concrete
//! addresses. It performs no hardware access and holds no state: everything
//! here can run before anything is mapped, and every result is either a
//! correct address or a fatal invariant violation (see [`invariant`]).
//!
//! - [`register`]: descriptors ([`RegDef`]), locations and resolved registers
//! - [`resolve`]: the SMN address resolver over per-unit family records,
//!   including the non-uniform (table and split) aperture families
//! - [`df`]: data fabric register definitions and the per-revision
//!   indirect-access address-select encoding
//! - [`arch`]: per-microarchitecture constant tables
//!
//! ## Features
//!
//! Select the tables to build via feature flags:
//! - `milan` (default) - Zen 3 EPYC register tables
//! - `genoa` (default) - Zen 4 EPYC register tables
//!
//! ## Usage
//!
//! ```
//! use zenreg_raw::arch::fch;
//! use zenreg_raw::{resolve, RegisterLocation, RegWidth};
//!
//! let reg = resolve(&fch::I2C_SMN, &fch::i2c::IC_ENABLE, RegisterLocation::unit(2));
//! assert_eq!(reg.addr(), 0x02dd_406c);
//! assert_eq!(reg.width(), RegWidth::W4);
//! ```

#[macro_use]
pub mod macros;

pub mod arch;
pub mod df;
pub mod invariant;
pub mod register;
pub mod resolve;
pub mod unit;

// Re-export for convenience
pub use arch::Microarch;
pub use df::{DfRegDef, DfRev, DfRevSet, DfTarget};
pub use invariant::Invariant;
pub use register::{MmioPhys, RegDef, RegWidth, RegisterLayout, RegisterLocation, SmnReg};
pub use resolve::{check_location, resolve, ApertureBase, SmnFamily};
pub use unit::RegisterUnit;
