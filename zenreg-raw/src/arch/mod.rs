//! Architecture-specific register tables
//!
//! Each AMD server generation places its SMN-addressed units at different
//! apertures, with different unit counts and different non-uniform
//! exceptions. Everything that varies by generation lives here; the
//! resolver in [`crate::resolve`] is shared.
//!
//! ## Supported Architectures
//!
//! - **Milan** (`milan` feature) - EPYC 7003, Zen 3, DF 3.5
//! - **Genoa** (`genoa` feature) - EPYC 9004, Zen 4, DF 4
//!
//! The FCH and MP (SMU/PSP) tables are identical on both and are always
//! built.

pub mod fch;
pub mod mp;

#[cfg(feature = "milan")]
pub mod milan;

#[cfg(feature = "genoa")]
pub mod genoa;

use crate::df::DfRev;
use crate::resolve::SmnFamily;
use crate::unit::RegisterUnit;

crate::named_enum! {
    /// Server microarchitecture with register tables in this crate
    pub enum Microarch {
        Milan => "milan",
        Genoa => "genoa",
    }
}

impl Microarch {
    /// Data fabric revision of the I/O die
    pub const fn df_rev(&self) -> DfRev {
        match self {
            Microarch::Milan => DfRev::V3p5,
            Microarch::Genoa => DfRev::V4,
        }
    }

    /// All SMN families, empty if the tables were compiled out
    pub fn smn_families(&self) -> &'static [SmnFamily] {
        match self {
            #[cfg(feature = "milan")]
            Microarch::Milan => milan::SMN_FAMILIES,
            #[cfg(feature = "genoa")]
            Microarch::Genoa => genoa::SMN_FAMILIES,
            #[allow(unreachable_patterns)]
            _ => &[],
        }
    }

    pub fn smn_family(&self, unit: RegisterUnit) -> Option<&'static SmnFamily> {
        self.smn_families().iter().find(|f| f.unit == unit)
    }
}
