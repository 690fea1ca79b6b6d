// CPU microarchitecture detection

use once_cell::sync::Lazy;

use zenreg_raw::{DfRev, Microarch};

use crate::common::cpuid;

/// What CPUID says about this machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuInfo {
    pub family: u32,
    pub model: u32,
    /// Microarchitecture with register tables, if any
    pub microarch: Option<Microarch>,
    pub df_rev: DfRev,
}

pub static CPU_ARCH: Lazy<CpuInfo> = Lazy::new(detect);

const AMD_VENDOR: &[u8; 12] = b"AuthenticAMD";

fn detect() -> CpuInfo {
    if &cpuid::vendor() != AMD_VENDOR {
        tracing::warn!("Non-AMD CPU detected");
        return classify(0, 0);
    }

    let (eax, _ebx, _ecx, _edx) = cpuid::cpuid(1, 0);
    let (family, model) = cpuid::family_model(eax);
    tracing::info!("CPU: Family {:X}, Model {:X}", family, model);

    let info = classify(family, model);
    match info.microarch {
        Some(arch) => tracing::info!(
            "Detected microarchitecture: {} ({})",
            arch,
            info.df_rev.name()
        ),
        None => tracing::warn!(
            "No register tables for family {:X} model {:X} ({})",
            family,
            model,
            info.df_rev.name()
        ),
    }
    info
}

/// Map family/model to microarchitecture and data fabric revision
///
/// Reference: AMD PPRs for Families 17h, 19h and 1Ah
pub fn classify(family: u32, model: u32) -> CpuInfo {
    let (microarch, df_rev) = match (family, model) {
        // Naples
        (0x17, 0x00..=0x0f) => (None, DfRev::V2),
        // Rome
        (0x17, 0x30..=0x3f) => (None, DfRev::V3),
        // Milan
        (0x19, 0x00..=0x0f) => (Some(Microarch::Milan), DfRev::V3p5),
        // Genoa, Bergamo, Siena
        (0x19, 0x10..=0x1f) | (0x19, 0xa0..=0xaf) => (Some(Microarch::Genoa), DfRev::V4),
        // Turin
        (0x1a, 0x00..=0x1f) => (None, DfRev::V4D2),
        _ => (None, DfRev::Unknown),
    };

    CpuInfo {
        family,
        model,
        microarch,
        df_rev,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_server_parts() {
        let milan = classify(0x19, 0x01);
        assert_eq!(milan.microarch, Some(Microarch::Milan));
        assert_eq!(milan.df_rev, DfRev::V3p5);

        let genoa = classify(0x19, 0x11);
        assert_eq!(genoa.microarch, Some(Microarch::Genoa));
        assert_eq!(genoa.df_rev, DfRev::V4);

        let bergamo = classify(0x19, 0xa0);
        assert_eq!(bergamo.microarch, Some(Microarch::Genoa));
    }

    #[test]
    fn test_classify_parts_without_tables() {
        assert_eq!(classify(0x17, 0x31).df_rev, DfRev::V3);
        assert_eq!(classify(0x17, 0x01).df_rev, DfRev::V2);
        assert_eq!(classify(0x1a, 0x02).df_rev, DfRev::V4D2);
        assert_eq!(classify(0x17, 0x31).microarch, None);
    }

    #[test]
    fn test_classify_unknown() {
        let info = classify(0x6, 0x55);
        assert_eq!(info.microarch, None);
        assert_eq!(info.df_rev, DfRev::Unknown);
    }

    #[test]
    fn test_detected_matches_microarch_table() {
        // Runs on the actual CPU
        let info = *CPU_ARCH;
        if let Some(arch) = info.microarch {
            assert_eq!(arch.df_rev(), info.df_rev);
        }
    }
}
