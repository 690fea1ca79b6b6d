#[cfg(target_arch = "x86_64")]
pub fn cpuid(eax: u32, ecx: u32) -> (u32, u32, u32, u32) {
    let mut ebx: u32;
    let mut edx: u32;
    let mut eax_out = eax;
    let mut ecx_out = ecx;

    unsafe {
        std::arch::asm!(
            "mov {0:r}, rbx",
            "cpuid",
            "xchg {0:r}, rbx",
            out(reg) ebx,
            inout("eax") eax_out,
            inout("ecx") ecx_out,
            out("edx") edx,
            options(nostack, preserves_flags)
        );
    }

    (eax_out, ebx, ecx_out, edx)
}

#[cfg(not(target_arch = "x86_64"))]
pub fn cpuid(_eax: u32, _ecx: u32) -> (u32, u32, u32, u32) {
    (0, 0, 0, 0)
}

/// The 12-byte vendor string from leaf 0 (EBX, EDX, ECX order)
pub fn vendor() -> [u8; 12] {
    let (_eax, ebx, ecx, edx) = cpuid(0, 0);
    let mut out = [0u8; 12];
    out[0..4].copy_from_slice(&ebx.to_le_bytes());
    out[4..8].copy_from_slice(&edx.to_le_bytes());
    out[8..12].copy_from_slice(&ecx.to_le_bytes());
    out
}

/// Display family and model from leaf 1 EAX, AMD rules: the extended
/// fields only apply when the base family is 0xF.
pub fn family_model(eax: u32) -> (u32, u32) {
    let model = (eax >> 4) & 0xF;
    let family = (eax >> 8) & 0xF;
    let extended_model = (eax >> 16) & 0xF;
    let extended_family = (eax >> 20) & 0xFF;

    if family == 0xF {
        (family + extended_family, (extended_model << 4) | model)
    } else {
        (family, model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::similar_names)] // CPU register names are standard
    fn test_cpuid() {
        let (eax, ebx, ecx, edx) = cpuid(0, 0);
        println!("CPUID(0,0): EAX={eax:08X} EBX={ebx:08X} ECX={ecx:08X} EDX={edx:08X}");
    }

    #[test]
    fn test_family_model_decode() {
        // EPYC 7763: family 19h model 01h stepping 1
        assert_eq!(family_model(0x00a0_0f11), (0x19, 0x01));
        // EPYC 9654: family 19h model 11h
        assert_eq!(family_model(0x00a1_0f11), (0x19, 0x11));
        // EPYC 7742: family 17h model 31h
        assert_eq!(family_model(0x0083_0f10), (0x17, 0x31));
    }
}
