//! MP0 (PSP) and MP1 (SMU, HSMP) mailbox register definitions
//!
//! Both microprocessors sit at the same SMN apertures on Milan and Genoa.
//! HSMP is a second mailbox inside MP1's aperture; it gets its own unit tag
//! so SMU RPC descriptors cannot be used against it by accident.

use crate::register::RegDef;
use crate::resolve::SmnFamily;
use crate::unit::RegisterUnit;

pub const MP1_SMN_BASE: u32 = 0x03b1_0000;
pub const MP0_SMN_BASE: u32 = 0x0380_0000;

pub const SMU_RPC: SmnFamily = SmnFamily::single(RegisterUnit::SmuRpc, MP1_SMN_BASE, 0xffff_f000);
pub const HSMP: SmnFamily = SmnFamily::single(RegisterUnit::Hsmp, MP1_SMN_BASE, 0xffff_f000);
pub const PSP: SmnFamily = SmnFamily::single(RegisterUnit::Psp, MP0_SMN_BASE, 0xfff0_0000);

/// SMU RPC mailbox
pub mod smu {
    use super::*;

    pub const SMU_RPC_REQ: RegDef = RegDef::new(RegisterUnit::SmuRpc, 0x530);
    pub const SMU_RPC_RESP: RegDef = RegDef::new(RegisterUnit::SmuRpc, 0x57c);
    /// Six argument registers
    pub const SMU_RPC_ARG: RegDef = RegDef::new(RegisterUnit::SmuRpc, 0x9c4).with_count(6);
}

/// Host System Management Port mailbox
pub mod hsmp {
    use super::*;

    pub const HSMP_REQ: RegDef = RegDef::new(RegisterUnit::Hsmp, 0x534);
    pub const HSMP_RESP: RegDef = RegDef::new(RegisterUnit::Hsmp, 0x980);
    /// Eight argument registers
    pub const HSMP_ARG: RegDef = RegDef::new(RegisterUnit::Hsmp, 0x9e0).with_count(8);
}

/// PSP C2P mailbox
pub mod psp {
    use super::*;

    pub const PSP_C2PMSG_CMD: RegDef = RegDef::new(RegisterUnit::Psp, 0x10570);
    pub const PSP_C2PMSG_BUF_LO: RegDef = RegDef::new(RegisterUnit::Psp, 0x10574);
    pub const PSP_C2PMSG_BUF_HI: RegDef = RegDef::new(RegisterUnit::Psp, 0x10578);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::RegisterLocation;
    use crate::resolve::resolve;

    #[test]
    fn test_hsmp_arguments() {
        let loc = RegisterLocation::unit(0);
        assert_eq!(resolve(&HSMP, &hsmp::HSMP_REQ, loc).addr(), 0x03b1_0534);
        assert_eq!(
            resolve(&HSMP, &hsmp::HSMP_ARG, loc.with_instance(7)).addr(),
            0x03b1_09fc
        );
    }

    #[test]
    fn test_psp_mailbox() {
        let reg = resolve(&PSP, &psp::PSP_C2PMSG_CMD, RegisterLocation::unit(0));
        assert_eq!(reg.addr(), 0x0381_0570);
    }

    #[test]
    #[should_panic(expected = "invariant violated [unit-mismatch]")]
    fn test_smu_descriptor_against_hsmp_is_fatal() {
        resolve(&HSMP, &smu::SMU_RPC_REQ, RegisterLocation::unit(0));
    }
}
