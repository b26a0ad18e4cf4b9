// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use strum::{EnumIter, IntoStaticStr};

/// Architectural registers addressable through `hv_vcpu_read_register` and
/// `hv_vcpu_write_register`.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, EnumIter, IntoStaticStr)]
pub enum hv_x86_reg_t {
    HV_X86_RIP = 0,
    HV_X86_RFLAGS,
    HV_X86_RAX,
    HV_X86_RCX,
    HV_X86_RDX,
    HV_X86_RBX,
    HV_X86_RSI,
    HV_X86_RDI,
    HV_X86_RSP,
    HV_X86_RBP,
    HV_X86_R8,
    HV_X86_R9,
    HV_X86_R10,
    HV_X86_R11,
    HV_X86_R12,
    HV_X86_R13,
    HV_X86_R14,
    HV_X86_R15,
    HV_X86_CS,
    HV_X86_SS,
    HV_X86_DS,
    HV_X86_ES,
    HV_X86_FS,
    HV_X86_GS,
    HV_X86_IDT_BASE,
    HV_X86_IDT_LIMIT,
    HV_X86_GDT_BASE,
    HV_X86_GDT_LIMIT,
    HV_X86_LDTR,
    HV_X86_LDT_BASE,
    HV_X86_LDT_LIMIT,
    HV_X86_LDT_AR,
    HV_X86_TR,
    HV_X86_TSS_BASE,
    HV_X86_TSS_LIMIT,
    HV_X86_TSS_AR,
    HV_X86_CR0,
    HV_X86_CR1,
    HV_X86_CR2,
    HV_X86_CR3,
    HV_X86_CR4,
    HV_X86_DR0,
    HV_X86_DR1,
    HV_X86_DR2,
    HV_X86_DR3,
    HV_X86_DR4,
    HV_X86_DR5,
    HV_X86_DR6,
    HV_X86_DR7,
    HV_X86_TPR,
    HV_X86_XCR0,
}

impl hv_x86_reg_t {
    /// General purpose registers in the order of their x86 encoding (the
    /// numbering used by ModRM and by exit qualifications).
    pub const GPRS: [hv_x86_reg_t; 16] = [
        Self::HV_X86_RAX,
        Self::HV_X86_RCX,
        Self::HV_X86_RDX,
        Self::HV_X86_RBX,
        Self::HV_X86_RSP,
        Self::HV_X86_RBP,
        Self::HV_X86_RSI,
        Self::HV_X86_RDI,
        Self::HV_X86_R8,
        Self::HV_X86_R9,
        Self::HV_X86_R10,
        Self::HV_X86_R11,
        Self::HV_X86_R12,
        Self::HV_X86_R13,
        Self::HV_X86_R14,
        Self::HV_X86_R15,
    ];

    /// Look up a general purpose register by its x86 encoding.
    pub fn gpr(encoding: u8) -> Option<Self> {
        Self::GPRS.get(usize::from(encoding)).copied()
    }
}

/// VMX capability words readable with `hv_vmx_read_capability`.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, IntoStaticStr)]
pub enum hv_vmx_capability_t {
    HV_VMX_CAP_PINBASED = 0,
    HV_VMX_CAP_PROCBASED = 1,
    HV_VMX_CAP_PROCBASED2 = 2,
    HV_VMX_CAP_ENTRY = 3,
    HV_VMX_CAP_EXIT = 4,
    HV_VMX_CAP_PREEMPTION_TIMER = 32,
}
