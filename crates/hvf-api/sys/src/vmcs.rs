// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! VMCS field encodings (Intel SDM vol. 3, appendix B).

// 16-bit guest-state fields
pub const VMCS_GUEST_ES_SELECTOR: u32 = 0x0800;
pub const VMCS_GUEST_CS_SELECTOR: u32 = 0x0802;
pub const VMCS_GUEST_SS_SELECTOR: u32 = 0x0804;
pub const VMCS_GUEST_DS_SELECTOR: u32 = 0x0806;
pub const VMCS_GUEST_FS_SELECTOR: u32 = 0x0808;
pub const VMCS_GUEST_GS_SELECTOR: u32 = 0x080a;
pub const VMCS_GUEST_LDTR_SELECTOR: u32 = 0x080c;
pub const VMCS_GUEST_TR_SELECTOR: u32 = 0x080e;

// 64-bit fields
pub const VMCS_GUEST_PHYSICAL_ADDRESS: u32 = 0x2400;
pub const VMCS_GUEST_IA32_EFER: u32 = 0x2806;
pub const VMCS_GUEST_PDPTE0: u32 = 0x280a;
pub const VMCS_GUEST_PDPTE1: u32 = 0x280c;
pub const VMCS_GUEST_PDPTE2: u32 = 0x280e;
pub const VMCS_GUEST_PDPTE3: u32 = 0x2810;

// 32-bit control fields
pub const VMCS_PIN_BASED_CTLS: u32 = 0x4000;
pub const VMCS_PRI_PROC_BASED_CTLS: u32 = 0x4002;
pub const VMCS_EXCEPTION_BITMAP: u32 = 0x4004;
pub const VMCS_EXIT_CTLS: u32 = 0x400c;
pub const VMCS_ENTRY_CTLS: u32 = 0x4012;
pub const VMCS_ENTRY_INTR_INFO: u32 = 0x4016;
pub const VMCS_ENTRY_EXCEPTION_ERROR: u32 = 0x4018;
pub const VMCS_ENTRY_INST_LENGTH: u32 = 0x401a;
pub const VMCS_TPR_THRESHOLD: u32 = 0x401c;
pub const VMCS_SEC_PROC_BASED_CTLS: u32 = 0x401e;

// 32-bit read-only data fields
pub const VMCS_INSTRUCTION_ERROR: u32 = 0x4400;
pub const VMCS_EXIT_REASON: u32 = 0x4402;
pub const VMCS_EXIT_INTR_INFO: u32 = 0x4404;
pub const VMCS_EXIT_INTR_ERRCODE: u32 = 0x4406;
pub const VMCS_IDT_VECTORING_INFO: u32 = 0x4408;
pub const VMCS_IDT_VECTORING_ERROR: u32 = 0x440a;
pub const VMCS_EXIT_INSTRUCTION_LENGTH: u32 = 0x440c;
pub const VMCS_EXIT_INSTRUCTION_INFO: u32 = 0x440e;

// 32-bit guest-state fields
pub const VMCS_GUEST_ES_LIMIT: u32 = 0x4800;
pub const VMCS_GUEST_CS_LIMIT: u32 = 0x4802;
pub const VMCS_GUEST_SS_LIMIT: u32 = 0x4804;
pub const VMCS_GUEST_DS_LIMIT: u32 = 0x4806;
pub const VMCS_GUEST_FS_LIMIT: u32 = 0x4808;
pub const VMCS_GUEST_GS_LIMIT: u32 = 0x480a;
pub const VMCS_GUEST_LDTR_LIMIT: u32 = 0x480c;
pub const VMCS_GUEST_TR_LIMIT: u32 = 0x480e;
pub const VMCS_GUEST_GDTR_LIMIT: u32 = 0x4810;
pub const VMCS_GUEST_IDTR_LIMIT: u32 = 0x4812;
pub const VMCS_GUEST_ES_ACCESS_RIGHTS: u32 = 0x4814;
pub const VMCS_GUEST_CS_ACCESS_RIGHTS: u32 = 0x4816;
pub const VMCS_GUEST_SS_ACCESS_RIGHTS: u32 = 0x4818;
pub const VMCS_GUEST_DS_ACCESS_RIGHTS: u32 = 0x481a;
pub const VMCS_GUEST_FS_ACCESS_RIGHTS: u32 = 0x481c;
pub const VMCS_GUEST_GS_ACCESS_RIGHTS: u32 = 0x481e;
pub const VMCS_GUEST_LDTR_ACCESS_RIGHTS: u32 = 0x4820;
pub const VMCS_GUEST_TR_ACCESS_RIGHTS: u32 = 0x4822;
pub const VMCS_GUEST_INTERRUPTIBILITY: u32 = 0x4824;
pub const VMCS_GUEST_ACTIVITY: u32 = 0x4826;

// Natural-width control fields
pub const VMCS_CR0_MASK: u32 = 0x6000;
pub const VMCS_CR4_MASK: u32 = 0x6002;
pub const VMCS_CR0_SHADOW: u32 = 0x6004;
pub const VMCS_CR4_SHADOW: u32 = 0x6006;

// Natural-width read-only data fields
pub const VMCS_EXIT_QUALIFICATION: u32 = 0x6400;
pub const VMCS_GUEST_LINEAR_ADDRESS: u32 = 0x640a;

// Natural-width guest-state fields
pub const VMCS_GUEST_CR0: u32 = 0x6800;
pub const VMCS_GUEST_CR3: u32 = 0x6802;
pub const VMCS_GUEST_CR4: u32 = 0x6804;
pub const VMCS_GUEST_ES_BASE: u32 = 0x6806;
pub const VMCS_GUEST_CS_BASE: u32 = 0x6808;
pub const VMCS_GUEST_SS_BASE: u32 = 0x680a;
pub const VMCS_GUEST_DS_BASE: u32 = 0x680c;
pub const VMCS_GUEST_FS_BASE: u32 = 0x680e;
pub const VMCS_GUEST_GS_BASE: u32 = 0x6810;
pub const VMCS_GUEST_LDTR_BASE: u32 = 0x6812;
pub const VMCS_GUEST_TR_BASE: u32 = 0x6814;
pub const VMCS_GUEST_GDTR_BASE: u32 = 0x6816;
pub const VMCS_GUEST_IDTR_BASE: u32 = 0x6818;
pub const VMCS_GUEST_DR7: u32 = 0x681a;
pub const VMCS_GUEST_RSP: u32 = 0x681c;
pub const VMCS_GUEST_RIP: u32 = 0x681e;
pub const VMCS_GUEST_RFLAGS: u32 = 0x6820;

/// Guest segment register fields, grouped per segment.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SegFields {
    pub selector: u32,
    pub base: u32,
    pub limit: u32,
    pub access: u32,
}

pub const VMCS_GUEST_CS: SegFields = SegFields {
    selector: VMCS_GUEST_CS_SELECTOR,
    base: VMCS_GUEST_CS_BASE,
    limit: VMCS_GUEST_CS_LIMIT,
    access: VMCS_GUEST_CS_ACCESS_RIGHTS,
};
pub const VMCS_GUEST_DS: SegFields = SegFields {
    selector: VMCS_GUEST_DS_SELECTOR,
    base: VMCS_GUEST_DS_BASE,
    limit: VMCS_GUEST_DS_LIMIT,
    access: VMCS_GUEST_DS_ACCESS_RIGHTS,
};
pub const VMCS_GUEST_ES: SegFields = SegFields {
    selector: VMCS_GUEST_ES_SELECTOR,
    base: VMCS_GUEST_ES_BASE,
    limit: VMCS_GUEST_ES_LIMIT,
    access: VMCS_GUEST_ES_ACCESS_RIGHTS,
};
pub const VMCS_GUEST_FS: SegFields = SegFields {
    selector: VMCS_GUEST_FS_SELECTOR,
    base: VMCS_GUEST_FS_BASE,
    limit: VMCS_GUEST_FS_LIMIT,
    access: VMCS_GUEST_FS_ACCESS_RIGHTS,
};
pub const VMCS_GUEST_GS: SegFields = SegFields {
    selector: VMCS_GUEST_GS_SELECTOR,
    base: VMCS_GUEST_GS_BASE,
    limit: VMCS_GUEST_GS_LIMIT,
    access: VMCS_GUEST_GS_ACCESS_RIGHTS,
};
pub const VMCS_GUEST_SS: SegFields = SegFields {
    selector: VMCS_GUEST_SS_SELECTOR,
    base: VMCS_GUEST_SS_BASE,
    limit: VMCS_GUEST_SS_LIMIT,
    access: VMCS_GUEST_SS_ACCESS_RIGHTS,
};
pub const VMCS_GUEST_LDTR: SegFields = SegFields {
    selector: VMCS_GUEST_LDTR_SELECTOR,
    base: VMCS_GUEST_LDTR_BASE,
    limit: VMCS_GUEST_LDTR_LIMIT,
    access: VMCS_GUEST_LDTR_ACCESS_RIGHTS,
};
pub const VMCS_GUEST_TR: SegFields = SegFields {
    selector: VMCS_GUEST_TR_SELECTOR,
    base: VMCS_GUEST_TR_BASE,
    limit: VMCS_GUEST_TR_LIMIT,
    access: VMCS_GUEST_TR_ACCESS_RIGHTS,
};
