// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! VMX exit reasons, control bits and qualification layouts.

// Basic exit reasons (Intel SDM vol. 3, appendix C)
pub const VMX_REASON_EXC_NMI: u32 = 0;
pub const VMX_REASON_IRQ: u32 = 1;
pub const VMX_REASON_TRIPLE_FAULT: u32 = 2;
pub const VMX_REASON_INIT: u32 = 3;
pub const VMX_REASON_SIPI: u32 = 4;
pub const VMX_REASON_IO_SMI: u32 = 5;
pub const VMX_REASON_OTHER_SMI: u32 = 6;
pub const VMX_REASON_IRQ_WND: u32 = 7;
pub const VMX_REASON_VIRTUAL_NMI_WND: u32 = 8;
pub const VMX_REASON_TASK: u32 = 9;
pub const VMX_REASON_CPUID: u32 = 10;
pub const VMX_REASON_GETSEC: u32 = 11;
pub const VMX_REASON_HLT: u32 = 12;
pub const VMX_REASON_INVD: u32 = 13;
pub const VMX_REASON_INVLPG: u32 = 14;
pub const VMX_REASON_RDPMC: u32 = 15;
pub const VMX_REASON_RDTSC: u32 = 16;
pub const VMX_REASON_RSM: u32 = 17;
pub const VMX_REASON_VMCALL: u32 = 18;
pub const VMX_REASON_MOV_CR: u32 = 28;
pub const VMX_REASON_MOV_DR: u32 = 29;
pub const VMX_REASON_IO: u32 = 30;
pub const VMX_REASON_RDMSR: u32 = 31;
pub const VMX_REASON_WRMSR: u32 = 32;
pub const VMX_REASON_VMENTRY_GUEST: u32 = 33;
pub const VMX_REASON_VMENTRY_MSR: u32 = 34;
pub const VMX_REASON_MWAIT: u32 = 36;
pub const VMX_REASON_MTF: u32 = 37;
pub const VMX_REASON_MONITOR: u32 = 39;
pub const VMX_REASON_PAUSE: u32 = 40;
pub const VMX_REASON_VMENTRY_MC: u32 = 41;
pub const VMX_REASON_TPR_THRESHOLD: u32 = 43;
pub const VMX_REASON_APIC_ACCESS: u32 = 44;
pub const VMX_REASON_VIRTUALIZED_EOI: u32 = 45;
pub const VMX_REASON_GDTR_IDTR: u32 = 46;
pub const VMX_REASON_LDTR_TR: u32 = 47;
pub const VMX_REASON_EPT_VIOLATION: u32 = 48;
pub const VMX_REASON_EPT_MISCONFIG: u32 = 49;
pub const VMX_REASON_RDTSCP: u32 = 51;
pub const VMX_REASON_VMX_TIMER_EXPIRED: u32 = 52;
pub const VMX_REASON_WBINVD: u32 = 54;
pub const VMX_REASON_XSETBV: u32 = 55;
pub const VMX_REASON_APIC_WRITE: u32 = 56;
pub const VMX_REASON_RDRAND: u32 = 57;
pub const VMX_REASON_INVPCID: u32 = 58;
pub const VMX_REASON_RDSEED: u32 = 61;
pub const VMX_REASON_XSAVES: u32 = 63;
pub const VMX_REASON_XRSTORS: u32 = 64;

/// The basic exit reason occupies the low 16 bits of the exit-reason field.
pub const VMX_REASON_MASK: u32 = 0xffff;
/// Set when the exit happened during VM entry.
pub const VMX_REASON_ENTRY_FAIL: u32 = 1 << 31;

// Pin-based controls
pub const PIN_BASED_INTR: u64 = 1 << 0;
pub const PIN_BASED_NMI: u64 = 1 << 3;
pub const PIN_BASED_VIRTUAL_NMI: u64 = 1 << 5;

// Primary processor-based controls
pub const CPU_BASED_IRQ_WND: u64 = 1 << 2;
pub const CPU_BASED_TSC_OFFSET: u64 = 1 << 3;
pub const CPU_BASED_HLT: u64 = 1 << 7;
pub const CPU_BASED_INVLPG: u64 = 1 << 9;
pub const CPU_BASED_MWAIT: u64 = 1 << 10;
pub const CPU_BASED_RDPMC: u64 = 1 << 11;
pub const CPU_BASED_RDTSC: u64 = 1 << 12;
pub const CPU_BASED_CR3_LOAD: u64 = 1 << 15;
pub const CPU_BASED_CR3_STORE: u64 = 1 << 16;
pub const CPU_BASED_CR8_LOAD: u64 = 1 << 19;
pub const CPU_BASED_CR8_STORE: u64 = 1 << 20;
pub const CPU_BASED_TPR_SHADOW: u64 = 1 << 21;
pub const CPU_BASED_VIRTUAL_NMI_WND: u64 = 1 << 22;
pub const CPU_BASED_MOV_DR: u64 = 1 << 23;
pub const CPU_BASED_UNCOND_IO: u64 = 1 << 24;
pub const CPU_BASED_IO_BITMAPS: u64 = 1 << 25;
pub const CPU_BASED_MTF: u64 = 1 << 27;
pub const CPU_BASED_MSR_BITMAPS: u64 = 1 << 28;
pub const CPU_BASED_MONITOR: u64 = 1 << 29;
pub const CPU_BASED_PAUSE: u64 = 1 << 30;
pub const CPU_BASED_SECONDARY_CTLS: u64 = 1 << 31;

// Secondary processor-based controls
pub const CPU_BASED2_APIC_ACCESSES: u64 = 1 << 0;
pub const CPU_BASED2_EPT: u64 = 1 << 1;
pub const CPU_BASED2_RDTSCP: u64 = 1 << 3;
pub const CPU_BASED2_X2APIC: u64 = 1 << 4;
pub const CPU_BASED2_VPID: u64 = 1 << 5;
pub const CPU_BASED2_UNRESTRICTED: u64 = 1 << 7;

// VM-entry controls
pub const VMENTRY_LOAD_DEBUG_CTLS: u64 = 1 << 2;
pub const VMENTRY_GUEST_IA32E: u64 = 1 << 9;
pub const VMENTRY_LOAD_EFER: u64 = 1 << 15;

// Guest interruptibility state
pub const VMCS_INTERRUPTIBILITY_STI_BLOCKING: u64 = 1 << 0;
pub const VMCS_INTERRUPTIBILITY_MOVSS_BLOCKING: u64 = 1 << 1;
pub const VMCS_INTERRUPTIBILITY_SMI_BLOCKING: u64 = 1 << 2;
pub const VMCS_INTERRUPTIBILITY_NMI_BLOCKING: u64 = 1 << 3;

// Interruption information (entry injection, exit info, IDT vectoring)
pub const VMCS_INTR_VECTOR_MASK: u64 = 0xff;
pub const VMCS_INTR_T_MASK: u64 = 0x700;
pub const VMCS_INTR_T_HWINTR: u64 = 0 << 8;
pub const VMCS_INTR_T_NMI: u64 = 2 << 8;
pub const VMCS_INTR_T_HWEXCEPTION: u64 = 3 << 8;
pub const VMCS_INTR_T_SWINTR: u64 = 4 << 8;
pub const VMCS_INTR_T_PRIV_SWEXCEPTION: u64 = 5 << 8;
pub const VMCS_INTR_T_SWEXCEPTION: u64 = 6 << 8;
pub const VMCS_INTR_DEL_ERRCODE: u64 = 1 << 11;
pub const VMCS_INTR_UNBLOCK_NMI: u64 = 1 << 12;
pub const VMCS_INTR_VALID: u64 = 1 << 31;

// EPT violation exit qualification
pub const EPT_VIOLATION_DATA_READ: u64 = 1 << 0;
pub const EPT_VIOLATION_DATA_WRITE: u64 = 1 << 1;
pub const EPT_VIOLATION_INST_FETCH: u64 = 1 << 2;
pub const EPT_VIOLATION_GPA_READABLE: u64 = 1 << 3;
pub const EPT_VIOLATION_GPA_WRITEABLE: u64 = 1 << 4;
pub const EPT_VIOLATION_GPA_EXECUTABLE: u64 = 1 << 5;
pub const EPT_VIOLATION_GLA_VALID: u64 = 1 << 7;
pub const EPT_VIOLATION_XLAT_VALID: u64 = 1 << 8;
/// "NMI unblocking due to IRET", shared by EPT-violation and exception
/// qualifications.
pub const EXIT_QUAL_NMIUDTI: u64 = 1 << 12;

// Control register bits
pub const CR0_PE: u64 = 1 << 0;
pub const CR0_MP: u64 = 1 << 1;
pub const CR0_EM: u64 = 1 << 2;
pub const CR0_TS: u64 = 1 << 3;
pub const CR0_ET: u64 = 1 << 4;
pub const CR0_NE: u64 = 1 << 5;
pub const CR0_WP: u64 = 1 << 16;
pub const CR0_AM: u64 = 1 << 18;
pub const CR0_NW: u64 = 1 << 29;
pub const CR0_CD: u64 = 1 << 30;
pub const CR0_PG: u64 = 1 << 31;

pub const CR4_PAE: u64 = 1 << 5;
pub const CR4_VMXE: u64 = 1 << 13;

pub const EFER_LME: u64 = 1 << 8;
pub const EFER_LMA: u64 = 1 << 10;

pub const RFLAGS_RESERVED1: u64 = 1 << 1;
pub const RFLAGS_IF: u64 = 1 << 9;

/// Access-rights type field of a 64-bit busy TSS.
pub const AR_TYPE_BUSY_64_TSS: u64 = 11;
pub const AR_TYPE_MASK: u64 = 0x0f;
/// Access-rights "unusable" marker.
pub const AR_UNUSABLE: u64 = 1 << 16;
