// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Describes transitions from the guest back to the accelerator.

use hvf_api::hv_x86_reg_t::*;
use hvf_api::vmcs::*;
use hvf_api::vmx::*;
use hvf_api::VcpuHw;

use crate::error::Fatal;
use crate::vmx::HwAccess;

/// Raw VMCS state describing one VM exit.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ExitRecord {
    pub reason: u32,
    pub qualification: u64,
    /// The length of the instruction which triggered the exit.
    /// Zero if inapplicable to the exit or unknown.
    pub inst_len: u8,
    pub idt_vectoring: u64,
    pub rip: u64,
    pub rflags: u64,
    /// Faulting guest-physical address, meaningful for EPT exits.
    pub gpa: u64,
}

impl ExitRecord {
    /// Read the exit state of `hw` after a run call returned.
    pub(crate) fn read(hw: &dyn VcpuHw) -> Result<Self, Fatal> {
        Ok(Self {
            reason: hw.rvmcs(VMCS_EXIT_REASON)? as u32 & VMX_REASON_MASK,
            qualification: hw.rvmcs(VMCS_EXIT_QUALIFICATION)?,
            inst_len: hw.rvmcs(VMCS_EXIT_INSTRUCTION_LENGTH)? as u8,
            idt_vectoring: hw.rvmcs(VMCS_IDT_VECTORING_INFO)?,
            rip: hw.rreg(HV_X86_RIP)?,
            rflags: hw.rreg(HV_X86_RFLAGS)?,
            gpa: hw.rvmcs(VMCS_GUEST_PHYSICAL_ADDRESS)?,
        })
    }

    /// An event was being delivered through the IDT when the exit happened.
    pub fn vectoring_valid(&self) -> bool {
        self.idt_vectoring & VMCS_INTR_VALID != 0
    }

    pub fn kind(&self) -> VmExitKind {
        VmExitKind::from(self)
    }
}

/// A port I/O exit, decoded from its qualification.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct IoQual {
    pub port: u16,
    pub bytes: u8,
    pub is_in: bool,
    pub string: bool,
    pub rep: bool,
}

impl From<u64> for IoQual {
    fn from(q: u64) -> Self {
        Self {
            port: (q >> 16) as u16,
            bytes: (q & 0x7) as u8 + 1,
            is_in: q & 0x8 != 0,
            string: q & 0x10 != 0,
            rep: q & 0x20 != 0,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CrAccessType {
    MovTo,
    MovFrom,
    Clts,
    Lmsw,
}

/// A control-register access exit, decoded from its qualification.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CrAccess {
    pub cr: u8,
    pub access: CrAccessType,
    /// Encoding of the general purpose register operand.
    pub gpr: u8,
}

impl From<u64> for CrAccess {
    fn from(q: u64) -> Self {
        let access = match (q >> 4) & 0x3 {
            0 => CrAccessType::MovTo,
            1 => CrAccessType::MovFrom,
            2 => CrAccessType::Clts,
            _ => CrAccessType::Lmsw,
        };
        Self { cr: (q & 0xf) as u8, access, gpr: ((q >> 8) & 0xf) as u8 }
    }
}

/// An EPT violation, decoded from its qualification.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct EptViolation {
    pub gpa: u64,
    pub read: bool,
    pub write: bool,
    pub fetch: bool,
    /// The access came from a linear-to-physical translation.
    pub translated: bool,
    pub nmi_unblocked: bool,
}

impl EptViolation {
    fn new(gpa: u64, q: u64) -> Self {
        Self {
            gpa,
            read: q & EPT_VIOLATION_DATA_READ != 0,
            write: q & EPT_VIOLATION_DATA_WRITE != 0,
            fetch: q & EPT_VIOLATION_INST_FETCH != 0,
            translated: q & EPT_VIOLATION_GLA_VALID != 0
                && q & EPT_VIOLATION_XLAT_VALID != 0,
            nmi_unblocked: q & EXIT_QUAL_NMIUDTI != 0,
        }
    }

    /// A data access to memory which no slot backs: device MMIO.
    pub fn is_emulation_fault(&self) -> bool {
        (self.read || self.write) && self.translated && !self.fetch
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TaskSwitchSource {
    Call,
    Iret,
    Jmp,
    Gate,
}

/// A task switch exit.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TaskSwitch {
    pub selector: u16,
    pub source: TaskSwitchSource,
    /// Raw IDT-vectoring information of the event, when the switch happened
    /// through a task gate during event delivery.
    pub vectoring: Option<u64>,
    pub inst_len: u8,
}

impl TaskSwitch {
    fn new(q: u64, idt_vectoring: u64, inst_len: u8) -> Self {
        let source = match (q >> 30) & 0x3 {
            0 => TaskSwitchSource::Call,
            1 => TaskSwitchSource::Iret,
            2 => TaskSwitchSource::Jmp,
            _ => TaskSwitchSource::Gate,
        };
        Self {
            selector: (q & 0xffff) as u16,
            source,
            vectoring: (idt_vectoring & VMCS_INTR_VALID != 0)
                .then_some(idt_vectoring),
            inst_len,
        }
    }

    pub fn vector(&self) -> Option<u8> {
        self.vectoring.map(|v| (v & VMCS_INTR_VECTOR_MASK) as u8)
    }
}

/// Describes the reason for exiting execution of a vCPU.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum VmExitKind {
    Hlt,
    Mwait,
    EptViolation(EptViolation),
    Io(IoQual),
    Cpuid,
    Xsetbv,
    IrqWindow,
    NmiWindow,
    ExternalInterrupt,
    Rdmsr,
    Wrmsr,
    CrAccess(CrAccess),
    ApicAccess,
    TprThreshold,
    TaskSwitch(TaskSwitch),
    TripleFault,
    Rdpmc,
    Vmcall,
    Unhandled(u32),
}

impl From<&ExitRecord> for VmExitKind {
    fn from(exit: &ExitRecord) -> Self {
        let q = exit.qualification;
        match exit.reason {
            VMX_REASON_HLT => VmExitKind::Hlt,
            VMX_REASON_MWAIT => VmExitKind::Mwait,
            VMX_REASON_EPT_VIOLATION => {
                VmExitKind::EptViolation(EptViolation::new(exit.gpa, q))
            }
            VMX_REASON_IO => VmExitKind::Io(IoQual::from(q)),
            VMX_REASON_CPUID => VmExitKind::Cpuid,
            VMX_REASON_XSETBV => VmExitKind::Xsetbv,
            VMX_REASON_IRQ_WND => VmExitKind::IrqWindow,
            VMX_REASON_VIRTUAL_NMI_WND => VmExitKind::NmiWindow,
            VMX_REASON_IRQ => VmExitKind::ExternalInterrupt,
            VMX_REASON_RDMSR => VmExitKind::Rdmsr,
            VMX_REASON_WRMSR => VmExitKind::Wrmsr,
            VMX_REASON_MOV_CR => VmExitKind::CrAccess(CrAccess::from(q)),
            VMX_REASON_APIC_ACCESS => VmExitKind::ApicAccess,
            VMX_REASON_TPR_THRESHOLD => VmExitKind::TprThreshold,
            VMX_REASON_TASK => VmExitKind::TaskSwitch(TaskSwitch::new(
                q,
                exit.idt_vectoring,
                exit.inst_len,
            )),
            VMX_REASON_TRIPLE_FAULT => VmExitKind::TripleFault,
            VMX_REASON_RDPMC => VmExitKind::Rdpmc,
            VMX_REASON_VMCALL => VmExitKind::Vmcall,
            other => VmExitKind::Unhandled(other),
        }
    }
}
