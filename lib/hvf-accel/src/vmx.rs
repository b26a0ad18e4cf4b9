// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Low-level VMCS manipulation shared by the register cache and the exit
//! handlers.

use hvf_api::hv_x86_reg_t::{self, *};
use hvf_api::vmcs::*;
use hvf_api::vmx::*;
use hvf_api::VcpuHw;

use crate::error::{Fatal, HvResultExt};
use crate::vmm::SlotManager;

/// Register and VMCS accessors which report failures as [`Fatal`].
pub(crate) trait HwAccess {
    fn rreg(&self, reg: hv_x86_reg_t) -> Result<u64, Fatal>;
    fn wreg(&self, reg: hv_x86_reg_t, val: u64) -> Result<(), Fatal>;
    fn rvmcs(&self, field: u32) -> Result<u64, Fatal>;
    fn wvmcs(&self, field: u32, val: u64) -> Result<(), Fatal>;
}

impl<T: VcpuHw + ?Sized> HwAccess for T {
    fn rreg(&self, reg: hv_x86_reg_t) -> Result<u64, Fatal> {
        self.read_reg(reg).during("hv_vcpu_read_register")
    }
    fn wreg(&self, reg: hv_x86_reg_t, val: u64) -> Result<(), Fatal> {
        self.write_reg(reg, val).during("hv_vcpu_write_register")
    }
    fn rvmcs(&self, field: u32) -> Result<u64, Fatal> {
        self.read_vmcs(field).during("hv_vmx_vcpu_read_vmcs")
    }
    fn wvmcs(&self, field: u32, val: u64) -> Result<(), Fatal> {
        self.write_vmcs(field, val).during("hv_vmx_vcpu_write_vmcs")
    }
}

/// Compute a VMX control value from its capability word.
///
/// The low half of `cap` holds the bits which must be 1, the high half the
/// bits which may be 1.  Requested optional bits the hardware does not allow
/// are dropped.
pub(crate) fn cap2ctrl(cap: u64, ctrl: u64) -> u64 {
    (ctrl | (cap & 0xffff_ffff)) & (cap >> 32)
}

pub(crate) fn flush_tlb(hw: &dyn VcpuHw) -> Result<(), Fatal> {
    hw.invalidate_tlb().during("hv_vcpu_invalidate_tlb")?;
    hw.flush().during("hv_vcpu_flush")
}

/// Set the guest RIP, ending any STI or MOV SS interrupt shadow.
pub(crate) fn set_rip(hw: &dyn VcpuHw, rip: u64) -> Result<(), Fatal> {
    hw.wreg(HV_X86_RIP, rip)?;

    let shadow =
        VMCS_INTERRUPTIBILITY_STI_BLOCKING | VMCS_INTERRUPTIBILITY_MOVSS_BLOCKING;
    let val = hw.rvmcs(VMCS_GUEST_INTERRUPTIBILITY)?;
    if val & shadow != 0 {
        hw.wvmcs(VMCS_GUEST_INTERRUPTIBILITY, val & !shadow)?;
    }
    Ok(())
}

/// Step the guest past the instruction which caused the current exit.
pub(crate) fn advance_rip(hw: &dyn VcpuHw, len: u8) -> Result<(), Fatal> {
    let rip = hw.rreg(HV_X86_RIP)?;
    set_rip(hw, rip.wrapping_add(u64::from(len)))
}

fn update_vmcs(
    hw: &dyn VcpuHw,
    field: u32,
    set: u64,
    clear: u64,
) -> Result<(), Fatal> {
    let val = hw.rvmcs(field)?;
    let new = (val | set) & !clear;
    if new != val {
        hw.wvmcs(field, new)?;
    }
    Ok(())
}

pub(crate) fn set_int_window_exiting(hw: &dyn VcpuHw) -> Result<(), Fatal> {
    update_vmcs(hw, VMCS_PRI_PROC_BASED_CTLS, CPU_BASED_IRQ_WND, 0)
}

pub(crate) fn clear_int_window_exiting(hw: &dyn VcpuHw) -> Result<(), Fatal> {
    update_vmcs(hw, VMCS_PRI_PROC_BASED_CTLS, 0, CPU_BASED_IRQ_WND)
}

pub(crate) fn set_nmi_window_exiting(hw: &dyn VcpuHw) -> Result<(), Fatal> {
    update_vmcs(hw, VMCS_PRI_PROC_BASED_CTLS, CPU_BASED_VIRTUAL_NMI_WND, 0)
}

pub(crate) fn clear_nmi_window_exiting(hw: &dyn VcpuHw) -> Result<(), Fatal> {
    update_vmcs(hw, VMCS_PRI_PROC_BASED_CTLS, 0, CPU_BASED_VIRTUAL_NMI_WND)
}

pub(crate) fn set_nmi_blocking(hw: &dyn VcpuHw) -> Result<(), Fatal> {
    update_vmcs(
        hw,
        VMCS_GUEST_INTERRUPTIBILITY,
        VMCS_INTERRUPTIBILITY_NMI_BLOCKING,
        0,
    )
}

pub(crate) fn clear_nmi_blocking(hw: &dyn VcpuHw) -> Result<(), Fatal> {
    update_vmcs(
        hw,
        VMCS_GUEST_INTERRUPTIBILITY,
        0,
        VMCS_INTERRUPTIBILITY_NMI_BLOCKING,
    )
}

/// Queue a hardware exception for delivery on the next VM entry.
pub(crate) fn inject_exception(
    hw: &dyn VcpuHw,
    vector: u8,
    error_code: Option<u32>,
) -> Result<(), Fatal> {
    let mut info =
        u64::from(vector) | VMCS_INTR_T_HWEXCEPTION | VMCS_INTR_VALID;
    if let Some(code) = error_code {
        info |= VMCS_INTR_DEL_ERRCODE;
        hw.wvmcs(VMCS_ENTRY_EXCEPTION_ERROR, u64::from(code))?;
    }
    hw.wvmcs(VMCS_ENTRY_INTR_INFO, info)
}

fn enter_long_mode(hw: &dyn VcpuHw, efer: u64) -> Result<(), Fatal> {
    hw.wvmcs(VMCS_GUEST_IA32_EFER, efer | EFER_LMA)?;
    update_vmcs(hw, VMCS_ENTRY_CTLS, VMENTRY_GUEST_IA32E, 0)?;

    // Long mode requires TR to reference a busy 64-bit TSS.
    let tr_ar = hw.rvmcs(VMCS_GUEST_TR_ACCESS_RIGHTS)?;
    if tr_ar & AR_TYPE_MASK != AR_TYPE_BUSY_64_TSS {
        hw.wvmcs(
            VMCS_GUEST_TR_ACCESS_RIGHTS,
            (tr_ar & !AR_TYPE_MASK) | AR_TYPE_BUSY_64_TSS,
        )?;
    }
    Ok(())
}

fn exit_long_mode(hw: &dyn VcpuHw, efer: u64) -> Result<(), Fatal> {
    update_vmcs(hw, VMCS_ENTRY_CTLS, 0, VMENTRY_GUEST_IA32E)?;
    hw.wvmcs(VMCS_GUEST_IA32_EFER, efer & !EFER_LMA)
}

/// Write guest EFER, keeping the IA-32e entry control consistent with LMA.
pub(crate) fn set_efer(hw: &dyn VcpuHw, efer: u64) -> Result<(), Fatal> {
    hw.wvmcs(VMCS_GUEST_IA32_EFER, efer)?;
    if efer & EFER_LMA != 0 {
        update_vmcs(hw, VMCS_ENTRY_CTLS, VMENTRY_GUEST_IA32E, 0)
    } else {
        update_vmcs(hw, VMCS_ENTRY_CTLS, 0, VMENTRY_GUEST_IA32E)
    }
}

/// Emulate a guest write of `cr0`.
pub(crate) fn set_cr0(
    hw: &dyn VcpuHw,
    cr0: u64,
    mem: &SlotManager,
) -> Result<(), Fatal> {
    let efer = hw.rvmcs(VMCS_GUEST_IA32_EFER)?;
    let old_cr0 = hw.rvmcs(VMCS_GUEST_CR0)?;

    // PAE paging outside of long mode takes its top-level entries from the
    // VMCS rather than from memory.
    let mut pdpte = [0u64; 4];
    if cr0 & CR0_PG != 0
        && hw.rvmcs(VMCS_GUEST_CR4)? & CR4_PAE != 0
        && efer & EFER_LME == 0
    {
        let cr3 = hw.rvmcs(VMCS_GUEST_CR3)?;
        let mut buf = [0u8; 32];
        if mem.read_phys(cr3 & !0x1f, &mut buf) {
            for (i, chunk) in buf.chunks_exact(8).enumerate() {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(chunk);
                pdpte[i] = u64::from_le_bytes(raw);
            }
        }
    }
    let fields = [
        VMCS_GUEST_PDPTE0,
        VMCS_GUEST_PDPTE1,
        VMCS_GUEST_PDPTE2,
        VMCS_GUEST_PDPTE3,
    ];
    for (field, val) in fields.into_iter().zip(pdpte) {
        hw.wvmcs(field, val)?;
    }

    hw.wvmcs(VMCS_CR0_MASK, CR0_CD | CR0_NE | CR0_PG)?;
    hw.wvmcs(VMCS_CR0_SHADOW, cr0)?;
    hw.wvmcs(VMCS_GUEST_CR0, (cr0 & !CR0_CD) | CR0_NE | CR0_ET)?;

    if efer & EFER_LME != 0 {
        if old_cr0 & CR0_PG == 0 && cr0 & CR0_PG != 0 {
            enter_long_mode(hw, efer)?;
        }
        if cr0 & CR0_PG == 0 {
            exit_long_mode(hw, efer)?;
        }
    }

    flush_tlb(hw)
}

/// Emulate a guest write of `cr4`.
pub(crate) fn set_cr4(hw: &dyn VcpuHw, cr4: u64) -> Result<(), Fatal> {
    hw.wvmcs(VMCS_CR4_SHADOW, cr4)?;
    hw.wvmcs(VMCS_GUEST_CR4, cr4 | CR4_VMXE)?;
    flush_tlb(hw)
}

fn guest_visible(hw: &dyn VcpuHw, real: u32, mask: u32, shadow: u32)
    -> Result<u64, Fatal>
{
    let mask = hw.rvmcs(mask)?;
    Ok((hw.rvmcs(real)? & !mask) | (hw.rvmcs(shadow)? & mask))
}

/// CR0 as the guest observes it, with host-owned bits read from the shadow.
pub(crate) fn guest_cr0(hw: &dyn VcpuHw) -> Result<u64, Fatal> {
    guest_visible(hw, VMCS_GUEST_CR0, VMCS_CR0_MASK, VMCS_CR0_SHADOW)
}

/// CR4 as the guest observes it, with host-owned bits read from the shadow.
pub(crate) fn guest_cr4(hw: &dyn VcpuHw) -> Result<u64, Fatal> {
    guest_visible(hw, VMCS_GUEST_CR4, VMCS_CR4_MASK, VMCS_CR4_SHADOW)
}
