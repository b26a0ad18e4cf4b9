// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interrupt delivery between the emulated interrupt controller and the
//! hardware vCPU.

use hvf_api::hv_x86_reg_t::*;
use hvf_api::vmcs::*;
use hvf_api::vmx::*;
use hvf_api::VcpuHw;

use crate::error::Fatal;
use crate::exits::ExitRecord;
use crate::vmx::{self, HwAccess};

/// Exception vectors which are injected as software exceptions when
/// re-delivered.
const BP_VECTOR: u64 = 3;
const OF_VECTOR: u64 = 4;

/// The local interrupt controller model of one vCPU.
pub trait InterruptController {
    /// Highest vector pending in the IRR, if any.
    fn highest_pending_priority(&self) -> Option<u8>;

    /// Task priority, as the 4-bit value of CR8.
    fn get_tpr(&self) -> u8;
    fn set_tpr(&self, tpr: u8);

    /// A maskable external interrupt is awaiting delivery.
    fn hard_interrupt_pending(&self) -> bool;
    fn nmi_pending(&self) -> bool;

    /// Consume the pending NMI.
    fn take_nmi(&self);

    /// Accept the highest priority pending interrupt for delivery.
    fn acknowledge(&self) -> Option<u8>;
}

/// Compute the TPR threshold which makes the guest exit once it lowers its
/// task priority below that of the highest pending interrupt.
pub fn tpr_threshold(tpr: u8, irr: Option<u8>) -> u8 {
    let tpr = (tpr & 0xf) << 4;
    match irr {
        None => 0,
        Some(irr) if irr > tpr => tpr >> 4,
        Some(irr) => irr >> 4,
    }
}

/// Load the controller's task priority into the hardware TPR shadow.
pub(crate) fn update_tpr(
    hw: &dyn VcpuHw,
    apic: &dyn InterruptController,
) -> Result<(), Fatal> {
    let tpr = apic.get_tpr() & 0xf;
    hw.wreg(HV_X86_TPR, u64::from(tpr) << 4)?;
    let threshold = tpr_threshold(tpr, apic.highest_pending_priority());
    hw.wvmcs(VMCS_TPR_THRESHOLD, u64::from(threshold))
}

/// Propagate task priority changes the guest made while running.
pub(crate) fn sync_tpr_from_hw(
    hw: &dyn VcpuHw,
    apic: &dyn InterruptController,
) -> Result<(), Fatal> {
    apic.set_tpr((hw.rreg(HV_X86_TPR)? >> 4) as u8);
    Ok(())
}

/// Queue pending events for delivery on the next VM entry.
///
/// `last` is the exit which preceded this entry, if any.  An event whose
/// delivery it interrupted is re-injected first.  An event an exit handler
/// already queued (such as a #GP from a faulting WRMSR) is never displaced;
/// pending NMIs and interrupts then wait for their window instead.
pub(crate) fn inject_interrupts(
    hw: &dyn VcpuHw,
    apic: &dyn InterruptController,
    last: Option<&ExitRecord>,
    interruptible: bool,
) -> Result<(), Fatal> {
    let mut queued = hw.rvmcs(VMCS_ENTRY_INTR_INFO)? & VMCS_INTR_VALID != 0;

    if let Some(exit) = last.filter(|e| e.vectoring_valid()) {
        let info = exit.idt_vectoring;
        let vector = info & VMCS_INTR_VECTOR_MASK;
        let mut kind = info & VMCS_INTR_T_MASK;

        if kind == VMCS_INTR_T_NMI && exit.reason != VMX_REASON_TASK {
            vmx::clear_nmi_blocking(hw)?;
        }
        if exit.reason != VMX_REASON_TASK {
            if kind == VMCS_INTR_T_HWEXCEPTION
                && (vector == BP_VECTOR || vector == OF_VECTOR)
            {
                kind = VMCS_INTR_T_SWEXCEPTION;
            }
            if matches!(
                kind,
                VMCS_INTR_T_SWINTR
                    | VMCS_INTR_T_PRIV_SWEXCEPTION
                    | VMCS_INTR_T_SWEXCEPTION
            ) {
                hw.wvmcs(VMCS_ENTRY_INST_LENGTH, u64::from(exit.inst_len))?;
            }

            let mut entry = vector | kind | VMCS_INTR_VALID;
            if info & VMCS_INTR_DEL_ERRCODE != 0 {
                let code = hw.rvmcs(VMCS_IDT_VECTORING_ERROR)?;
                hw.wvmcs(VMCS_ENTRY_EXCEPTION_ERROR, code)?;
                entry |= VMCS_INTR_DEL_ERRCODE;
            }
            hw.wvmcs(VMCS_ENTRY_INTR_INFO, entry)?;
            queued = true;
        }
    }

    if apic.nmi_pending() {
        let blocked = hw.rvmcs(VMCS_GUEST_INTERRUPTIBILITY)?
            & VMCS_INTERRUPTIBILITY_NMI_BLOCKING
            != 0;
        if !blocked && !queued {
            apic.take_nmi();
            hw.wvmcs(
                VMCS_ENTRY_INTR_INFO,
                2 | VMCS_INTR_T_NMI | VMCS_INTR_VALID,
            )?;
            queued = true;
        } else {
            vmx::set_nmi_window_exiting(hw)?;
        }
    }

    if apic.hard_interrupt_pending() {
        let rflags = hw.rreg(HV_X86_RFLAGS)?;
        if interruptible && rflags & RFLAGS_IF != 0 && !queued {
            if let Some(vector) = apic.acknowledge() {
                hw.wvmcs(
                    VMCS_ENTRY_INTR_INFO,
                    u64::from(vector) | VMCS_INTR_T_HWINTR | VMCS_INTR_VALID,
                )?;
            }
        }
        if apic.hard_interrupt_pending() {
            vmx::set_int_window_exiting(hw)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{FakeApic, FakeVcpu};
    use proptest::prelude::*;

    #[test]
    fn threshold() {
        assert_eq!(tpr_threshold(3, None), 0);
        // pending vector above current priority: exit when TPR drops
        assert_eq!(tpr_threshold(3, Some(0x51)), 3);
        // pending vector masked by priority: threshold at its class
        assert_eq!(tpr_threshold(6, Some(0x51)), 5);
    }

    proptest! {
        #[test]
        fn threshold_never_exceeds_tpr(tpr in 0u8..16, irr in any::<u8>()) {
            prop_assert!(tpr_threshold(tpr, Some(irr)) <= tpr);
        }
    }

    #[test]
    fn tpr_round_trip() {
        let (hw, state) = FakeVcpu::new(0);
        let apic = FakeApic::default();
        apic.set_tpr(2);
        apic.raise(0x31);

        update_tpr(&hw, &apic).unwrap();
        {
            let st = state.lock().unwrap();
            assert_eq!(st.reg(HV_X86_TPR), 0x20);
            assert_eq!(st.vmcs(VMCS_TPR_THRESHOLD), 2);
        }

        state.lock().unwrap().set_reg(HV_X86_TPR, 0x70);
        sync_tpr_from_hw(&hw, &apic).unwrap();
        assert_eq!(apic.get_tpr(), 7);
    }

    #[test]
    fn injects_hard_interrupt_when_open() {
        let (hw, state) = FakeVcpu::new(0);
        let apic = FakeApic::default();
        apic.raise(0x40);
        hw.write_reg(HV_X86_RFLAGS, RFLAGS_IF | RFLAGS_RESERVED1).unwrap();

        inject_interrupts(&hw, &apic, None, true).unwrap();
        let st = state.lock().unwrap();
        assert_eq!(
            st.vmcs(VMCS_ENTRY_INTR_INFO),
            0x40 | VMCS_INTR_T_HWINTR | VMCS_INTR_VALID
        );
        assert_eq!(st.vmcs(VMCS_PRI_PROC_BASED_CTLS) & CPU_BASED_IRQ_WND, 0);
        assert!(!apic.hard_interrupt_pending());
    }

    #[test]
    fn masked_interrupt_requests_window() {
        let (hw, state) = FakeVcpu::new(0);
        let apic = FakeApic::default();
        apic.raise(0x40);
        hw.write_reg(HV_X86_RFLAGS, RFLAGS_RESERVED1).unwrap();

        inject_interrupts(&hw, &apic, None, true).unwrap();
        let st = state.lock().unwrap();
        assert_eq!(st.vmcs(VMCS_ENTRY_INTR_INFO), 0);
        assert_ne!(st.vmcs(VMCS_PRI_PROC_BASED_CTLS) & CPU_BASED_IRQ_WND, 0);
        assert!(apic.hard_interrupt_pending());
    }

    #[test]
    fn nmi_waits_for_unblock() {
        let (hw, state) = FakeVcpu::new(0);
        let apic = FakeApic::default();
        apic.raise_nmi();
        hw.write_vmcs(
            VMCS_GUEST_INTERRUPTIBILITY,
            VMCS_INTERRUPTIBILITY_NMI_BLOCKING,
        )
        .unwrap();

        inject_interrupts(&hw, &apic, None, true).unwrap();
        assert!(apic.nmi_pending());
        assert_ne!(
            state.lock().unwrap().vmcs(VMCS_PRI_PROC_BASED_CTLS)
                & CPU_BASED_VIRTUAL_NMI_WND,
            0
        );

        hw.write_vmcs(VMCS_GUEST_INTERRUPTIBILITY, 0).unwrap();
        inject_interrupts(&hw, &apic, None, true).unwrap();
        assert!(!apic.nmi_pending());
        assert_eq!(
            state.lock().unwrap().vmcs(VMCS_ENTRY_INTR_INFO),
            2 | VMCS_INTR_T_NMI | VMCS_INTR_VALID
        );
    }

    #[test]
    fn queued_exception_is_kept() {
        let (hw, state) = FakeVcpu::new(0);
        let apic = FakeApic::default();
        let gp = 13
            | VMCS_INTR_T_HWEXCEPTION
            | VMCS_INTR_DEL_ERRCODE
            | VMCS_INTR_VALID;
        hw.write_vmcs(VMCS_ENTRY_INTR_INFO, gp).unwrap();
        apic.raise(0x40);
        apic.raise_nmi();
        hw.write_reg(HV_X86_RFLAGS, RFLAGS_IF | RFLAGS_RESERVED1).unwrap();

        inject_interrupts(&hw, &apic, None, true).unwrap();
        let st = state.lock().unwrap();
        assert_eq!(st.vmcs(VMCS_ENTRY_INTR_INFO), gp);
        assert!(apic.hard_interrupt_pending());
        assert!(apic.nmi_pending());
        let ctls = st.vmcs(VMCS_PRI_PROC_BASED_CTLS);
        assert_ne!(ctls & CPU_BASED_IRQ_WND, 0);
        assert_ne!(ctls & CPU_BASED_VIRTUAL_NMI_WND, 0);
    }

    #[test]
    fn reinjects_interrupted_event() {
        let (hw, state) = FakeVcpu::new(0);
        let apic = FakeApic::default();
        apic.raise(0x50);
        hw.write_reg(HV_X86_RFLAGS, RFLAGS_IF).unwrap();
        hw.write_vmcs(VMCS_IDT_VECTORING_ERROR, 0x18).unwrap();

        // #GP with error code, interrupted by an EPT violation
        let exit = ExitRecord {
            reason: VMX_REASON_EPT_VIOLATION,
            idt_vectoring: 13
                | VMCS_INTR_T_HWEXCEPTION
                | VMCS_INTR_DEL_ERRCODE
                | VMCS_INTR_VALID,
            ..Default::default()
        };
        inject_interrupts(&hw, &apic, Some(&exit), true).unwrap();

        let st = state.lock().unwrap();
        assert_eq!(st.vmcs(VMCS_ENTRY_INTR_INFO), exit.idt_vectoring);
        assert_eq!(st.vmcs(VMCS_ENTRY_EXCEPTION_ERROR), 0x18);
        // the hard interrupt waits for a window
        assert!(apic.hard_interrupt_pending());
        assert_ne!(st.vmcs(VMCS_PRI_PROC_BASED_CTLS) & CPU_BASED_IRQ_WND, 0);
    }

    #[test]
    fn breakpoint_reinjected_as_software_exception() {
        let (hw, state) = FakeVcpu::new(0);
        let apic = FakeApic::default();
        let exit = ExitRecord {
            reason: VMX_REASON_EPT_VIOLATION,
            idt_vectoring: 3 | VMCS_INTR_T_HWEXCEPTION | VMCS_INTR_VALID,
            inst_len: 1,
            ..Default::default()
        };
        inject_interrupts(&hw, &apic, Some(&exit), true).unwrap();

        let st = state.lock().unwrap();
        assert_eq!(
            st.vmcs(VMCS_ENTRY_INTR_INFO),
            3 | VMCS_INTR_T_SWEXCEPTION | VMCS_INTR_VALID
        );
        assert_eq!(st.vmcs(VMCS_ENTRY_INST_LENGTH), 1);
    }
}
