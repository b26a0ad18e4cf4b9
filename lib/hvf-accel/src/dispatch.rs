// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The per-vCPU run loop and VM exit handling.

use hvf_api::hv_x86_reg_t::*;
use hvf_api::vmcs::*;
use hvf_api::vmx::*;

use crate::emul::{self, InsnEmulator};
use crate::error::{Fatal, HvResultExt};
use crate::exits::{
    CrAccess, CrAccessType, EptViolation, ExitRecord, IoQual, VmExitKind,
};
use crate::intr::{self, InterruptController};
use crate::lock::ExecGuard;
use crate::msr::{MsrHandler, MsrId, RdmsrOutcome, WrmsrOutcome};
use crate::pio::{self, PortIo};
use crate::vcpu::Vcpu;
use crate::vmx::{self, HwAccess};

/// Vector of the general protection exception.
const GP_VECTOR: u8 = 13;

/// Why [`run_vcpu`] returned control to the scheduler.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// The vCPU has nothing to run: it is halted, waiting for a startup IPI,
    /// or was asked to exit.
    Halted,
    /// Interrupt or machine state needs to be re-evaluated before the vCPU
    /// runs again.
    Interrupted,
}

/// Disposition of a single exit.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Step {
    Resume,
    Halted,
    Interrupted,
    /// The guest lowered its task priority below a pending interrupt.
    Attention,
}

/// The machine emulator's collaborators a vCPU consults while handling
/// exits.
pub struct Platform<'a> {
    pub intr: &'a dyn InterruptController,
    pub ports: &'a dyn PortIo,
    pub emul: &'a mut dyn InsnEmulator,
    pub msrs: &'a mut dyn MsrHandler,
}

/// Run `vcpu` until the scheduler needs to regain control.
///
/// `guard` must be held on entry.  It is released only for the duration of
/// each hardware run call.
pub fn run_vcpu(
    vcpu: &mut Vcpu,
    guard: &mut ExecGuard<'_>,
    plat: &mut Platform<'_>,
) -> Result<Outcome, Fatal> {
    vcpu.halted = vcpu.wait_for_sipi;

    loop {
        if vcpu.service_requests()? {
            return Ok(Outcome::Halted);
        }
        vcpu.sync_before_run()?;

        let last = vcpu.last_exit.take();
        let hw = vcpu.hw();
        let shadow = VMCS_INTERRUPTIBILITY_STI_BLOCKING
            | VMCS_INTERRUPTIBILITY_MOVSS_BLOCKING;
        let interruptible =
            hw.rvmcs(VMCS_GUEST_INTERRUPTIBILITY)? & shadow == 0;
        intr::inject_interrupts(hw, plat.intr, last.as_ref(), interruptible)?;
        intr::update_tpr(hw, plat.intr)?;

        let parked = !vcpu.is_bsp() && vcpu.halted;
        let exit = guard.unlocked(|| {
            if parked {
                return Ok(None);
            }
            hw.run().during("hv_vcpu_run")?;
            ExitRecord::read(hw).map(Some)
        })?;
        let Some(exit) = exit else {
            return Ok(Outcome::Halted);
        };

        slog::trace!(vcpu.log, "vm exit";
            "reason" => exit.reason,
            "rip" => format_args!("{:#x}", exit.rip),
            "qualification" => format_args!("{:#x}", exit.qualification),
        );
        intr::sync_tpr_from_hw(hw, plat.intr)?;

        let step = handle_exit(vcpu, &exit, plat)?;
        vcpu.last_exit = Some(exit);
        match step {
            Step::Resume => {}
            Step::Halted => return Ok(Outcome::Halted),
            Step::Interrupted | Step::Attention => {
                return Ok(Outcome::Interrupted)
            }
        }
    }
}

/// Run `vcpu`, terminating the process on any unrecoverable error.
pub fn run_vcpu_or_abort(
    vcpu: &mut Vcpu,
    guard: &mut ExecGuard<'_>,
    plat: &mut Platform<'_>,
) -> Outcome {
    match run_vcpu(vcpu, guard, plat) {
        Ok(outcome) => outcome,
        Err(e) => e.abort(&vcpu.log),
    }
}

fn handle_exit(
    vcpu: &mut Vcpu,
    exit: &ExitRecord,
    plat: &mut Platform<'_>,
) -> Result<Step, Fatal> {
    match exit.kind() {
        VmExitKind::Hlt => {
            vcpu.advance_rip(exit.inst_len)?;
            let irq = plat.intr.hard_interrupt_pending()
                && exit.rflags & RFLAGS_IF != 0;
            if !irq && !plat.intr.nmi_pending() && !exit.vectoring_valid() {
                vcpu.halted = true;
            }
            Ok(Step::Interrupted)
        }
        VmExitKind::Mwait => Ok(Step::Interrupted),
        VmExitKind::EptViolation(ept) => handle_ept(vcpu, exit, &ept, plat),
        VmExitKind::Io(io) => handle_io(vcpu, exit, &io, plat),
        VmExitKind::Cpuid => {
            let leaf = vcpu.gpr(HV_X86_RAX)? as u32;
            let subleaf = vcpu.gpr(HV_X86_RCX)? as u32;
            let machine = vcpu.machine().clone();
            let vals = vcpu.cpuid.cpuid(machine.cpuid_source(), leaf, subleaf);

            vcpu.set_gpr(HV_X86_RAX, u64::from(vals.eax))?;
            vcpu.set_gpr(HV_X86_RBX, u64::from(vals.ebx))?;
            vcpu.set_gpr(HV_X86_RCX, u64::from(vals.ecx))?;
            vcpu.set_gpr(HV_X86_RDX, u64::from(vals.edx))?;
            vcpu.advance_rip(exit.inst_len)?;
            Ok(Step::Resume)
        }
        VmExitKind::Xsetbv => {
            // Only XCR0 exists.
            if vcpu.gpr(HV_X86_RCX)? as u32 == 0 {
                let eax = vcpu.gpr(HV_X86_RAX)? & 0xffff_ffff;
                let edx = vcpu.gpr(HV_X86_RDX)? & 0xffff_ffff;
                vcpu.write_xcr0((edx << 32) | eax)?;
            }
            vcpu.advance_rip(exit.inst_len)?;
            Ok(Step::Resume)
        }
        VmExitKind::IrqWindow => {
            vmx::clear_int_window_exiting(vcpu.hw())?;
            Ok(Step::Interrupted)
        }
        VmExitKind::NmiWindow => {
            vmx::clear_nmi_window_exiting(vcpu.hw())?;
            Ok(Step::Interrupted)
        }
        VmExitKind::ExternalInterrupt => Ok(Step::Interrupted),
        VmExitKind::Rdmsr => handle_rdmsr(vcpu, exit, plat),
        VmExitKind::Wrmsr => handle_wrmsr(vcpu, exit, plat),
        VmExitKind::CrAccess(cr) => handle_cr(vcpu, exit, &cr, plat),
        VmExitKind::ApicAccess => {
            emul::emulate(vcpu, exit, false, plat.emul, plat.ports)?;
            Ok(Step::Resume)
        }
        VmExitKind::TprThreshold => Ok(Step::Attention),
        VmExitKind::TaskSwitch(ts) => {
            emul::task_switch(vcpu, exit, &ts, plat.emul)?;
            Ok(Step::Resume)
        }
        VmExitKind::TripleFault => {
            let machine = vcpu.machine().clone();
            slog::warn!(vcpu.log, "triple fault";
                "rip" => format_args!("{:#x}", exit.rip),
            );
            machine.request_reset();
            std::thread::sleep(machine.config().accel.triple_fault_backoff());
            Ok(Step::Interrupted)
        }
        VmExitKind::Rdpmc => {
            vcpu.set_gpr(HV_X86_RAX, 0)?;
            vcpu.set_gpr(HV_X86_RDX, 0)?;
            vcpu.advance_rip(exit.inst_len)?;
            Ok(Step::Resume)
        }
        VmExitKind::Vmcall => {
            let nr = vcpu.gpr(HV_X86_RAX)?;
            slog::warn!(vcpu.log, "ignoring hypercall"; "rax" => nr);
            vcpu.advance_rip(exit.inst_len)?;
            Ok(Step::Resume)
        }
        VmExitKind::Unhandled(reason) => {
            slog::warn!(vcpu.log, "unhandled exit";
                "reason" => reason,
                "rip" => format_args!("{:#x}", exit.rip),
            );
            Ok(Step::Resume)
        }
    }
}

fn handle_ept(
    vcpu: &mut Vcpu,
    exit: &ExitRecord,
    ept: &EptViolation,
    plat: &mut Platform<'_>,
) -> Result<Step, Fatal> {
    if !exit.vectoring_valid() && ept.nmi_unblocked {
        vmx::set_nmi_blocking(vcpu.hw())?;
    }

    let machine = vcpu.machine().clone();
    let slots = machine.slots();
    if slots.slot_at(ept.gpa).is_some() {
        if !slots.handle_protection_fault(ept.gpa, ept.write)? {
            slog::warn!(vcpu.log, "unexpected fault on mapped memory";
                "gpa" => format_args!("{:#x}", ept.gpa),
                "qualification" => format_args!("{:#x}", exit.qualification),
            );
        }
    } else if ept.is_emulation_fault() {
        emul::emulate(vcpu, exit, false, plat.emul, plat.ports)?;
    } else {
        slog::warn!(vcpu.log, "unsupported EPT violation";
            "gpa" => format_args!("{:#x}", ept.gpa),
            "qualification" => format_args!("{:#x}", exit.qualification),
        );
    }
    Ok(Step::Resume)
}

fn handle_io(
    vcpu: &mut Vcpu,
    exit: &ExitRecord,
    io: &IoQual,
    plat: &mut Platform<'_>,
) -> Result<Step, Fatal> {
    if io.string {
        emul::emulate(vcpu, exit, true, plat.emul, plat.ports)?;
        return Ok(Step::Resume);
    }

    let mask = pio::io_mask(io.bytes).ok_or(Fatal::IoWidth(io.bytes))?;
    let rax = vcpu.gpr(HV_X86_RAX)?;
    if io.is_in {
        let val = u64::from(plat.ports.pio_in(io.port, io.bytes)) & mask;
        // 32-bit results zero-extend into RAX
        let rax = match io.bytes {
            4 => val,
            _ => (rax & !mask) | val,
        };
        vcpu.set_gpr(HV_X86_RAX, rax)?;
    } else {
        plat.ports.pio_out(io.port, io.bytes, (rax & mask) as u32);
    }
    vcpu.advance_rip(exit.inst_len)?;
    Ok(Step::Resume)
}

fn handle_rdmsr(
    vcpu: &mut Vcpu,
    exit: &ExitRecord,
    plat: &mut Platform<'_>,
) -> Result<Step, Fatal> {
    let msr = MsrId(vcpu.gpr(HV_X86_RCX)? as u32);
    let outcome = plat.msrs.rdmsr(msr, vcpu.state()?);
    let val = match outcome {
        RdmsrOutcome::Handled(val) => val,
        RdmsrOutcome::NotHandled => {
            slog::warn!(vcpu.log, "rdmsr of unhandled msr";
                "msr" => format_args!("{:#x}", msr.0),
            );
            0
        }
        RdmsrOutcome::GpException => {
            vmx::inject_exception(vcpu.hw(), GP_VECTOR, Some(0))?;
            return Ok(Step::Resume);
        }
    };
    vcpu.set_gpr(HV_X86_RAX, val & 0xffff_ffff)?;
    vcpu.set_gpr(HV_X86_RDX, val >> 32)?;
    vcpu.advance_rip(exit.inst_len)?;
    Ok(Step::Resume)
}

fn handle_wrmsr(
    vcpu: &mut Vcpu,
    exit: &ExitRecord,
    plat: &mut Platform<'_>,
) -> Result<Step, Fatal> {
    let msr = MsrId(vcpu.gpr(HV_X86_RCX)? as u32);
    let val = ((vcpu.gpr(HV_X86_RDX)? & 0xffff_ffff) << 32)
        | (vcpu.gpr(HV_X86_RAX)? & 0xffff_ffff);
    match plat.msrs.wrmsr(msr, val, vcpu.state_mut()?) {
        WrmsrOutcome::Handled => {}
        WrmsrOutcome::NotHandled => {
            slog::warn!(vcpu.log, "wrmsr of unhandled msr";
                "msr" => format_args!("{:#x}", msr.0),
                "value" => format_args!("{:#x}", val),
            );
        }
        WrmsrOutcome::GpException => {
            vmx::inject_exception(vcpu.hw(), GP_VECTOR, Some(0))?;
            return Ok(Step::Resume);
        }
    }
    vcpu.advance_rip(exit.inst_len)?;
    Ok(Step::Resume)
}

fn handle_cr(
    vcpu: &mut Vcpu,
    exit: &ExitRecord,
    cr: &CrAccess,
    plat: &mut Platform<'_>,
) -> Result<Step, Fatal> {
    let Some(reg) = hvf_api::hv_x86_reg_t::gpr(cr.gpr) else {
        return Err(Fatal::UnsupportedCr(cr.cr));
    };
    let mut step = Step::Resume;

    match (cr.cr, cr.access) {
        (0, CrAccessType::MovTo) => {
            let val = vcpu.gpr(reg)?;
            vcpu.write_cr0(val)?;
        }
        (0, CrAccessType::Clts) => {
            let val = vcpu.cr0()? & !CR0_TS;
            vcpu.write_cr0(val)?;
        }
        (0, CrAccessType::Lmsw) => {
            // LMSW sets PE but cannot clear it.
            let src = (exit.qualification >> 16) & 0xf;
            let old = vcpu.cr0()?;
            vcpu.write_cr0((old & !0xf) | src | (old & CR0_PE))?;
        }
        (0, CrAccessType::MovFrom) => {
            let val = vcpu.cr0()?;
            vcpu.set_gpr(reg, val)?;
        }
        (4, CrAccessType::MovTo) => {
            let val = vcpu.gpr(reg)?;
            vcpu.write_cr4(val)?;
        }
        (4, CrAccessType::MovFrom) => {
            let val = vcpu.cr4()?;
            vcpu.set_gpr(reg, val)?;
        }
        (8, CrAccessType::MovTo) => {
            plat.intr.set_tpr((vcpu.gpr(reg)? & 0xf) as u8);
            step = Step::Interrupted;
        }
        (8, CrAccessType::MovFrom) => {
            vcpu.set_gpr(reg, u64::from(plat.intr.get_tpr()))?;
        }
        (n, _) => return Err(Fatal::UnsupportedCr(n)),
    }
    vcpu.advance_rip(exit.inst_len)?;
    Ok(step)
}
