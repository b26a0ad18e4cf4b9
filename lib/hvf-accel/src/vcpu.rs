// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Virtual CPU functionality.
//!
//! Each vCPU keeps two copies of its architectural state: the hardware
//! register file and VMCS, and an emulator-side [`ArchState`].  The `dirty`
//! flag says which one is authoritative:
//!
//! - dirty: the emulator copy is current and must be pushed to hardware
//!   before the guest runs again.
//! - clean: hardware is current and the emulator copy may be stale.  It is
//!   pulled on demand (see [`Vcpu::state`]).
//!
//! Any thread may set the flag through a [`VcpuHandle`]; only the owning vCPU
//! thread clears it, when it pushes state in [`Vcpu::sync_before_run`].

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use hvf_api::hv_vmx_capability_t::*;
use hvf_api::hv_x86_reg_t::{self, *};
use hvf_api::msr::*;
use hvf_api::vmcs::*;
use hvf_api::vmx::*;
use hvf_api::{KickFn, VcpuHw};
use slog::Logger;

use crate::cpuid::CpuidVirt;
use crate::error::{Fatal, HvResultExt};
use crate::exits::ExitRecord;
use crate::vmm::Machine;
use crate::vmx::{self, HwAccess};

/// MSRs the guest may access without exiting.
const NATIVE_MSRS: [u32; 11] = [
    MSR_STAR,
    MSR_LSTAR,
    MSR_CSTAR,
    MSR_FMASK,
    MSR_FSBASE,
    MSR_GSBASE,
    MSR_KERNELGSBASE,
    MSR_TSC_AUX,
    MSR_IA32_SYSENTER_CS,
    MSR_IA32_SYSENTER_EIP,
    MSR_IA32_SYSENTER_ESP,
];

/// Value of RDX at power-on: family 6, model 2, stepping 3.
const RESET_RDX: u64 = 0x623;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct GpRegs {
    pub rax: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rbx: u64,
    pub rsp: u64,
    pub rbp: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,

    pub rip: u64,
    pub rflags: u64,
}

macro_rules! gp_accessors {
    ($($reg:ident => $field:ident),* $(,)?) => {
        impl GpRegs {
            /// Read a general purpose register (or RIP/RFLAGS) by name.
            pub fn get(&self, reg: hv_x86_reg_t) -> Option<u64> {
                match reg {
                    $($reg => Some(self.$field),)*
                    _ => None,
                }
            }

            /// Write a general purpose register (or RIP/RFLAGS) by name.
            /// Returns false if `reg` is not one of them.
            pub fn set(&mut self, reg: hv_x86_reg_t, val: u64) -> bool {
                match reg {
                    $($reg => self.$field = val,)*
                    _ => return false,
                }
                true
            }
        }
    };
}

gp_accessors! {
    HV_X86_RAX => rax,
    HV_X86_RCX => rcx,
    HV_X86_RDX => rdx,
    HV_X86_RBX => rbx,
    HV_X86_RSP => rsp,
    HV_X86_RBP => rbp,
    HV_X86_RSI => rsi,
    HV_X86_RDI => rdi,
    HV_X86_R8 => r8,
    HV_X86_R9 => r9,
    HV_X86_R10 => r10,
    HV_X86_R11 => r11,
    HV_X86_R12 => r12,
    HV_X86_R13 => r13,
    HV_X86_R14 => r14,
    HV_X86_R15 => r15,
    HV_X86_RIP => rip,
    HV_X86_RFLAGS => rflags,
}

impl GpRegs {
    fn read(hw: &dyn VcpuHw) -> Result<Self, Fatal> {
        let mut regs = Self::default();
        for reg in hv_x86_reg_t::GPRS
            .into_iter()
            .chain([HV_X86_RIP, HV_X86_RFLAGS])
        {
            regs.set(reg, hw.rreg(reg)?);
        }
        Ok(regs)
    }

    fn write(&self, hw: &dyn VcpuHw) -> Result<(), Fatal> {
        for reg in hv_x86_reg_t::GPRS
            .into_iter()
            .chain([HV_X86_RIP, HV_X86_RFLAGS])
        {
            hw.wreg(reg, self.get(reg).unwrap_or_default())?;
        }
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct CtrlRegs {
    pub cr0: u64,
    pub cr2: u64,
    pub cr3: u64,
    pub cr4: u64,
    pub efer: u64,
    pub xcr0: u64,
    pub dr0: u64,
    pub dr1: u64,
    pub dr2: u64,
    pub dr3: u64,
    pub dr6: u64,
    pub dr7: u64,
}

impl CtrlRegs {
    fn read(hw: &dyn VcpuHw) -> Result<Self, Fatal> {
        Ok(Self {
            cr0: vmx::guest_cr0(hw)?,
            cr2: hw.rreg(HV_X86_CR2)?,
            cr3: hw.rvmcs(VMCS_GUEST_CR3)?,
            cr4: vmx::guest_cr4(hw)?,
            efer: hw.rvmcs(VMCS_GUEST_IA32_EFER)?,
            xcr0: hw.rreg(HV_X86_XCR0)?,
            dr0: hw.rreg(HV_X86_DR0)?,
            dr1: hw.rreg(HV_X86_DR1)?,
            dr2: hw.rreg(HV_X86_DR2)?,
            dr3: hw.rreg(HV_X86_DR3)?,
            dr6: hw.rreg(HV_X86_DR6)?,
            dr7: hw.rreg(HV_X86_DR7)?,
        })
    }

    fn write(&self, hw: &dyn VcpuHw, machine: &Machine) -> Result<(), Fatal> {
        // CR0 last: entering paging consults EFER, CR3 and CR4.
        vmx::set_efer(hw, self.efer)?;
        hw.wvmcs(VMCS_GUEST_CR3, self.cr3)?;
        vmx::set_cr4(hw, self.cr4)?;
        vmx::set_cr0(hw, self.cr0, machine.slots())?;

        hw.wreg(HV_X86_CR2, self.cr2)?;
        hw.wreg(HV_X86_XCR0, self.xcr0 | 1)?;
        let debug = [
            (HV_X86_DR0, self.dr0),
            (HV_X86_DR1, self.dr1),
            (HV_X86_DR2, self.dr2),
            (HV_X86_DR3, self.dr3),
            (HV_X86_DR6, self.dr6),
            (HV_X86_DR7, self.dr7),
        ];
        for (reg, val) in debug {
            hw.wreg(reg, val)?;
        }
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SegDesc {
    pub base: u64,
    pub limit: u32,
    pub access: u32,
    pub selector: u16,
}

impl SegDesc {
    fn read(hw: &dyn VcpuHw, f: &SegFields) -> Result<Self, Fatal> {
        Ok(Self {
            base: hw.rvmcs(f.base)?,
            limit: hw.rvmcs(f.limit)? as u32,
            access: hw.rvmcs(f.access)? as u32,
            selector: hw.rvmcs(f.selector)? as u16,
        })
    }

    fn write(&self, hw: &dyn VcpuHw, f: &SegFields) -> Result<(), Fatal> {
        hw.wvmcs(f.selector, u64::from(self.selector))?;
        hw.wvmcs(f.base, self.base)?;
        hw.wvmcs(f.limit, u64::from(self.limit))?;
        hw.wvmcs(f.access, u64::from(self.access))
    }
}

/// Segment registers and descriptor tables.  For GDTR and IDTR only `base`
/// and `limit` are meaningful.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SegRegs {
    pub cs: SegDesc,
    pub ds: SegDesc,
    pub es: SegDesc,
    pub fs: SegDesc,
    pub gs: SegDesc,
    pub ss: SegDesc,
    pub ldtr: SegDesc,
    pub tr: SegDesc,
    pub gdtr: SegDesc,
    pub idtr: SegDesc,
}

impl SegRegs {
    fn read(hw: &dyn VcpuHw) -> Result<Self, Fatal> {
        let table = |base, limit| -> Result<SegDesc, Fatal> {
            Ok(SegDesc {
                base: hw.rvmcs(base)?,
                limit: hw.rvmcs(limit)? as u32,
                ..Default::default()
            })
        };
        Ok(Self {
            cs: SegDesc::read(hw, &VMCS_GUEST_CS)?,
            ds: SegDesc::read(hw, &VMCS_GUEST_DS)?,
            es: SegDesc::read(hw, &VMCS_GUEST_ES)?,
            fs: SegDesc::read(hw, &VMCS_GUEST_FS)?,
            gs: SegDesc::read(hw, &VMCS_GUEST_GS)?,
            ss: SegDesc::read(hw, &VMCS_GUEST_SS)?,
            ldtr: SegDesc::read(hw, &VMCS_GUEST_LDTR)?,
            tr: SegDesc::read(hw, &VMCS_GUEST_TR)?,
            gdtr: table(VMCS_GUEST_GDTR_BASE, VMCS_GUEST_GDTR_LIMIT)?,
            idtr: table(VMCS_GUEST_IDTR_BASE, VMCS_GUEST_IDTR_LIMIT)?,
        })
    }

    fn write(&self, hw: &dyn VcpuHw) -> Result<(), Fatal> {
        let segs = [
            (&VMCS_GUEST_CS, &self.cs),
            (&VMCS_GUEST_DS, &self.ds),
            (&VMCS_GUEST_ES, &self.es),
            (&VMCS_GUEST_FS, &self.fs),
            (&VMCS_GUEST_GS, &self.gs),
            (&VMCS_GUEST_SS, &self.ss),
            (&VMCS_GUEST_LDTR, &self.ldtr),
            (&VMCS_GUEST_TR, &self.tr),
        ];
        for (fields, desc) in segs {
            desc.write(hw, fields)?;
        }
        hw.wvmcs(VMCS_GUEST_GDTR_BASE, self.gdtr.base)?;
        hw.wvmcs(VMCS_GUEST_GDTR_LIMIT, u64::from(self.gdtr.limit))?;
        hw.wvmcs(VMCS_GUEST_IDTR_BASE, self.idtr.base)?;
        hw.wvmcs(VMCS_GUEST_IDTR_LIMIT, u64::from(self.idtr.limit))
    }
}

/// The emulator-side copy of a vCPU's architectural state.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ArchState {
    pub gp: GpRegs,
    pub ctrl: CtrlRegs,
    pub seg: SegRegs,
}

impl ArchState {
    /// Architectural state after power-on or INIT.
    pub fn power_on() -> Self {
        let data = SegDesc { base: 0, limit: 0xffff, access: 0x93, selector: 0 };
        Self {
            gp: GpRegs {
                rdx: RESET_RDX,
                rip: 0xfff0,
                rflags: RFLAGS_RESERVED1,
                ..Default::default()
            },
            ctrl: CtrlRegs {
                cr0: CR0_CD | CR0_NW | CR0_ET,
                xcr0: 1,
                ..Default::default()
            },
            seg: SegRegs {
                cs: SegDesc {
                    base: 0xffff_0000,
                    limit: 0xffff,
                    access: 0x9b,
                    selector: 0xf000,
                },
                ds: data,
                es: data,
                fs: data,
                gs: data,
                ss: data,
                ldtr: SegDesc { access: AR_UNUSABLE as u32, ..Default::default() },
                tr: SegDesc { access: 0x83, ..Default::default() },
                gdtr: SegDesc::default(),
                idtr: SegDesc::default(),
            },
        }
    }

    fn read(hw: &dyn VcpuHw) -> Result<Self, Fatal> {
        Ok(Self {
            gp: GpRegs::read(hw)?,
            ctrl: CtrlRegs::read(hw)?,
            seg: SegRegs::read(hw)?,
        })
    }

    fn write(&self, hw: &dyn VcpuHw, machine: &Machine) -> Result<(), Fatal> {
        self.gp.write(hw)?;
        self.seg.write(hw)?;
        self.ctrl.write(hw, machine)
    }
}

/// VMX capability words, read once when the vCPU is created.
#[derive(Copy, Clone, Debug, Default)]
pub struct VmxCaps {
    pub pin: u64,
    pub proc: u64,
    pub proc2: u64,
    pub entry: u64,
}

bitflags::bitflags! {
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    struct Requests: u32 {
        /// Pull hardware state into the emulator copy.
        const SYNC_STATE = 1 << 0;
        /// Reset to power-on state and push it to hardware.
        const POST_RESET = 1 << 1;
        /// Return to the scheduler without entering the guest.
        const EXIT = 1 << 2;
    }
}

struct VcpuShared {
    dirty: AtomicBool,
    requests: AtomicU32,
    kick: Box<KickFn>,
}

impl VcpuShared {
    fn request(&self, req: Requests) {
        self.requests.fetch_or(req.bits(), Ordering::SeqCst);
        (self.kick)();
    }
}

/// The part of a [`Vcpu`] other threads may act upon.
#[derive(Clone)]
pub struct VcpuHandle {
    id: u32,
    shared: Arc<VcpuShared>,
}

impl VcpuHandle {
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Declare the emulator-side state authoritative.  It is pushed to
    /// hardware before the guest next runs.
    pub fn mark_dirty(&self) {
        self.shared.dirty.store(true, Ordering::Release);
    }

    pub fn is_dirty(&self) -> bool {
        self.shared.dirty.load(Ordering::Acquire)
    }

    /// Have the vCPU thread refresh the emulator-side state from hardware.
    pub fn request_register_sync(&self) {
        self.shared.request(Requests::SYNC_STATE);
    }

    /// Have the vCPU thread reset to power-on state and load it into
    /// hardware.
    pub fn request_post_reset_sync(&self) {
        self.shared.request(Requests::POST_RESET);
    }

    /// Make the vCPU return to the scheduler without entering the guest.
    pub fn request_exit(&self) {
        self.shared.request(Requests::EXIT);
    }

    /// Force the vCPU out of guest mode so it re-evaluates pending state.
    pub fn kick(&self) {
        (self.shared.kick)();
    }
}

/// A virtual CPU, owned by the thread that created it.
pub struct Vcpu {
    id: u32,
    hw: Box<dyn VcpuHw>,
    pub(crate) machine: Arc<Machine>,
    shared: Arc<VcpuShared>,
    caps: VmxCaps,
    arch: ArchState,
    pub(crate) cpuid: CpuidVirt,
    pub(crate) halted: bool,
    pub(crate) wait_for_sipi: bool,
    /// The previous exit, until any event it interrupted is re-injected.
    pub(crate) last_exit: Option<ExitRecord>,
    pub(crate) log: Logger,
}

impl Vcpu {
    /// Create vCPU `id` of `machine`, bound to the calling thread.
    pub fn new(machine: &Arc<Machine>, id: u32) -> Result<Self, Fatal> {
        let hv = machine.hv();
        let hw = hv.create_vcpu().during("hv_vcpu_create")?;
        let log = machine.log().new(slog::o!("vcpu" => id));

        let caps = VmxCaps {
            pin: hv
                .read_capability(HV_VMX_CAP_PINBASED)
                .during("hv_vmx_read_capability")?,
            proc: hv
                .read_capability(HV_VMX_CAP_PROCBASED)
                .during("hv_vmx_read_capability")?,
            proc2: hv
                .read_capability(HV_VMX_CAP_PROCBASED2)
                .during("hv_vmx_read_capability")?,
            entry: hv
                .read_capability(HV_VMX_CAP_ENTRY)
                .during("hv_vmx_read_capability")?,
        };

        let shared = Arc::new(VcpuShared {
            dirty: AtomicBool::new(true),
            requests: AtomicU32::new(0),
            kick: hw.kicker(),
        });
        let cpuid = CpuidVirt::new(
            machine.profile(),
            machine.config().topology,
            id,
        );

        let mut vcpu = Self {
            id,
            hw,
            machine: machine.clone(),
            shared,
            caps,
            arch: ArchState::power_on(),
            cpuid,
            halted: false,
            wait_for_sipi: false,
            last_exit: None,
            log,
        };
        vcpu.program_controls()?;
        vcpu.reset()?;
        for msr in NATIVE_MSRS {
            vcpu.hw
                .enable_native_msr(msr, true)
                .during("hv_vcpu_enable_native_msr")?;
        }
        slog::info!(vcpu.log, "vcpu created";
            "profile" => %machine.profile().name,
        );
        Ok(vcpu)
    }

    fn program_controls(&self) -> Result<(), Fatal> {
        let hw = self.hw();
        let caps = &self.caps;
        hw.wvmcs(VMCS_PIN_BASED_CTLS, vmx::cap2ctrl(caps.pin, 0))?;
        hw.wvmcs(
            VMCS_PRI_PROC_BASED_CTLS,
            vmx::cap2ctrl(
                caps.proc,
                CPU_BASED_HLT
                    | CPU_BASED_MWAIT
                    | CPU_BASED_TSC_OFFSET
                    | CPU_BASED_TPR_SHADOW,
            ) | CPU_BASED_SECONDARY_CTLS,
        )?;
        hw.wvmcs(
            VMCS_SEC_PROC_BASED_CTLS,
            vmx::cap2ctrl(caps.proc2, CPU_BASED2_APIC_ACCESSES),
        )?;
        hw.wvmcs(VMCS_ENTRY_CTLS, vmx::cap2ctrl(caps.entry, 0))?;
        hw.wvmcs(VMCS_EXCEPTION_BITMAP, 0)?;
        hw.wvmcs(VMCS_TPR_THRESHOLD, 0)
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_bsp(&self) -> bool {
        self.id == 0
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn caps(&self) -> &VmxCaps {
        &self.caps
    }

    pub fn machine(&self) -> &Arc<Machine> {
        &self.machine
    }

    pub fn handle(&self) -> VcpuHandle {
        VcpuHandle { id: self.id, shared: self.shared.clone() }
    }

    pub(crate) fn hw(&self) -> &dyn VcpuHw {
        &*self.hw
    }

    pub fn mark_dirty(&self) {
        self.shared.dirty.store(true, Ordering::Release);
    }

    pub fn is_dirty(&self) -> bool {
        self.shared.dirty.load(Ordering::Acquire)
    }

    /// Put the vCPU in its power-on state.
    pub fn reset(&mut self) -> Result<(), Fatal> {
        slog::debug!(self.log, "resetting vcpu");
        self.arch = ArchState::power_on();

        let hw = &*self.hw;
        hw.wvmcs(VMCS_ENTRY_CTLS, vmx::cap2ctrl(self.caps.entry, 0))?;
        hw.wvmcs(VMCS_CR4_MASK, CR4_VMXE)?;
        hw.wvmcs(VMCS_GUEST_INTERRUPTIBILITY, 0)?;
        hw.wvmcs(VMCS_ENTRY_INTR_INFO, 0)?;
        self.arch.write(hw, &self.machine)?;

        self.halted = false;
        self.wait_for_sipi = !self.is_bsp();
        self.last_exit = None;
        vmx::flush_tlb(hw)?;
        self.mark_dirty();
        Ok(())
    }

    /// Push the emulator-side state into hardware if it is authoritative.
    pub fn sync_before_run(&mut self) -> Result<(), Fatal> {
        if self.shared.dirty.swap(false, Ordering::AcqRel) {
            slog::debug!(self.log, "pushing register state");
            self.arch.write(&*self.hw, &self.machine)?;
        }
        Ok(())
    }

    /// Pull the full architectural state out of hardware, regardless of the
    /// dirty flag.
    pub fn sync_after_stop(&mut self) -> Result<(), Fatal> {
        slog::debug!(self.log, "pulling register state");
        self.arch = ArchState::read(&*self.hw)?;
        Ok(())
    }

    /// Make the emulator-side copy current (pulling it if hardware is
    /// authoritative) and mark it authoritative.
    fn materialize(&mut self) -> Result<(), Fatal> {
        if !self.is_dirty() {
            self.sync_after_stop()?;
            self.mark_dirty();
        }
        Ok(())
    }

    /// The current architectural state.
    pub fn state(&mut self) -> Result<&ArchState, Fatal> {
        self.materialize()?;
        Ok(&self.arch)
    }

    /// The architectural state, for modification.  Changes are pushed to
    /// hardware before the guest next runs.
    pub fn state_mut(&mut self) -> Result<&mut ArchState, Fatal> {
        self.materialize()?;
        Ok(&mut self.arch)
    }

    /// Read a general purpose register (or RIP/RFLAGS) from whichever copy
    /// is authoritative.
    pub fn gpr(&self, reg: hv_x86_reg_t) -> Result<u64, Fatal> {
        match self.is_dirty() {
            true => Ok(self.arch.gp.get(reg).unwrap_or_default()),
            false => self.hw.rreg(reg),
        }
    }

    /// Write a general purpose register (or RIP/RFLAGS) into whichever copy
    /// is authoritative.
    pub fn set_gpr(&mut self, reg: hv_x86_reg_t, val: u64) -> Result<(), Fatal> {
        match self.is_dirty() {
            true => {
                self.arch.gp.set(reg, val);
                Ok(())
            }
            false => self.hw.wreg(reg, val),
        }
    }

    /// CR0 as the guest sees it.
    pub(crate) fn cr0(&self) -> Result<u64, Fatal> {
        match self.is_dirty() {
            true => Ok(self.arch.ctrl.cr0),
            false => vmx::guest_cr0(&*self.hw),
        }
    }

    /// CR4 as the guest sees it.
    pub(crate) fn cr4(&self) -> Result<u64, Fatal> {
        match self.is_dirty() {
            true => Ok(self.arch.ctrl.cr4),
            false => vmx::guest_cr4(&*self.hw),
        }
    }

    /// Emulate a guest write to CR0.
    ///
    /// A paging transition can enter or leave long mode, which rewrites
    /// EFER, the IA-32e entry control and TR.  When the emulator copy is
    /// authoritative it is pushed first, so the transition sees the guest's
    /// current EFER, CR3, CR4 and TR, and pulled back afterwards.
    pub(crate) fn write_cr0(&mut self, val: u64) -> Result<(), Fatal> {
        let dirty = self.is_dirty();
        if dirty {
            self.arch.write(&*self.hw, &self.machine)?;
        }
        vmx::set_cr0(&*self.hw, val, self.machine.slots())?;
        if dirty {
            self.arch = ArchState::read(&*self.hw)?;
        }
        Ok(())
    }

    /// Emulate a guest write to CR4.
    pub(crate) fn write_cr4(&mut self, val: u64) -> Result<(), Fatal> {
        vmx::set_cr4(&*self.hw, val)?;
        if self.is_dirty() {
            self.arch.ctrl.cr4 = val;
        }
        Ok(())
    }

    /// Emulate XSETBV of XCR0.
    pub(crate) fn write_xcr0(&mut self, val: u64) -> Result<(), Fatal> {
        self.hw.wreg(HV_X86_XCR0, val | 1)?;
        if self.is_dirty() {
            self.arch.ctrl.xcr0 = val;
        }
        Ok(())
    }

    /// Step past the instruction which caused the current exit.
    pub(crate) fn advance_rip(&mut self, len: u8) -> Result<(), Fatal> {
        if self.is_dirty() {
            self.arch.gp.rip = self.arch.gp.rip.wrapping_add(u64::from(len));
            let rip = self.arch.gp.rip;
            // The interrupt shadow lives only in the VMCS.
            vmx::set_rip(&*self.hw, rip)
        } else {
            vmx::advance_rip(&*self.hw, len)
        }
    }

    /// Handle cross-thread requests.  Returns true if the vCPU was asked to
    /// return to the scheduler.
    pub(crate) fn service_requests(&mut self) -> Result<bool, Fatal> {
        let bits = self.shared.requests.swap(0, Ordering::SeqCst);
        let reqs = Requests::from_bits_truncate(bits);

        if reqs.contains(Requests::POST_RESET) {
            self.reset()?;
            self.sync_before_run()?;
        } else if reqs.contains(Requests::SYNC_STATE) {
            self.materialize()?;
        }
        Ok(reqs.contains(Requests::EXIT))
    }

    /// Start a secondary vCPU waiting for a startup IPI at the real-mode
    /// address `vector << 12`.  Returns false if it was not waiting.
    pub fn deliver_sipi(&mut self, vector: u8) -> Result<bool, Fatal> {
        if !self.wait_for_sipi {
            return Ok(false);
        }
        let state = self.state_mut()?;
        state.seg.cs.selector = u16::from(vector) << 8;
        state.seg.cs.base = u64::from(vector) << 12;
        state.gp.rip = 0;
        self.wait_for_sipi = false;
        self.halted = false;
        slog::debug!(self.log, "startup IPI"; "vector" => vector);
        Ok(true)
    }

    /// Release the hardware vCPU.
    pub fn destroy(self) -> Result<(), Fatal> {
        slog::debug!(self.log, "destroying vcpu");
        self.hw.destroy().during("hv_vcpu_destroy")
    }
}
