// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory stand-ins for the hypervisor and the machine emulator's
//! collaborators.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use cpuid_utils::CpuidMap;
use hvf_api::hv_vmx_capability_t;
use hvf_api::hv_x86_reg_t;
use hvf_api::vmcs::*;
use hvf_api::vmx::*;
use hvf_api::{
    hv_vcpuid_t, HvError, Hypervisor, KickFn, Prot, VcpuHw,
};
use slog::Logger;

use crate::config::Config;
use crate::dispatch::Platform;
use crate::emul::{DecodedInsn, EmulError, InsnEmulator, MemoryView};
use crate::exits::TaskSwitch;
use crate::intr::InterruptController;
use crate::msr::{MsrHandler, MsrId, RdmsrOutcome, WrmsrOutcome};
use crate::pio::PortIo;
use crate::vcpu::ArchState;
use crate::vmm::{Machine, SlotManager};

pub(crate) fn test_logger() -> Logger {
    Logger::root(slog::Discard, slog::o!())
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum HvCall {
    Map { gpa: u64, size: usize, prot: Prot },
    Unmap { gpa: u64, size: usize },
    Protect { gpa: u64, size: usize, prot: Prot },
}

/// A hypervisor which records VM-wide calls and hands out [`FakeVcpu`]s.
///
/// Capabilities allow every control and require none.
#[derive(Default)]
pub(crate) struct FakeHv {
    calls: Mutex<Vec<HvCall>>,
    map_error: Mutex<Option<HvError>>,
    vcpus: Mutex<Vec<Arc<Mutex<FakeVcpuState>>>>,
}

impl FakeHv {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn calls(&self) -> Vec<HvCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Make every subsequent map call fail with `err`.
    pub(crate) fn fail_maps(&self, err: HvError) {
        *self.map_error.lock().unwrap() = Some(err);
    }

    /// State of the `idx`th vCPU created on this hypervisor.
    pub(crate) fn vcpu_state(&self, idx: usize) -> Arc<Mutex<FakeVcpuState>> {
        self.vcpus.lock().unwrap()[idx].clone()
    }
}

impl Hypervisor for FakeHv {
    unsafe fn map(
        &self,
        _host_addr: *mut u8,
        gpa: u64,
        size: usize,
        prot: Prot,
    ) -> Result<(), HvError> {
        if let Some(err) = *self.map_error.lock().unwrap() {
            return Err(err);
        }
        self.calls.lock().unwrap().push(HvCall::Map { gpa, size, prot });
        Ok(())
    }

    fn unmap(&self, gpa: u64, size: usize) -> Result<(), HvError> {
        self.calls.lock().unwrap().push(HvCall::Unmap { gpa, size });
        Ok(())
    }

    fn protect(
        &self,
        gpa: u64,
        size: usize,
        prot: Prot,
    ) -> Result<(), HvError> {
        self.calls.lock().unwrap().push(HvCall::Protect { gpa, size, prot });
        Ok(())
    }

    fn read_capability(
        &self,
        _cap: hv_vmx_capability_t,
    ) -> Result<u64, HvError> {
        Ok(0xffff_ffff << 32)
    }

    fn create_vcpu(&self) -> Result<Box<dyn VcpuHw>, HvError> {
        let mut vcpus = self.vcpus.lock().unwrap();
        let (vcpu, state) = FakeVcpu::new(vcpus.len() as hv_vcpuid_t);
        vcpus.push(state);
        Ok(Box::new(vcpu))
    }
}

/// An exit for a [`FakeVcpu`] to report from its next run call, along with
/// the guest state changes the guest made before it.
#[derive(Clone, Debug)]
pub(crate) struct ScriptedExit {
    reason: u32,
    qualification: u64,
    inst_len: u8,
    idt_vectoring: u64,
    gpa: u64,
    regs: Vec<(hv_x86_reg_t, u64)>,
    vmcs: Vec<(u32, u64)>,
}

impl ScriptedExit {
    pub(crate) fn new(reason: u32) -> Self {
        Self {
            reason,
            qualification: 0,
            inst_len: 0,
            idt_vectoring: 0,
            gpa: 0,
            regs: Vec::new(),
            vmcs: Vec::new(),
        }
    }

    pub(crate) fn qual(mut self, qualification: u64) -> Self {
        self.qualification = qualification;
        self
    }

    pub(crate) fn len(mut self, inst_len: u8) -> Self {
        self.inst_len = inst_len;
        self
    }

    pub(crate) fn gpa(mut self, gpa: u64) -> Self {
        self.gpa = gpa;
        self
    }

    pub(crate) fn vectoring(mut self, info: u64) -> Self {
        self.idt_vectoring = info;
        self
    }

    pub(crate) fn reg(mut self, reg: hv_x86_reg_t, val: u64) -> Self {
        self.regs.push((reg, val));
        self
    }

    pub(crate) fn vmcs(mut self, field: u32, val: u64) -> Self {
        self.vmcs.push((field, val));
        self
    }
}

#[derive(Default)]
pub(crate) struct FakeVcpuState {
    pub regs: HashMap<hv_x86_reg_t, u64>,
    pub vmcs: HashMap<u32, u64>,
    pub exits: VecDeque<ScriptedExit>,
    pub runs: usize,
    /// Register file as of each run call.
    pub regs_at_run: Vec<HashMap<hv_x86_reg_t, u64>>,
    /// VM-entry interruption information as of each run call.
    pub entry_intr_at_run: Vec<u64>,
    pub native_msrs: Vec<u32>,
    pub tlb_flushes: usize,
    pub kicks: usize,
    pub destroyed: bool,
}

impl FakeVcpuState {
    pub(crate) fn reg(&self, reg: hv_x86_reg_t) -> u64 {
        self.regs.get(&reg).copied().unwrap_or(0)
    }

    pub(crate) fn set_reg(&mut self, reg: hv_x86_reg_t, val: u64) {
        self.regs.insert(reg, val);
    }

    pub(crate) fn vmcs(&self, field: u32) -> u64 {
        self.vmcs.get(&field).copied().unwrap_or(0)
    }

    /// Queue an exit.  Run calls with nothing queued report an external
    /// interrupt.
    pub(crate) fn push_exit(&mut self, exit: ScriptedExit) {
        self.exits.push_back(exit);
    }
}

/// A hardware vCPU whose register file and VMCS are plain maps.
pub(crate) struct FakeVcpu {
    id: hv_vcpuid_t,
    state: Arc<Mutex<FakeVcpuState>>,
}

impl FakeVcpu {
    pub(crate) fn new(
        id: hv_vcpuid_t,
    ) -> (Self, Arc<Mutex<FakeVcpuState>>) {
        let state = Arc::new(Mutex::new(FakeVcpuState::default()));
        (Self { id, state: state.clone() }, state)
    }
}

impl VcpuHw for FakeVcpu {
    fn id(&self) -> hv_vcpuid_t {
        self.id
    }

    fn read_reg(&self, reg: hv_x86_reg_t) -> Result<u64, HvError> {
        Ok(self.state.lock().unwrap().reg(reg))
    }

    fn write_reg(&self, reg: hv_x86_reg_t, val: u64) -> Result<(), HvError> {
        self.state.lock().unwrap().set_reg(reg, val);
        Ok(())
    }

    fn read_vmcs(&self, field: u32) -> Result<u64, HvError> {
        Ok(self.state.lock().unwrap().vmcs(field))
    }

    fn write_vmcs(&self, field: u32, val: u64) -> Result<(), HvError> {
        self.state.lock().unwrap().vmcs.insert(field, val);
        Ok(())
    }

    fn enable_native_msr(
        &self,
        msr: u32,
        enable: bool,
    ) -> Result<(), HvError> {
        let mut st = self.state.lock().unwrap();
        st.native_msrs.retain(|m| *m != msr);
        if enable {
            st.native_msrs.push(msr);
        }
        Ok(())
    }

    fn run(&self) -> Result<(), HvError> {
        let mut st = self.state.lock().unwrap();
        st.runs += 1;
        let regs = st.regs.clone();
        st.regs_at_run.push(regs);
        let entry = st.vmcs(VMCS_ENTRY_INTR_INFO);
        st.entry_intr_at_run.push(entry);
        // Entry consumes the queued event.
        st.vmcs.insert(VMCS_ENTRY_INTR_INFO, 0);

        let exit = st
            .exits
            .pop_front()
            .unwrap_or_else(|| ScriptedExit::new(VMX_REASON_IRQ));
        for (reg, val) in exit.regs {
            st.set_reg(reg, val);
        }
        for (field, val) in exit.vmcs {
            st.vmcs.insert(field, val);
        }
        st.vmcs.insert(VMCS_EXIT_REASON, u64::from(exit.reason));
        st.vmcs.insert(VMCS_EXIT_QUALIFICATION, exit.qualification);
        st.vmcs
            .insert(VMCS_EXIT_INSTRUCTION_LENGTH, u64::from(exit.inst_len));
        st.vmcs.insert(VMCS_IDT_VECTORING_INFO, exit.idt_vectoring);
        st.vmcs.insert(VMCS_GUEST_PHYSICAL_ADDRESS, exit.gpa);
        Ok(())
    }

    fn invalidate_tlb(&self) -> Result<(), HvError> {
        self.state.lock().unwrap().tlb_flushes += 1;
        Ok(())
    }

    fn flush(&self) -> Result<(), HvError> {
        Ok(())
    }

    fn kicker(&self) -> Box<KickFn> {
        let state = self.state.clone();
        Box::new(move || state.lock().unwrap().kicks += 1)
    }

    fn destroy(self: Box<Self>) -> Result<(), HvError> {
        self.state.lock().unwrap().destroyed = true;
        Ok(())
    }
}

pub(crate) fn slot_manager() -> SlotManager {
    SlotManager::new(Arc::new(FakeHv::new()), 32, test_logger())
}

pub(crate) fn machine(hv: &Arc<FakeHv>) -> Arc<Machine> {
    machine_with(hv, Config::default())
}

pub(crate) fn machine_with(hv: &Arc<FakeHv>, config: Config) -> Arc<Machine> {
    Machine::new_with_cpuid(
        hv.clone(),
        &config,
        Box::new(CpuidMap::default()),
        test_logger(),
    )
    .unwrap()
}

#[derive(Default)]
struct ApicState {
    tpr: u8,
    irr: BTreeSet<u8>,
    nmi: bool,
}

/// A local APIC reduced to its request register and task priority.
#[derive(Default)]
pub(crate) struct FakeApic {
    inner: Mutex<ApicState>,
}

impl FakeApic {
    pub(crate) fn raise(&self, vector: u8) {
        self.inner.lock().unwrap().irr.insert(vector);
    }

    pub(crate) fn raise_nmi(&self) {
        self.inner.lock().unwrap().nmi = true;
    }
}

impl InterruptController for FakeApic {
    fn highest_pending_priority(&self) -> Option<u8> {
        self.inner.lock().unwrap().irr.last().copied()
    }

    fn get_tpr(&self) -> u8 {
        self.inner.lock().unwrap().tpr
    }

    fn set_tpr(&self, tpr: u8) {
        self.inner.lock().unwrap().tpr = tpr & 0xf;
    }

    fn hard_interrupt_pending(&self) -> bool {
        let st = self.inner.lock().unwrap();
        st.irr.last().map_or(false, |v| v >> 4 > st.tpr)
    }

    fn nmi_pending(&self) -> bool {
        self.inner.lock().unwrap().nmi
    }

    fn take_nmi(&self) {
        self.inner.lock().unwrap().nmi = false;
    }

    fn acknowledge(&self) -> Option<u8> {
        if !self.hard_interrupt_pending() {
            return None;
        }
        self.inner.lock().unwrap().irr.pop_last()
    }
}

#[derive(Default)]
struct PortState {
    inputs: HashMap<u16, u32>,
    ins: Vec<(u16, u8)>,
    outs: Vec<(u16, u8, u32)>,
}

/// Port space which records accesses.  Ports without a configured value
/// read as all ones.
#[derive(Default)]
pub(crate) struct FakePorts {
    inner: Mutex<PortState>,
}

impl FakePorts {
    pub(crate) fn set_input(&self, port: u16, val: u32) {
        self.inner.lock().unwrap().inputs.insert(port, val);
    }

    pub(crate) fn ins(&self) -> Vec<(u16, u8)> {
        self.inner.lock().unwrap().ins.clone()
    }

    pub(crate) fn outs(&self) -> Vec<(u16, u8, u32)> {
        self.inner.lock().unwrap().outs.clone()
    }
}

impl PortIo for FakePorts {
    fn pio_in(&self, port: u16, bytes: u8) -> u32 {
        let mut st = self.inner.lock().unwrap();
        st.ins.push((port, bytes));
        st.inputs.get(&port).copied().unwrap_or(u32::MAX)
    }

    fn pio_out(&self, port: u16, bytes: u8, val: u32) {
        self.inner.lock().unwrap().outs.push((port, bytes, val));
    }
}

/// An emulator which treats every instruction as a `len`-byte no-op.
pub(crate) struct FakeEmulator {
    pub len: u8,
    pub decoded: Vec<u64>,
    pub executed: usize,
    pub fail_decode: bool,
    pub task_switches: Vec<u16>,
}

impl FakeEmulator {
    pub(crate) fn new(len: u8) -> Self {
        Self {
            len,
            decoded: Vec::new(),
            executed: 0,
            fail_decode: false,
            task_switches: Vec::new(),
        }
    }
}

impl InsnEmulator for FakeEmulator {
    fn decode_at(
        &mut self,
        rip: u64,
        _state: &ArchState,
        _mem: &dyn MemoryView,
    ) -> Result<DecodedInsn, EmulError> {
        self.decoded.push(rip);
        if self.fail_decode {
            return Err(EmulError::Decode(rip));
        }
        Ok(DecodedInsn { rip, len: self.len, detail: Box::new(()) })
    }

    fn execute(
        &mut self,
        insn: &DecodedInsn,
        state: &mut ArchState,
        _mem: &dyn MemoryView,
        _ports: &dyn PortIo,
    ) -> Result<(), EmulError> {
        self.executed += 1;
        state.gp.rip = insn.rip.wrapping_add(u64::from(insn.len));
        Ok(())
    }

    fn task_switch(
        &mut self,
        req: &TaskSwitch,
        state: &mut ArchState,
        _mem: &dyn MemoryView,
    ) -> Result<(), EmulError> {
        self.task_switches.push(req.selector);
        state.seg.tr.selector = req.selector;
        Ok(())
    }
}

/// MSR space backed by a map.  Writes to MSRs absent from `values` are not
/// handled; MSRs in `gp` fault.
#[derive(Default)]
pub(crate) struct FakeMsrs {
    pub values: HashMap<u32, u64>,
    pub gp: HashSet<u32>,
    pub writes: Vec<(u32, u64)>,
}

impl MsrHandler for FakeMsrs {
    fn rdmsr(&mut self, msr: MsrId, _state: &ArchState) -> RdmsrOutcome {
        if self.gp.contains(&msr.0) {
            return RdmsrOutcome::GpException;
        }
        match self.values.get(&msr.0) {
            Some(val) => RdmsrOutcome::Handled(*val),
            None => RdmsrOutcome::NotHandled,
        }
    }

    fn wrmsr(
        &mut self,
        msr: MsrId,
        value: u64,
        _state: &mut ArchState,
    ) -> WrmsrOutcome {
        self.writes.push((msr.0, value));
        if self.gp.contains(&msr.0) {
            return WrmsrOutcome::GpException;
        }
        match self.values.get_mut(&msr.0) {
            Some(slot) => {
                *slot = value;
                WrmsrOutcome::Handled
            }
            None => WrmsrOutcome::NotHandled,
        }
    }
}

/// Everything [`crate::run_vcpu`] consults besides the vCPU itself.
pub(crate) struct Rig {
    pub apic: FakeApic,
    pub ports: FakePorts,
    pub emul: FakeEmulator,
    pub msrs: FakeMsrs,
}

impl Default for Rig {
    fn default() -> Self {
        Self {
            apic: FakeApic::default(),
            ports: FakePorts::default(),
            emul: FakeEmulator::new(3),
            msrs: FakeMsrs::default(),
        }
    }
}

impl Rig {
    pub(crate) fn platform(&mut self) -> Platform<'_> {
        Platform {
            intr: &self.apic,
            ports: &self.ports,
            emul: &mut self.emul,
            msrs: &mut self.msrs,
        }
    }
}
