// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Software emulation of instructions the hardware cannot complete on its
//! own: MMIO accesses, string port I/O, APIC page accesses and task
//! switches.
//!
//! Decoding and execution are the job of an external [`InsnEmulator`]; this
//! module materializes the vCPU's register state for it and reports its
//! failures as [`Fatal`].

use std::any::Any;

use thiserror::Error;

use crate::error::Fatal;
use crate::exits::{ExitRecord, TaskSwitch};
use crate::pio::PortIo;
use crate::vcpu::{ArchState, Vcpu};
use crate::vmm::SlotManager;

#[derive(Debug, Error)]
pub enum EmulError {
    #[error("undecodable instruction at {0:#x}")]
    Decode(u64),

    #[error("unsupported instruction: {0}")]
    Unsupported(String),

    #[error("guest memory access at {0:#x} failed")]
    Memory(u64),

    #[error("task switch to selector {0:#x} failed")]
    TaskSwitch(u16),
}

/// An instruction decoded by an [`InsnEmulator`].
pub struct DecodedInsn {
    pub rip: u64,
    pub len: u8,
    /// Emulator-private representation of the instruction.
    pub detail: Box<dyn Any + Send>,
}

impl std::fmt::Debug for DecodedInsn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedInsn")
            .field("rip", &self.rip)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

/// Guest-physical memory as seen by the emulator.
pub trait MemoryView {
    fn read(&self, gpa: u64, buf: &mut [u8]) -> bool;
    fn write(&self, gpa: u64, buf: &[u8]) -> bool;
}

impl MemoryView for SlotManager {
    fn read(&self, gpa: u64, buf: &mut [u8]) -> bool {
        self.read_phys(gpa, buf)
    }
    fn write(&self, gpa: u64, buf: &[u8]) -> bool {
        self.write_phys(gpa, buf)
    }
}

/// The instruction decoder and executor.
pub trait InsnEmulator {
    fn decode_at(
        &mut self,
        rip: u64,
        state: &ArchState,
        mem: &dyn MemoryView,
    ) -> Result<DecodedInsn, EmulError>;

    /// Execute `insn`, including advancing RIP past it.
    fn execute(
        &mut self,
        insn: &DecodedInsn,
        state: &mut ArchState,
        mem: &dyn MemoryView,
        ports: &dyn PortIo,
    ) -> Result<(), EmulError>;

    /// Perform a hardware task switch.
    fn task_switch(
        &mut self,
        req: &TaskSwitch,
        state: &mut ArchState,
        mem: &dyn MemoryView,
    ) -> Result<(), EmulError>;
}

/// Decode and execute the instruction at the exit's RIP.
///
/// With `check_len`, the decoded length must agree with the one the
/// hardware reported for the exit.
pub(crate) fn emulate(
    vcpu: &mut Vcpu,
    exit: &ExitRecord,
    check_len: bool,
    emul: &mut dyn InsnEmulator,
    ports: &dyn PortIo,
) -> Result<(), Fatal> {
    let machine = vcpu.machine().clone();
    let mem = machine.slots();
    let rip = exit.rip;
    let state = vcpu.state_mut()?;

    let insn = emul
        .decode_at(rip, state, mem)
        .map_err(|err| Fatal::Emulation { rip, err })?;
    if check_len && insn.len != exit.inst_len {
        return Err(Fatal::InsnLength {
            rip,
            decoded: insn.len,
            exit: exit.inst_len,
        });
    }
    emul.execute(&insn, state, mem, ports)
        .map_err(|err| Fatal::Emulation { rip, err })
}

/// Hand a task switch exit to the emulator.
pub(crate) fn task_switch(
    vcpu: &mut Vcpu,
    exit: &ExitRecord,
    req: &TaskSwitch,
    emul: &mut dyn InsnEmulator,
) -> Result<(), Fatal> {
    let machine = vcpu.machine().clone();
    let state = vcpu.state_mut()?;
    emul.task_switch(req, state, machine.slots())
        .map_err(|err| Fatal::Emulation { rip: exit.rip, err })
}
