// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::vcpu::ArchState;

/// A model-specific register number, as taken from ECX.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct MsrId(pub u32);

/// Result of asking an [`MsrHandler`] to service RDMSR.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RdmsrOutcome {
    /// No handler claimed the MSR.  The guest reads zero.
    NotHandled,

    /// The value to place in EDX:EAX.
    Handled(u64),

    /// The read faults; #GP(0) is injected and RIP stays put.
    GpException,
}

/// Result of asking an [`MsrHandler`] to service WRMSR.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WrmsrOutcome {
    /// No handler claimed the MSR.  The write is dropped.
    NotHandled,

    Handled,

    /// The write faults; #GP(0) is injected and RIP stays put.
    GpException,
}

/// Emulation of MSRs which are not passed through to the guest natively.
///
/// Handlers see the vCPU's architectural state as of the exit and may update
/// it (for example when a write to EFER changes paging mode).
pub trait MsrHandler {
    fn rdmsr(&mut self, msr: MsrId, state: &ArchState) -> RdmsrOutcome;
    fn wrmsr(
        &mut self,
        msr: MsrId,
        value: u64,
        state: &mut ArchState,
    ) -> WrmsrOutcome;
}
