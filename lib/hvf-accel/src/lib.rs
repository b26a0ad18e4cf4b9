// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A VMX accelerator core: drives guest vCPUs on a hardware-assisted
//! hypervisor on behalf of a machine emulator which owns devices, interrupt
//! controllers and the instruction decoder.

#![allow(clippy::style)]

pub extern crate cpuid_utils;
pub extern crate hvf_api;

pub mod common;
pub mod config;
pub mod cpuid;
pub mod dispatch;
pub mod emul;
pub mod error;
pub mod exits;
pub mod intr;
pub mod lock;
pub mod msr;
pub mod pio;
pub mod vcpu;
pub mod vmm;
mod vmx;

#[cfg(test)]
mod test_util;

pub use dispatch::{run_vcpu, run_vcpu_or_abort, Outcome, Platform};
pub use error::Fatal;
pub use vcpu::{Vcpu, VcpuHandle};
pub use vmm::{Machine, RegionEvent};
