// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Raw definitions for the macOS Hypervisor.framework x86 interface.
//!
//! Names follow the framework headers (`hv_error.h`, `hv_arch_x86.h`,
//! `hv_arch_vmx.h`, `hv_vmx.h`) so they can be cross-referenced directly.

#![allow(non_camel_case_types)]

mod enums;
mod ffi;
pub mod vmcs;
pub mod vmx;

pub use enums::*;
pub use ffi::*;

pub type hv_return_t = u32;
pub type hv_vcpuid_t = u32;
pub type hv_uvaddr_t = *const core::ffi::c_void;
pub type hv_gpaddr_t = u64;
pub type hv_memory_flags_t = u64;
pub type hv_vm_options_t = u64;
pub type hv_vcpu_options_t = u64;

pub const HV_SUCCESS: hv_return_t = 0;
pub const HV_ERROR: hv_return_t = 0xfae9_4001;
pub const HV_BUSY: hv_return_t = 0xfae9_4002;
pub const HV_BAD_ARGUMENT: hv_return_t = 0xfae9_4003;
pub const HV_NO_RESOURCES: hv_return_t = 0xfae9_4005;
pub const HV_NO_DEVICE: hv_return_t = 0xfae9_4006;
pub const HV_DENIED: hv_return_t = 0xfae9_4007;
pub const HV_UNSUPPORTED: hv_return_t = 0xfae9_400f;

pub const HV_VM_DEFAULT: hv_vm_options_t = 0;
pub const HV_VCPU_DEFAULT: hv_vcpu_options_t = 0;

pub const HV_MEMORY_READ: hv_memory_flags_t = 1 << 0;
pub const HV_MEMORY_WRITE: hv_memory_flags_t = 1 << 1;
pub const HV_MEMORY_EXEC: hv_memory_flags_t = 1 << 2;

/// MSRs the framework allows to be passed through to the guest natively.
pub mod msr {
    pub const MSR_IA32_SYSENTER_CS: u32 = 0x174;
    pub const MSR_IA32_SYSENTER_ESP: u32 = 0x175;
    pub const MSR_IA32_SYSENTER_EIP: u32 = 0x176;
    pub const MSR_EFER: u32 = 0xc000_0080;
    pub const MSR_STAR: u32 = 0xc000_0081;
    pub const MSR_LSTAR: u32 = 0xc000_0082;
    pub const MSR_CSTAR: u32 = 0xc000_0083;
    pub const MSR_FMASK: u32 = 0xc000_0084;
    pub const MSR_FSBASE: u32 = 0xc000_0100;
    pub const MSR_GSBASE: u32 = 0xc000_0101;
    pub const MSR_KERNELGSBASE: u32 = 0xc000_0102;
    pub const MSR_TSC_AUX: u32 = 0xc000_0103;
}
