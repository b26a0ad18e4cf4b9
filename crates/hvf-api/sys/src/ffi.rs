// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#[cfg(all(target_os = "macos", target_arch = "x86_64"))]
mod framework {
    use crate::*;

    #[link(name = "Hypervisor", kind = "framework")]
    extern "C" {
        pub fn hv_vm_create(flags: hv_vm_options_t) -> hv_return_t;
        pub fn hv_vm_destroy() -> hv_return_t;
        pub fn hv_vm_map(
            uva: hv_uvaddr_t,
            gpa: hv_gpaddr_t,
            size: usize,
            flags: hv_memory_flags_t,
        ) -> hv_return_t;
        pub fn hv_vm_unmap(gpa: hv_gpaddr_t, size: usize) -> hv_return_t;
        pub fn hv_vm_protect(
            gpa: hv_gpaddr_t,
            size: usize,
            flags: hv_memory_flags_t,
        ) -> hv_return_t;
        pub fn hv_vm_sync_tsc(tsc: u64) -> hv_return_t;

        pub fn hv_vcpu_create(
            vcpu: *mut hv_vcpuid_t,
            flags: hv_vcpu_options_t,
        ) -> hv_return_t;
        pub fn hv_vcpu_destroy(vcpu: hv_vcpuid_t) -> hv_return_t;
        pub fn hv_vcpu_read_register(
            vcpu: hv_vcpuid_t,
            reg: hv_x86_reg_t,
            value: *mut u64,
        ) -> hv_return_t;
        pub fn hv_vcpu_write_register(
            vcpu: hv_vcpuid_t,
            reg: hv_x86_reg_t,
            value: u64,
        ) -> hv_return_t;
        pub fn hv_vcpu_enable_native_msr(
            vcpu: hv_vcpuid_t,
            msr: u32,
            enable: bool,
        ) -> hv_return_t;
        pub fn hv_vcpu_run(vcpu: hv_vcpuid_t) -> hv_return_t;
        pub fn hv_vcpu_interrupt(
            vcpus: *const hv_vcpuid_t,
            vcpu_count: u32,
        ) -> hv_return_t;
        pub fn hv_vcpu_invalidate_tlb(vcpu: hv_vcpuid_t) -> hv_return_t;
        pub fn hv_vcpu_flush(vcpu: hv_vcpuid_t) -> hv_return_t;

        pub fn hv_vmx_read_capability(
            field: hv_vmx_capability_t,
            value: *mut u64,
        ) -> hv_return_t;
        pub fn hv_vmx_vcpu_read_vmcs(
            vcpu: hv_vcpuid_t,
            field: u32,
            value: *mut u64,
        ) -> hv_return_t;
        pub fn hv_vmx_vcpu_write_vmcs(
            vcpu: hv_vcpuid_t,
            field: u32,
            value: u64,
        ) -> hv_return_t;
    }
}

#[cfg(all(target_os = "macos", target_arch = "x86_64"))]
pub use framework::*;
