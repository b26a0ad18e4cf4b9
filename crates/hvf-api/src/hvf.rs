// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hypervisor.framework backend.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::*;

static VM_CREATED: AtomicBool = AtomicBool::new(false);

/// The process-wide Hypervisor.framework VM.
///
/// The framework supports a single VM per process, so at most one `Hvf` may
/// exist at a time.
pub struct Hvf {
    log: slog::Logger,
}

impl Hvf {
    pub fn create(log: slog::Logger) -> Result<Self, HvError> {
        if VM_CREATED.swap(true, Ordering::SeqCst) {
            return Err(HvError::Busy);
        }
        // Safety: no pointers are passed and the framework state is
        // process-global.
        if let Err(e) = HvError::check(unsafe { hv_vm_create(HV_VM_DEFAULT) })
        {
            VM_CREATED.store(false, Ordering::SeqCst);
            return Err(e);
        }
        Ok(Self { log })
    }
}

impl Drop for Hvf {
    fn drop(&mut self) {
        // Safety: this object is the sole owner of the VM.
        HvError::warn_on_failure(&self.log, "hv_vm_destroy", unsafe {
            hv_vm_destroy()
        });
        VM_CREATED.store(false, Ordering::SeqCst);
    }
}

impl Hypervisor for Hvf {
    unsafe fn map(
        &self,
        host_addr: *mut u8,
        gpa: u64,
        size: usize,
        prot: Prot,
    ) -> Result<(), HvError> {
        HvError::check(hv_vm_map(host_addr.cast(), gpa, size, prot.bits()))
    }

    fn unmap(&self, gpa: u64, size: usize) -> Result<(), HvError> {
        HvError::check(unsafe { hv_vm_unmap(gpa, size) })
    }

    fn protect(
        &self,
        gpa: u64,
        size: usize,
        prot: Prot,
    ) -> Result<(), HvError> {
        HvError::check(unsafe { hv_vm_protect(gpa, size, prot.bits()) })
    }

    fn read_capability(
        &self,
        cap: hv_vmx_capability_t,
    ) -> Result<u64, HvError> {
        let mut val = 0u64;
        HvError::check(unsafe { hv_vmx_read_capability(cap, &mut val) })?;
        Ok(val)
    }

    fn create_vcpu(&self) -> Result<Box<dyn VcpuHw>, HvError> {
        let mut id: hv_vcpuid_t = 0;
        HvError::check(unsafe { hv_vcpu_create(&mut id, HV_VCPU_DEFAULT) })?;
        let log = self.log.new(slog::o!("vcpu" => id));
        Ok(Box::new(HvfVcpu { id, log }))
    }
}

/// A Hypervisor.framework vCPU, bound to the thread which created it.
pub struct HvfVcpu {
    id: hv_vcpuid_t,
    log: slog::Logger,
}

impl VcpuHw for HvfVcpu {
    fn id(&self) -> hv_vcpuid_t {
        self.id
    }

    fn read_reg(&self, reg: hv_x86_reg_t) -> Result<u64, HvError> {
        let mut val = 0u64;
        HvError::check(unsafe {
            hv_vcpu_read_register(self.id, reg, &mut val)
        })?;
        Ok(val)
    }

    fn write_reg(&self, reg: hv_x86_reg_t, val: u64) -> Result<(), HvError> {
        HvError::check(unsafe { hv_vcpu_write_register(self.id, reg, val) })
    }

    fn read_vmcs(&self, field: u32) -> Result<u64, HvError> {
        let mut val = 0u64;
        HvError::check(unsafe {
            hv_vmx_vcpu_read_vmcs(self.id, field, &mut val)
        })?;
        Ok(val)
    }

    fn write_vmcs(&self, field: u32, val: u64) -> Result<(), HvError> {
        HvError::check(unsafe { hv_vmx_vcpu_write_vmcs(self.id, field, val) })
    }

    fn enable_native_msr(
        &self,
        msr: u32,
        enable: bool,
    ) -> Result<(), HvError> {
        HvError::check(unsafe {
            hv_vcpu_enable_native_msr(self.id, msr, enable)
        })
    }

    fn run(&self) -> Result<(), HvError> {
        HvError::check(unsafe { hv_vcpu_run(self.id) })
    }

    fn invalidate_tlb(&self) -> Result<(), HvError> {
        HvError::check(unsafe { hv_vcpu_invalidate_tlb(self.id) })
    }

    fn flush(&self) -> Result<(), HvError> {
        HvError::check(unsafe { hv_vcpu_flush(self.id) })
    }

    fn kicker(&self) -> Box<KickFn> {
        let id = self.id;
        let log = self.log.clone();
        Box::new(move || {
            // Safety: `hv_vcpu_interrupt` may be called from any thread and
            // reads exactly one id from the supplied pointer.
            let ret = unsafe { hv_vcpu_interrupt(&id, 1) };
            HvError::warn_on_failure(&log, "hv_vcpu_interrupt", ret);
        })
    }

    fn destroy(self: Box<Self>) -> Result<(), HvError> {
        HvError::check(unsafe { hv_vcpu_destroy(self.id) })
    }
}
