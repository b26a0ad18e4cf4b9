// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Typed access to a hardware-assisted (VMX) hypervisor.
//!
//! The [`Hypervisor`] and [`VcpuHw`] traits describe the handful of host
//! primitives the accelerator core needs: guest memory mapping, vCPU
//! creation, register/VMCS access and the blocking run call.  On macOS x86-64
//! hosts they are implemented on top of Hypervisor.framework by [`Hvf`].

pub use hvf_api_sys::*;

use thiserror::Error;

#[cfg(all(target_os = "macos", target_arch = "x86_64"))]
mod hvf;
#[cfg(all(target_os = "macos", target_arch = "x86_64"))]
pub use hvf::{Hvf, HvfVcpu};

/// A failed call into the host hypervisor, identified by its return code.
#[derive(Copy, Clone, Debug, Error, Eq, PartialEq)]
pub enum HvError {
    #[error("HV_ERROR")]
    Error,
    #[error("HV_BUSY")]
    Busy,
    #[error("HV_BAD_ARGUMENT")]
    BadArgument,
    #[error("HV_NO_RESOURCES")]
    NoResources,
    #[error("HV_NO_DEVICE")]
    NoDevice,
    #[error("HV_DENIED")]
    Denied,
    #[error("HV_UNSUPPORTED")]
    Unsupported,
    #[error("unknown hypervisor error {0:#x}")]
    Unknown(hv_return_t),
}

impl HvError {
    /// Convert a framework return code into a result.
    pub fn check(ret: hv_return_t) -> Result<(), HvError> {
        match ret {
            HV_SUCCESS => Ok(()),
            HV_ERROR => Err(HvError::Error),
            HV_BUSY => Err(HvError::Busy),
            HV_BAD_ARGUMENT => Err(HvError::BadArgument),
            HV_NO_RESOURCES => Err(HvError::NoResources),
            HV_NO_DEVICE => Err(HvError::NoDevice),
            HV_DENIED => Err(HvError::Denied),
            HV_UNSUPPORTED => Err(HvError::Unsupported),
            other => Err(HvError::Unknown(other)),
        }
    }

    /// The raw framework code for this error.
    pub fn code(&self) -> hv_return_t {
        match self {
            HvError::Error => HV_ERROR,
            HvError::Busy => HV_BUSY,
            HvError::BadArgument => HV_BAD_ARGUMENT,
            HvError::NoResources => HV_NO_RESOURCES,
            HvError::NoDevice => HV_NO_DEVICE,
            HvError::Denied => HV_DENIED,
            HvError::Unsupported => HV_UNSUPPORTED,
            HvError::Unknown(code) => *code,
        }
    }

    /// Check `ret` from a call whose failure the caller cannot act upon,
    /// logging it at warn level.  Returns whether the call succeeded.
    pub fn warn_on_failure(
        log: &slog::Logger,
        op: &'static str,
        ret: hv_return_t,
    ) -> bool {
        match HvError::check(ret) {
            Ok(()) => true,
            Err(e) => {
                slog::warn!(log, "hypervisor call failed";
                    "op" => op,
                    "error" => %e,
                );
                false
            }
        }
    }
}

bitflags::bitflags! {
    /// Access permissions of a guest-physical mapping.
    #[derive(Default, Copy, Clone, Debug, Eq, PartialEq)]
    pub struct Prot: u64 {
        const NONE = 0;
        const READ = HV_MEMORY_READ;
        const WRITE = HV_MEMORY_WRITE;
        const EXEC = HV_MEMORY_EXEC;
        const RW = Self::READ.bits() | Self::WRITE.bits();
        const RX = Self::READ.bits() | Self::EXEC.bits();
        const ALL = Self::READ.bits() | Self::WRITE.bits() | Self::EXEC.bits();
    }
}

/// Wakes a vCPU blocked in [`VcpuHw::run`], forcing it to exit guest mode.
pub type KickFn = dyn Fn() + Send + Sync;

/// VM-wide operations of the host hypervisor.
///
/// There is one VM per process; the object implementing this trait owns it.
pub trait Hypervisor: Send + Sync {
    /// Map `size` bytes of host memory at `host_addr` into the guest at `gpa`.
    ///
    /// # Safety
    ///
    /// `host_addr` must point to an allocation valid for `size` bytes which
    /// stays alive (and is not otherwise freed or remapped) until the range is
    /// unmapped again.
    unsafe fn map(
        &self,
        host_addr: *mut u8,
        gpa: u64,
        size: usize,
        prot: Prot,
    ) -> Result<(), HvError>;

    /// Remove the guest mapping of `[gpa, gpa + size)`.
    fn unmap(&self, gpa: u64, size: usize) -> Result<(), HvError>;

    /// Change the permissions of an already-mapped guest range.
    fn protect(&self, gpa: u64, size: usize, prot: Prot)
        -> Result<(), HvError>;

    /// Read one of the VMX capability words of the host.
    fn read_capability(&self, cap: hv_vmx_capability_t)
        -> Result<u64, HvError>;

    /// Create a vCPU bound to the calling thread.
    fn create_vcpu(&self) -> Result<Box<dyn VcpuHw>, HvError>;
}

/// Operations on one hardware vCPU.
///
/// A hardware vCPU may only be driven from the thread that created it; the
/// one exception is the closure returned by [`VcpuHw::kicker`].
pub trait VcpuHw {
    /// Hypervisor-assigned identifier of this vCPU.
    fn id(&self) -> hv_vcpuid_t;

    fn read_reg(&self, reg: hv_x86_reg_t) -> Result<u64, HvError>;
    fn write_reg(&self, reg: hv_x86_reg_t, val: u64) -> Result<(), HvError>;

    fn read_vmcs(&self, field: u32) -> Result<u64, HvError>;
    fn write_vmcs(&self, field: u32, val: u64) -> Result<(), HvError>;

    /// Let the guest access `msr` without trapping.
    fn enable_native_msr(&self, msr: u32, enable: bool)
        -> Result<(), HvError>;

    /// Run guest code until the next VM exit.
    ///
    /// This blocks for as long as the guest executes without trapping.
    fn run(&self) -> Result<(), HvError>;

    fn invalidate_tlb(&self) -> Result<(), HvError>;
    fn flush(&self) -> Result<(), HvError>;

    /// Produce a handle other threads may use to force this vCPU out of
    /// [`VcpuHw::run`].
    fn kicker(&self) -> Box<KickFn>;

    /// Release the hardware vCPU.
    fn destroy(self: Box<Self>) -> Result<(), HvError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn return_codes() {
        assert_eq!(HvError::check(HV_SUCCESS), Ok(()));
        assert_eq!(HvError::check(HV_BUSY), Err(HvError::Busy));
        assert_eq!(HvError::check(0x1234), Err(HvError::Unknown(0x1234)));
        for code in [HV_ERROR, HV_BAD_ARGUMENT, HV_DENIED, HV_UNSUPPORTED] {
            assert_eq!(HvError::check(code).unwrap_err().code(), code);
        }
    }

    #[test]
    fn error_names_code() {
        assert_eq!(HvError::NoResources.to_string(), "HV_NO_RESOURCES");
    }

    /// Records the level and message of everything logged through it.
    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<(slog::Level, String)>>>);

    impl slog::Drain for Capture {
        type Ok = ();
        type Err = slog::Never;

        fn log(
            &self,
            record: &slog::Record,
            _values: &slog::OwnedKVList,
        ) -> Result<(), slog::Never> {
            self.0
                .lock()
                .unwrap()
                .push((record.level(), record.msg().to_string()));
            Ok(())
        }
    }

    #[test]
    fn ignored_failures_are_logged() {
        let capture = Capture::default();
        let log = slog::Logger::root(capture.clone(), slog::o!());

        assert!(HvError::warn_on_failure(&log, "hv_vm_destroy", HV_SUCCESS));
        assert!(capture.0.lock().unwrap().is_empty());

        assert!(!HvError::warn_on_failure(&log, "hv_vcpu_interrupt", HV_BUSY));
        let records = capture.0.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0, slog::Level::Warning);
        assert_eq!(records[0].1, "hypervisor call failed");
    }
}
