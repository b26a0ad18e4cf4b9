// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[cfg(target_arch = "x86_64")]
use cpuid_utils::host::HostCpu;
use cpuid_utils::CpuidSource;
use hvf_api::Hypervisor;
use slog::Logger;

use crate::config::{Config, ConfigError};
use crate::cpuid::CpuProfile;
use crate::lock::ExecLock;
use crate::vmm::{RegionEvent, SlotManager};

type ResetFn = dyn Fn() + Send + Sync;

/// The runtime context of one guest machine.
///
/// Owns the hypervisor VM, the memory slot table and the global execution
/// lock.  vCPU threads hold it through an `Arc`.
pub struct Machine {
    hv: Arc<dyn Hypervisor>,
    slots: SlotManager,
    exec_lock: ExecLock,
    config: Config,
    profile: &'static CpuProfile,
    cpuid_source: Box<dyn CpuidSource + Send + Sync>,
    reset_requests: AtomicU64,
    reset_handler: Mutex<Option<Box<ResetFn>>>,
    log: Logger,
}

impl Machine {
    /// Create a machine whose vCPUs observe the host's CPUID.
    #[cfg(target_arch = "x86_64")]
    pub fn new(
        hv: Arc<dyn Hypervisor>,
        config: &Config,
        log: Logger,
    ) -> Result<Arc<Self>, ConfigError> {
        Self::new_with_cpuid(hv, config, Box::new(HostCpu), log)
    }

    /// Create a machine whose vCPUs take their CPUID baseline from `source`
    /// rather than from the host processor.
    pub fn new_with_cpuid(
        hv: Arc<dyn Hypervisor>,
        config: &Config,
        cpuid_source: Box<dyn CpuidSource + Send + Sync>,
        log: Logger,
    ) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        let profile = CpuProfile::lookup(config.accel.cpu_profile);
        slog::info!(log, "creating machine";
            "slots" => config.accel.slots,
            "cpu_profile" => %config.accel.cpu_profile,
            "cores" => config.topology.cores,
            "threads" => config.topology.threads,
        );

        let slots =
            SlotManager::new(hv.clone(), config.accel.slots, log.clone());
        Ok(Arc::new(Self {
            hv,
            slots,
            exec_lock: ExecLock::new(),
            config: config.clone(),
            profile,
            cpuid_source,
            reset_requests: AtomicU64::new(0),
            reset_handler: Mutex::new(None),
            log,
        }))
    }

    pub fn hv(&self) -> &dyn Hypervisor {
        &*self.hv
    }

    pub fn slots(&self) -> &SlotManager {
        &self.slots
    }

    pub fn exec_lock(&self) -> &ExecLock {
        &self.exec_lock
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn profile(&self) -> &'static CpuProfile {
        self.profile
    }

    pub(crate) fn cpuid_source(&self) -> &(dyn CpuidSource + Send + Sync) {
        &*self.cpuid_source
    }

    pub fn log(&self) -> &Logger {
        &self.log
    }

    /// Entry point for the memory topology owner.
    ///
    /// A failure leaves the slot table and the hypervisor in disagreement,
    /// so it terminates the process.
    pub fn notify_region_change(&self, ev: &RegionEvent) {
        if let Err(e) = self.slots.apply_region_change(ev) {
            e.abort(&self.log);
        }
    }

    /// Install the callback run (on the requesting vCPU thread) whenever a
    /// guest asks for a full machine reset.
    pub fn on_reset(&self, f: impl Fn() + Send + Sync + 'static) {
        *self.reset_handler.lock().unwrap() = Some(Box::new(f));
    }

    pub fn request_reset(&self) {
        self.reset_requests.fetch_add(1, Ordering::SeqCst);
        slog::info!(self.log, "guest requested machine reset");
        if let Some(handler) = self.reset_handler.lock().unwrap().as_ref() {
            handler();
        }
    }

    /// Count of reset requests issued since creation.
    pub fn reset_requests(&self) -> u64 {
        self.reset_requests.load(Ordering::SeqCst)
    }
}
