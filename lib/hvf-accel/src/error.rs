// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Unrecoverable conditions.
//!
//! Once the hypervisor and the software view of a vCPU or of guest memory
//! disagree there is no safe way to keep running guest code.  Such conditions
//! are reported as [`Fatal`], which callers are expected to hand to
//! [`Fatal::abort`] rather than attempt to recover from.

use hvf_api::HvError;
use thiserror::Error;

use crate::emul::EmulError;

#[derive(Debug, Error)]
pub enum Fatal {
    #[error("{op} failed: {err}")]
    Hypervisor {
        op: &'static str,
        #[source]
        err: HvError,
    },

    #[error("no free memory slot for region {start:#x}+{size:#x}")]
    NoFreeSlots { start: u64, size: u64 },

    #[error("unsupported control register access: cr{0}")]
    UnsupportedCr(u8),

    #[error("instruction emulation failed at rip {rip:#x}")]
    Emulation {
        rip: u64,
        #[source]
        err: EmulError,
    },

    #[error(
        "decoded length {decoded} differs from exit length {exit} at rip {rip:#x}"
    )]
    InsnLength { rip: u64, decoded: u8, exit: u8 },

    #[error("port I/O of unsupported width {0}")]
    IoWidth(u8),
}

impl Fatal {
    /// Log this condition and terminate the process.
    pub fn abort(self, log: &slog::Logger) -> ! {
        slog::crit!(log, "unrecoverable accelerator error";
            "error" => %self,
        );
        std::process::abort()
    }
}

/// Attach the name of the failing hypervisor operation to an [`HvError`].
pub(crate) trait HvResultExt<T> {
    fn during(self, op: &'static str) -> Result<T, Fatal>;
}

impl<T> HvResultExt<T> for Result<T, HvError> {
    fn during(self, op: &'static str) -> Result<T, Fatal> {
        self.map_err(|err| Fatal::Hypervisor { op, err })
    }
}
