// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! CPUID of the processor we are running on.

use crate::{CpuidIdent, CpuidSource, CpuidValues};

/// Queries the supplied CPUID leaf on the caller's machine.
pub fn query(leaf: CpuidIdent) -> CpuidValues {
    unsafe {
        core::arch::x86_64::__cpuid_count(leaf.leaf, leaf.subleaf.unwrap_or(0))
    }
    .into()
}

/// Executes the CPUID instruction on the host for every query.
#[derive(Copy, Clone, Debug, Default)]
pub struct HostCpu;

impl CpuidSource for HostCpu {
    fn query(&self, ident: CpuidIdent) -> CpuidValues {
        query(ident)
    }
}
