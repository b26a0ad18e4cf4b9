// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! CPUID virtualization.
//!
//! The guest sees a curated blend of a built-in [`CpuProfile`] (vendor
//! identity, supported leaf range) and the host's own CPUID results, with
//! features the accelerator cannot virtualize masked away.

use cpuid_utils::bits::*;
use cpuid_utils::{CpuidIdent, CpuidSource, CpuidValues, CpuidVendor, VendorRegs};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// Names of the built-in CPU profiles.
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    Eq,
    PartialEq,
    Deserialize,
    Serialize,
    Display,
    EnumIter,
    EnumString,
    IntoStaticStr,
)]
pub enum ProfileName {
    #[serde(rename = "vmx32")]
    #[strum(serialize = "vmx32")]
    Vmx32,
    #[serde(rename = "core2duo")]
    #[strum(serialize = "core2duo")]
    Core2Duo,
    #[default]
    #[serde(rename = "vmX")]
    #[strum(serialize = "vmX")]
    VmX,
}

/// A static description of the processor presented to guests.
#[derive(Debug)]
pub struct CpuProfile {
    pub name: ProfileName,
    pub vendor: VendorRegs,
    /// Highest standard leaf.
    pub level: u32,
    /// Highest extended (0x8000_0000-based) leaf.
    pub xlevel: u32,
    /// Highest Centaur (0xC000_0000-based) leaf.
    pub xlevel2: u32,
    pub family: u8,
    pub model: u8,
    pub stepping: u8,
    /// Extended leaf 1 edx features the guest may see.
    pub ext2_features: ExtLeaf1Edx,
    /// Extended leaf 1 ecx features the guest may see.
    pub ext3_features: ExtLeaf1Ecx,
    pub model_id: &'static str,
}

impl CpuProfile {
    pub fn lookup(name: ProfileName) -> &'static CpuProfile {
        match name {
            ProfileName::Vmx32 => &VMX32,
            ProfileName::Core2Duo => &CORE2DUO,
            ProfileName::VmX => &VMX,
        }
    }

    /// The leaf 1 eax encoding of this profile's family/model/stepping.
    pub fn signature(&self) -> u32 {
        let family = u32::from(self.family);
        let model = u32::from(self.model);
        let (ext_family, base_family) = if family > 0xf {
            (family - 0xf, 0xf)
        } else {
            (0, family)
        };
        (ext_family << 20)
            | ((model >> 4) << 16)
            | (base_family << 8)
            | ((model & 0xf) << 4)
            | u32::from(self.stepping & 0xf)
    }
}

const LONG_MODE_EXT2: ExtLeaf1Edx = ExtLeaf1Edx::LONG_MODE
    .union(ExtLeaf1Edx::SYSCALL)
    .union(ExtLeaf1Edx::NX);

static VMX32: CpuProfile = CpuProfile {
    name: ProfileName::Vmx32,
    vendor: CpuidVendor::Intel.regs(),
    level: 4,
    xlevel: 0x8000_0004,
    xlevel2: 0,
    family: 6,
    model: 3,
    stepping: 3,
    ext2_features: LONG_MODE_EXT2,
    ext3_features: ExtLeaf1Ecx::empty(),
    model_id: "vmx32",
};

static CORE2DUO: CpuProfile = CpuProfile {
    name: ProfileName::Core2Duo,
    vendor: CpuidVendor::Intel.regs(),
    level: 10,
    xlevel: 0x8000_0008,
    xlevel2: 0,
    family: 6,
    model: 15,
    stepping: 11,
    ext2_features: LONG_MODE_EXT2,
    ext3_features: ExtLeaf1Ecx::LAHF,
    model_id: "Intel(R) Core(TM)2 Duo GETCPU     T7700  @ 2.40GHz",
};

static VMX: CpuProfile = CpuProfile {
    name: ProfileName::VmX,
    vendor: CpuidVendor::Intel.regs(),
    level: 0xd,
    xlevel: 0x8000_0008,
    xlevel2: 0,
    family: 6,
    model: 15,
    stepping: 11,
    ext2_features: LONG_MODE_EXT2,
    ext3_features: ExtLeaf1Ecx::LAHF,
    model_id: "Common vmX processor",
};

/// Virtual processor topology shared by every vCPU of a machine.
#[derive(Copy, Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Topology {
    #[serde(default = "one")]
    pub cores: u8,
    #[serde(default = "one")]
    pub threads: u8,
}

fn one() -> u8 {
    1
}

impl Default for Topology {
    fn default() -> Self {
        Self { cores: 1, threads: 1 }
    }
}

impl Topology {
    /// Logical processors per package.
    pub fn logical_count(&self) -> u32 {
        u32::from(self.cores) * u32::from(self.threads)
    }
}

const LEAF7_EBX_DISABLED: Leaf7Sub0Ebx = Leaf7Sub0Ebx::AVX512
    .union(Leaf7Sub0Ebx::MPX)
    .union(Leaf7Sub0Ebx::INVPCID);

const XSAVE_SUPPORTED: XsaveStateComponents = XsaveStateComponents::X87
    .union(XsaveStateComponents::SSE)
    .union(XsaveStateComponents::AVX);

const XSAVE_SUB1_SUPPORTED: XsaveSub1Eax =
    XsaveSub1Eax::XSAVEOPT.union(XsaveSub1Eax::XSAVEC);

/// Answers guest CPUID queries for one vCPU.
#[derive(Copy, Clone, Debug)]
pub struct CpuidVirt {
    pub profile: &'static CpuProfile,
    pub topology: Topology,
    pub apic_id: u32,
}

impl CpuidVirt {
    pub fn new(
        profile: &'static CpuProfile,
        topology: Topology,
        apic_id: u32,
    ) -> Self {
        Self { profile, topology, apic_id }
    }

    /// Execute CPUID on `host` and produce the values the guest observes.
    pub fn cpuid(
        &self,
        host: &(impl CpuidSource + ?Sized),
        leaf: u32,
        subleaf: u32,
    ) -> CpuidValues {
        let host_vals = host.query(CpuidIdent::subleaf(leaf, subleaf));
        self.virtualize(leaf, subleaf, host_vals)
    }

    /// Combine the host's answer for (`leaf`, `subleaf`) with the profile.
    pub fn virtualize(
        &self,
        leaf: u32,
        subleaf: u32,
        host: CpuidValues,
    ) -> CpuidValues {
        let profile = self.profile;
        let mut out = CpuidValues::default();

        match leaf {
            0 => {
                out.eax = profile.level;
                out.ebx = profile.vendor.ebx;
                out.edx = profile.vendor.edx;
                out.ecx = profile.vendor.ecx;
            }
            1 => {
                out.eax = host.eax;

                // Keep the brand index and CLFLUSH size; the APIC ID and the
                // logical processor count come from the virtual topology.
                out.ebx = (self.apic_id << LEAF1_EBX_APIC_ID_SHIFT)
                    | (host.ebx & 0xffff);
                out.edx = host.edx & !Leaf1Edx::HTT.bits();
                let count = self.topology.logical_count();
                if count > 1 {
                    out.ebx |= (count << LEAF1_EBX_LOGICAL_COUNT_SHIFT)
                        & LEAF1_EBX_LOGICAL_COUNT_MASK;
                    out.edx |= Leaf1Edx::HTT.bits();
                }

                out.ecx = (host.ecx & !Leaf1Ecx::HOST_ONLY.bits())
                    | Leaf1Ecx::HV_GUEST.bits();
            }
            // Cache descriptors, deterministic cache parameters,
            // MONITOR/MWAIT parameters, DCA.
            2 | 4 | 5 | 9 => out = host,
            7 => {
                out = host;
                out.ebx &= !LEAF7_EBX_DISABLED.bits();
                out.ecx &= !Leaf7Sub0Ecx::AVX512.bits();
                out.edx &= !Leaf7Sub0Edx::AVX512.bits();
            }
            // Thermal/power management, architectural performance
            // monitoring and extended topology are not virtualized.
            6 | 0xa | 0xb => {}
            0xd => {
                out = host;
                match subleaf {
                    0 => {
                        out.eax &= XSAVE_SUPPORTED.bits();
                        out.edx = 0;
                    }
                    1 => out.eax &= XSAVE_SUB1_SUPPORTED.bits(),
                    _ => {}
                }
            }
            0x8000_0000 => {
                out.eax = profile.xlevel;
                out.ebx = profile.vendor.ebx;
                out.edx = profile.vendor.edx;
                out.ecx = profile.vendor.ecx;
            }
            0x8000_0001 => {
                out.eax = host.eax;
                out.ecx = host.ecx & profile.ext3_features.bits();
                out.edx = host.edx & profile.ext2_features.bits();
            }
            // Brand string and cache/TLB descriptors.
            0x8000_0002..=0x8000_0006 => out = host,
            0x8000_0007 => {
                out = host;
                out.edx &= !ExtLeaf7Edx::INVARIANT_TSC.bits();
            }
            0x8000_0008 => out = host,
            CENTAUR_BASE_LEAF => out.eax = profile.xlevel2,
            _ => {}
        }

        out
    }
}
