// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bitflags and constants that provide symbolic names for the various bits in
//! various CPUID leaves.
//!
//! Definitions here are taken from the Intel 64 and IA-32 Architectures
//! Software Developer's Manual, volume 2A, CPUID instruction reference.

pub const STANDARD_BASE_LEAF: u32 = 0;
pub const HYPERVISOR_BASE_LEAF: u32 = 0x4000_0000;
pub const EXTENDED_BASE_LEAF: u32 = 0x8000_0000;
pub const CENTAUR_BASE_LEAF: u32 = 0xC000_0000;

/// Leaf 1 ebx bits 31:24, the initial local APIC ID.
pub const LEAF1_EBX_APIC_ID_SHIFT: u32 = 24;
/// Leaf 1 ebx bits 23:16, the maximum number of addressable logical
/// processors in the package.
pub const LEAF1_EBX_LOGICAL_COUNT_SHIFT: u32 = 16;
pub const LEAF1_EBX_LOGICAL_COUNT_MASK: u32 = 0xff << 16;

bitflags::bitflags! {
    /// Leaf 1 ecx: instruction feature identifiers.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Leaf1Ecx: u32 {
        const SSE3 = 1 << 0;
        const PCLMULQDQ = 1 << 1;
        const DTES64 = 1 << 2;
        const MONITOR = 1 << 3;
        const DS_CPL = 1 << 4;
        const VMX = 1 << 5;
        const SMX = 1 << 6;
        const EST = 1 << 7;
        const TM2 = 1 << 8;
        const SSSE3 = 1 << 9;
        const CNXT_ID = 1 << 10;
        const FMA = 1 << 12;
        const CMPXCHG16B = 1 << 13;
        const XTPR = 1 << 14;
        const PDCM = 1 << 15;
        const PCID = 1 << 17;
        const DCA = 1 << 18;
        const SSE41 = 1 << 19;
        const SSE42 = 1 << 20;
        const X2APIC = 1 << 21;
        const MOVBE = 1 << 22;
        const POPCNT = 1 << 23;
        const TSC_DEADLINE = 1 << 24;
        const AES = 1 << 25;
        const XSAVE = 1 << 26;
        const OSXSAVE = 1 << 27;
        const AVX = 1 << 28;
        const F16C = 1 << 29;
        const RDRAND = 1 << 30;
        const HV_GUEST = 1 << 31;

        /// Features which only make sense on bare metal, or which the guest
        /// cannot be given through the emulation path.
        const HOST_ONLY = Self::OSXSAVE.bits() | Self::MONITOR.bits() |
            Self::X2APIC.bits() | Self::VMX.bits() |
            Self::TSC_DEADLINE.bits() | Self::TM2.bits() | Self::PCID.bits() |
            Self::EST.bits() | Self::SSE42.bits() | Self::SSE41.bits();
    }

    /// Leaf 1 edx: Instruction feature identifiers.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Leaf1Edx: u32 {
        const FPU = 1 << 0;
        const VME = 1 << 1;
        const DE = 1 << 2;
        const PSE = 1 << 3;
        const TSC = 1 << 4;
        const MSR = 1 << 5;
        const PAE = 1 << 6;
        const MCE = 1 << 7;
        const CMPXCHG8B = 1 << 8;
        const APIC = 1 << 9;
        const SYSENTER = 1 << 11;
        const MTRR = 1 << 12;
        const PGE = 1 << 13;
        const MCA = 1 << 14;
        const CMOV = 1 << 15;
        const PAT = 1 << 16;
        const PSE36 = 1 << 17;
        const CLFLUSH = 1 << 19;
        const MMX = 1 << 23;
        const FXSR = 1 << 24;
        const SSE = 1 << 25;
        const SSE2 = 1 << 26;
        const HTT = 1 << 28;
    }

    /// Leaf 7 subleaf 0 ebx: instruction feature identifiers.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Leaf7Sub0Ebx: u32 {
        const FSGSBASE = 1 << 0;
        const BMI1 = 1 << 3;
        const AVX2 = 1 << 5;
        const SMEP = 1 << 7;
        const BMI2 = 1 << 8;
        const INVPCID = 1 << 10;
        const PQM = 1 << 12;
        const MPX = 1 << 14;
        const PQE = 1 << 15;
        const AVX512F = 1 << 16;
        const AVX512DQ = 1 << 17;
        const RDSEED = 1 << 18;
        const ADX = 1 << 19;
        const SMAP = 1 << 20;
        const AVX512IFMA = 1 << 21;
        const CLFLUSHOPT = 1 << 23;
        const CLWB = 1 << 24;
        const AVX512PF = 1 << 26;
        const AVX512ER = 1 << 27;
        const AVX512CD = 1 << 28;
        const SHA = 1 << 29;
        const AVX512BW = 1 << 30;
        const AVX512VL = 1 << 31;

        const AVX512 = Self::AVX512F.bits() | Self::AVX512DQ.bits() |
            Self::AVX512IFMA.bits() | Self::AVX512PF.bits() |
            Self::AVX512ER.bits() | Self::AVX512CD.bits() |
            Self::AVX512BW.bits() | Self::AVX512VL.bits();
    }

    /// Leaf 7 subleaf 0 ecx: instruction feature identifiers.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Leaf7Sub0Ecx: u32 {
        const PREFETCHWT1 = 1 << 0;
        const AVX512_VBMI = 1 << 1;
        const UMIP = 1 << 2;
        const PKU = 1 << 3;
        const OSPKE = 1 << 4;
        const AVX512_VBMI2 = 1 << 6;
        const GFNI = 1 << 8;
        const VAES = 1 << 9;
        const VPCLMULQDQ = 1 << 10;
        const AVX512_VNNI = 1 << 11;
        const AVX512_BITALG = 1 << 12;
        const AVX512_VPOPCNTDQ = 1 << 14;
        const RDPID = 1 << 22;

        const AVX512 = Self::AVX512_VBMI.bits() | Self::AVX512_VBMI2.bits() |
            Self::AVX512_VNNI.bits() | Self::AVX512_BITALG.bits() |
            Self::AVX512_VPOPCNTDQ.bits();
    }

    /// Leaf 7 subleaf 0 edx: instruction feature identifiers.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Leaf7Sub0Edx: u32 {
        const AVX512_4VNNIW = 1 << 2;
        const AVX512_4FMAPS = 1 << 3;
        const AVX512_VP2INTERSECT = 1 << 8;
        const MD_CLEAR = 1 << 10;
        const AVX512_FP16 = 1 << 23;

        const AVX512 = Self::AVX512_4VNNIW.bits() | Self::AVX512_4FMAPS.bits() |
            Self::AVX512_VP2INTERSECT.bits() | Self::AVX512_FP16.bits();
    }

    /// Leaf 0xD subleaf 0 eax: state components which may be enabled in
    /// XCR0 (low half).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct XsaveStateComponents: u32 {
        const X87 = 1 << 0;
        const SSE = 1 << 1;
        const AVX = 1 << 2;
        const BNDREGS = 1 << 3;
        const BNDCSR = 1 << 4;
        const OPMASK = 1 << 5;
        const ZMM_HI256 = 1 << 6;
        const HI16_ZMM = 1 << 7;
        const PKRU = 1 << 9;
    }

    /// Leaf 0xD subleaf 1 eax: XSAVE instruction extensions.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct XsaveSub1Eax: u32 {
        const XSAVEOPT = 1 << 0;
        const XSAVEC = 1 << 1;
        const XGETBV1 = 1 << 2;
        const XSAVES = 1 << 3;
    }

    /// Leaf 0x8000_0001 ecx: extended processor feature identifiers.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ExtLeaf1Ecx: u32 {
        const LAHF = 1 << 0;
        const LZCNT = 1 << 5;
        const PREFETCHW = 1 << 8;
    }

    /// Leaf 0x8000_0001 edx: extended processor feature identifiers.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ExtLeaf1Edx: u32 {
        const SYSCALL = 1 << 11;
        const NX = 1 << 20;
        const GB_PAGE = 1 << 26;
        const RDTSCP = 1 << 27;
        const LONG_MODE = 1 << 29;
    }

    /// Leaf 0x8000_0007 edx: advanced power management.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ExtLeaf7Edx: u32 {
        const INVARIANT_TSC = 1 << 8;
    }
}
