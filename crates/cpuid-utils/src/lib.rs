// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Utility functions and types for working with CPUID values.

use std::collections::BTreeMap;

pub mod bits;
#[cfg(target_arch = "x86_64")]
pub mod host;

/// A CPUID leaf, optionally qualified by a subleaf (the ecx input).
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CpuidIdent {
    pub leaf: u32,
    pub subleaf: Option<u32>,
}

impl CpuidIdent {
    pub const fn leaf(leaf: u32) -> Self {
        Self { leaf, subleaf: None }
    }

    pub const fn subleaf(leaf: u32, subleaf: u32) -> Self {
        Self { leaf, subleaf: Some(subleaf) }
    }
}

/// Register values produced by one execution of CPUID.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CpuidValues {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
}

impl From<[u32; 4]> for CpuidValues {
    fn from(regs: [u32; 4]) -> Self {
        Self { eax: regs[0], ebx: regs[1], ecx: regs[2], edx: regs[3] }
    }
}

impl From<CpuidValues> for [u32; 4] {
    fn from(v: CpuidValues) -> Self {
        [v.eax, v.ebx, v.ecx, v.edx]
    }
}

#[cfg(target_arch = "x86_64")]
impl From<core::arch::x86_64::CpuidResult> for CpuidValues {
    fn from(r: core::arch::x86_64::CpuidResult) -> Self {
        Self { eax: r.eax, ebx: r.ebx, ecx: r.ecx, edx: r.edx }
    }
}

/// The 12-byte vendor identification string split into the (ebx, edx, ecx)
/// register triplet leaf 0 reports it in.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct VendorRegs {
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
}

impl VendorRegs {
    pub const fn from_bytes(vendor: &[u8; 12]) -> Self {
        Self {
            ebx: u32::from_le_bytes([vendor[0], vendor[1], vendor[2], vendor[3]]),
            edx: u32::from_le_bytes([vendor[4], vendor[5], vendor[6], vendor[7]]),
            ecx: u32::from_le_bytes([
                vendor[8], vendor[9], vendor[10], vendor[11],
            ]),
        }
    }

    pub fn to_bytes(self) -> [u8; 12] {
        let mut out = [0u8; 12];
        out[0..4].copy_from_slice(&self.ebx.to_le_bytes());
        out[4..8].copy_from_slice(&self.edx.to_le_bytes());
        out[8..12].copy_from_slice(&self.ecx.to_le_bytes());
        out
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CpuidVendor {
    Amd,
    Intel,
}

impl CpuidVendor {
    pub const fn regs(&self) -> VendorRegs {
        match self {
            CpuidVendor::Amd => VendorRegs::from_bytes(b"AuthenticAMD"),
            CpuidVendor::Intel => VendorRegs::from_bytes(b"GenuineIntel"),
        }
    }
}

/// Something which answers CPUID queries: the host processor, or a fixed
/// table of recorded values.
pub trait CpuidSource {
    fn query(&self, ident: CpuidIdent) -> CpuidValues;
}

/// A map from CPUID leaves to CPUID values.
///
/// Lookups first try the exact (leaf, subleaf) pair and then the leaf with no
/// subleaf; anything else reads as all zeroes.
#[derive(Clone, Debug, Default)]
pub struct CpuidMap(pub BTreeMap<CpuidIdent, CpuidValues>);

impl CpuidMap {
    pub fn insert(&mut self, ident: CpuidIdent, values: CpuidValues) {
        self.0.insert(ident, values);
    }
}

impl CpuidSource for CpuidMap {
    fn query(&self, ident: CpuidIdent) -> CpuidValues {
        self.0
            .get(&ident)
            .or_else(|| self.0.get(&CpuidIdent::leaf(ident.leaf)))
            .copied()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_register_order() {
        let intel = CpuidVendor::Intel.regs();
        assert_eq!(intel.ebx, 0x756e_6547);
        assert_eq!(intel.edx, 0x4965_6e69);
        assert_eq!(intel.ecx, 0x6c65_746e);
        assert_eq!(&intel.to_bytes(), b"GenuineIntel");
    }

    #[test]
    fn map_falls_back_to_leaf() {
        let mut map = CpuidMap::default();
        map.insert(CpuidIdent::leaf(4), [1, 2, 3, 4].into());
        map.insert(CpuidIdent::subleaf(7, 1), [5, 6, 7, 8].into());

        assert_eq!(map.query(CpuidIdent::subleaf(4, 3)).ebx, 2);
        assert_eq!(map.query(CpuidIdent::subleaf(7, 1)).eax, 5);
        assert_eq!(map.query(CpuidIdent::subleaf(7, 0)), CpuidValues::default());
    }
}
