// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

pub const PAGE_SIZE: usize = 0x1000;
pub const PAGE_OFFSET: usize = 0xfff;
pub const PAGE_MASK: usize = usize::MAX - PAGE_OFFSET;
pub const PAGE_SHIFT: usize = 12;

/// An address within a guest VM.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct GuestAddr(pub u64);

impl GuestAddr {
    /// The address of the page containing this address.
    pub fn page(&self) -> Self {
        Self(self.0 & PAGE_MASK as u64)
    }
}

/// Half-open ranges `[s1, s1+n1)` and `[s2, s2+n2)` intersect.
pub fn ranges_overlap(s1: u64, n1: u64, s2: u64, n2: u64) -> bool {
    n1 != 0
        && n2 != 0
        && s1 < s2.saturating_add(n2)
        && s2 < s1.saturating_add(n1)
}
