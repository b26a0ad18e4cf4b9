// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tracking of the guest-physical ranges mapped into the hypervisor.

use std::sync::{Arc, RwLock};

use bitvec::vec::BitVec;
use hvf_api::{Hypervisor, Prot};
use slog::Logger;

use crate::common::{
    ranges_overlap, GuestAddr, PAGE_OFFSET, PAGE_SHIFT, PAGE_SIZE,
};
use crate::error::{Fatal, HvResultExt};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RegionChange {
    Add,
    Remove,
}

/// A change to the guest-physical address space, as reported by the memory
/// topology owner.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RegionEvent {
    pub start: u64,
    pub size: u64,
    /// Host address of the memory backing the region.
    pub backing: usize,
    pub change: RegionChange,
}

impl RegionEvent {
    /// A region of host memory at `backing` appears at `start`.
    ///
    /// # Safety
    ///
    /// `backing` must be valid for reads and writes of `size` bytes until a
    /// subsequent removal covering the region has been applied.
    pub unsafe fn add(start: u64, size: u64, backing: *mut u8) -> Self {
        Self {
            start,
            size,
            backing: backing as usize,
            change: RegionChange::Add,
        }
    }

    pub fn remove(start: u64, size: u64) -> Self {
        Self { start, size, backing: 0, change: RegionChange::Remove }
    }
}

/// One entry of the slot table.  A size of zero marks a free slot.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Slot {
    pub id: usize,
    pub start: u64,
    pub size: u64,
    pub backing: usize,
}

impl Slot {
    pub fn is_active(&self) -> bool {
        self.size != 0
    }

    pub fn contains(&self, gpa: u64) -> bool {
        self.is_active()
            && gpa >= self.start
            && gpa - self.start < self.size
    }

    fn matches(&self, ev: &RegionEvent) -> bool {
        self.start == ev.start
            && self.size == ev.size
            && self.backing == ev.backing
    }
}

struct SlotEntry {
    slot: Slot,
    /// Pages written since the last harvest, when write tracking is enabled.
    tracking: Option<BitVec>,
}

/// Keeps the hypervisor's guest-physical mappings consistent with the
/// emulator's region model.
///
/// All mapping changes happen with the table's write lock held, so lookups
/// (which take the read lock) never observe a partially applied change.
pub struct SlotManager {
    hv: Arc<dyn Hypervisor>,
    table: RwLock<Vec<SlotEntry>>,
    log: Logger,
}

impl SlotManager {
    pub fn new(hv: Arc<dyn Hypervisor>, capacity: usize, log: Logger) -> Self {
        let table = (0..capacity)
            .map(|id| SlotEntry {
                slot: Slot { id, ..Default::default() },
                tracking: None,
            })
            .collect();
        Self {
            hv,
            table: RwLock::new(table),
            log: log.new(slog::o!("component" => "slots")),
        }
    }

    pub fn capacity(&self) -> usize {
        self.table.read().unwrap().len()
    }

    /// Reconcile the slot table (and hypervisor mappings) with `ev`.
    pub fn apply_region_change(&self, ev: &RegionEvent) -> Result<(), Fatal> {
        if ev.size == 0 {
            return Ok(());
        }
        let mut table = self.table.write().unwrap();

        if ev.change == RegionChange::Add
            && table.iter().any(|e| e.slot.is_active() && e.slot.matches(ev))
        {
            return Ok(());
        }

        for entry in table.iter_mut() {
            let s = entry.slot;
            if ranges_overlap(s.start, s.size, ev.start, ev.size) {
                self.teardown(entry)?;
            }
        }

        if ev.change == RegionChange::Remove {
            return Ok(());
        }

        let entry = table
            .iter_mut()
            .find(|e| !e.slot.is_active())
            .ok_or(Fatal::NoFreeSlots { start: ev.start, size: ev.size })?;
        entry.slot.start = ev.start;
        entry.slot.size = ev.size;
        entry.slot.backing = ev.backing;
        entry.tracking = None;

        slog::debug!(self.log, "installing slot";
            "slot" => entry.slot.id,
            "start" => format_args!("{:#x}", ev.start),
            "size" => format_args!("{:#x}", ev.size),
        );
        // Safety: the creator of an add event vouched for the backing memory
        // outliving the mapping.
        unsafe {
            self.hv.map(
                ev.backing as *mut u8,
                ev.start,
                ev.size as usize,
                Prot::ALL,
            )
        }
        .during("hv_vm_map")
    }

    fn teardown(&self, entry: &mut SlotEntry) -> Result<(), Fatal> {
        let slot = entry.slot;
        slog::debug!(self.log, "tearing down slot";
            "slot" => slot.id,
            "start" => format_args!("{:#x}", slot.start),
            "size" => format_args!("{:#x}", slot.size),
        );
        self.hv.unmap(slot.start, slot.size as usize).during("hv_vm_unmap")?;
        entry.slot.size = 0;
        entry.tracking = None;
        Ok(())
    }

    /// The first active slot intersecting `[start, start + size)`.
    pub fn find_overlap(&self, start: u64, size: u64) -> Option<Slot> {
        let table = self.table.read().unwrap();
        table
            .iter()
            .map(|e| e.slot)
            .find(|s| ranges_overlap(s.start, s.size, start, size))
    }

    /// The active slot containing `gpa`.
    pub fn slot_at(&self, gpa: u64) -> Option<Slot> {
        self.find_overlap(gpa, 1)
    }

    /// All active slots, in slot-id order.
    pub fn active(&self) -> Vec<Slot> {
        let table = self.table.read().unwrap();
        table.iter().map(|e| e.slot).filter(Slot::is_active).collect()
    }

    /// Enable or disable dirty-page tracking on slot `id`.
    ///
    /// While tracking, the slot is mapped without write permission and
    /// the first write to each page is recorded by
    /// [`SlotManager::handle_protection_fault`].  Returns false if the slot
    /// is not active.
    pub fn set_write_tracking(
        &self,
        id: usize,
        enable: bool,
    ) -> Result<bool, Fatal> {
        let mut table = self.table.write().unwrap();
        let Some(entry) = table.get_mut(id).filter(|e| e.slot.is_active())
        else {
            return Ok(false);
        };
        let slot = entry.slot;
        if enable {
            let pages =
                ((slot.size + PAGE_OFFSET as u64) >> PAGE_SHIFT) as usize;
            entry.tracking = Some(BitVec::repeat(false, pages));
            self.hv
                .protect(slot.start, slot.size as usize, Prot::RX)
                .during("hv_vm_protect")?;
        } else {
            entry.tracking = None;
            self.hv
                .protect(slot.start, slot.size as usize, Prot::ALL)
                .during("hv_vm_protect")?;
        }
        Ok(true)
    }

    /// Resolve an EPT violation on mapped memory.
    ///
    /// Returns true if the fault was a first write to a tracked page, which
    /// is now recorded as dirty and writable again.
    pub fn handle_protection_fault(
        &self,
        gpa: u64,
        write: bool,
    ) -> Result<bool, Fatal> {
        if !write {
            return Ok(false);
        }
        let mut table = self.table.write().unwrap();
        let Some(entry) = table.iter_mut().find(|e| e.slot.contains(gpa))
        else {
            return Ok(false);
        };
        let slot = entry.slot;
        let Some(dirty) = entry.tracking.as_mut() else {
            return Ok(false);
        };

        let page = ((gpa - slot.start) >> PAGE_SHIFT) as usize;
        dirty.set(page, true);
        let GuestAddr(page_gpa) = GuestAddr(gpa).page();
        self.hv
            .protect(page_gpa, PAGE_SIZE, Prot::ALL)
            .during("hv_vm_protect")?;
        Ok(true)
    }

    /// Collect (and clear) the pages of slot `id` written since the last
    /// call, write-protecting them again.
    pub fn take_dirty_pages(&self, id: usize) -> Result<Vec<u64>, Fatal> {
        let mut table = self.table.write().unwrap();
        let Some(entry) = table.get_mut(id) else {
            return Ok(Vec::new());
        };
        let start = entry.slot.start;
        let Some(dirty) = entry.tracking.as_mut() else {
            return Ok(Vec::new());
        };

        let pages: Vec<u64> = dirty
            .iter_ones()
            .map(|p| start + ((p as u64) << PAGE_SHIFT))
            .collect();
        dirty.fill(false);
        for gpa in pages.iter() {
            self.hv
                .protect(*gpa, PAGE_SIZE, Prot::RX)
                .during("hv_vm_protect")?;
        }
        Ok(pages)
    }

    /// Copy guest memory at `gpa` into `buf`.
    ///
    /// Returns false if the range is not entirely backed by one slot.
    pub fn read_phys(&self, gpa: u64, buf: &mut [u8]) -> bool {
        let table = self.table.read().unwrap();
        let Some(host) = Self::host_range(&table, gpa, buf.len()) else {
            return false;
        };
        // Safety: the range lies within a mapped slot, whose backing the
        // region owner keeps valid while the slot is active.  The read lock
        // prevents the slot from being torn down during the copy.
        unsafe {
            std::ptr::copy_nonoverlapping(
                host as *const u8,
                buf.as_mut_ptr(),
                buf.len(),
            );
        }
        true
    }

    /// Copy `buf` into guest memory at `gpa`.
    ///
    /// Returns false if the range is not entirely backed by one slot.
    pub fn write_phys(&self, gpa: u64, buf: &[u8]) -> bool {
        let table = self.table.read().unwrap();
        let Some(host) = Self::host_range(&table, gpa, buf.len()) else {
            return false;
        };
        // Safety: as in read_phys.
        unsafe {
            std::ptr::copy_nonoverlapping(
                buf.as_ptr(),
                host as *mut u8,
                buf.len(),
            );
        }
        true
    }

    fn host_range(table: &[SlotEntry], gpa: u64, len: usize) -> Option<usize> {
        let slot = table.iter().map(|e| e.slot).find(|s| s.contains(gpa))?;
        let off = gpa - slot.start;
        if off.checked_add(len as u64)? > slot.size {
            return None;
        }
        Some(slot.backing + off as usize)
    }
}
