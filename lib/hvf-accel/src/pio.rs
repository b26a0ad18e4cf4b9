// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The guest's port I/O address space, as provided by the device model.

/// Port I/O dispatch into device models.
///
/// Accesses are 1, 2 or 4 bytes wide; values are carried in the low bytes of
/// the `u32`.  Ports nobody claims read as all ones.
pub trait PortIo {
    fn pio_in(&self, port: u16, bytes: u8) -> u32;
    fn pio_out(&self, port: u16, bytes: u8, val: u32);
}

/// Mask selecting the low `bytes` bytes of an I/O value.
pub fn io_mask(bytes: u8) -> Option<u64> {
    match bytes {
        1 => Some(0xff),
        2 => Some(0xffff),
        4 => Some(0xffff_ffff),
        _ => None,
    }
}
