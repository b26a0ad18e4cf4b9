// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Machine-wide state shared by every vCPU thread.

pub mod machine;
pub mod slots;

pub use machine::Machine;
pub use slots::{RegionChange, RegionEvent, Slot, SlotManager};
