// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The global execution lock.
//!
//! Device models, interrupt controllers and the exit handling of every vCPU
//! serialize on this lock.  A vCPU thread holds it at all times except while
//! blocked in the hardware run call.

use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
pub struct ExecLock {
    inner: Mutex<()>,
}

impl ExecLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> ExecGuard<'_> {
        ExecGuard { lock: self, guard: Some(self.inner.lock().unwrap()) }
    }
}

/// Proof of holding the [`ExecLock`].
pub struct ExecGuard<'a> {
    lock: &'a ExecLock,
    guard: Option<MutexGuard<'a, ()>>,
}

impl<'a> ExecGuard<'a> {
    /// Run `f` with the lock released.
    ///
    /// The lock is reacquired before returning, whether `f` returns normally
    /// or unwinds.
    pub fn unlocked<R>(&mut self, f: impl FnOnce() -> R) -> R {
        struct Relock<'g, 'a>(&'g mut ExecGuard<'a>);
        impl Drop for Relock<'_, '_> {
            fn drop(&mut self) {
                let lock = self.0.lock;
                self.0.guard = Some(lock.inner.lock().unwrap());
            }
        }

        self.guard = None;
        let _relock = Relock(self);
        f()
    }

    pub fn is_held(&self) -> bool {
        self.guard.is_some()
    }
}
