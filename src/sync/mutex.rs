//! Spinlock mutex.
//!
//! Raises the interrupt mask to the syscall ceiling, then spins on an
//! atomic flag; unlock clears the flag and restores the prior mask. No
//! owner tracking, no reentrance, no priority inheritance. This guards
//! short kernel-style critical sections. Do not hold it across a
//! blocking call; use a [`Semaphore`] for cross-task hand-off.
//!
//! [`Semaphore`]: crate::sync::sem::Semaphore

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::port;

/// Interrupt-masking spinlock
pub struct Mutex {
    flag: AtomicBool,
    saved_mask: UnsafeCell<u32>,
}

unsafe impl Send for Mutex {}
unsafe impl Sync for Mutex {}

impl Mutex {
    pub const fn new() -> Self {
        Mutex {
            flag: AtomicBool::new(false),
            saved_mask: UnsafeCell::new(0),
        }
    }

    /// Mask to the syscall ceiling and acquire the flag.
    pub fn lock(&self) {
        let mask = port::raise_syscall_mask();
        while self.flag.swap(true, Ordering::Acquire) {
            core::hint::spin_loop();
        }
        unsafe { *self.saved_mask.get() = mask };
    }

    /// Release the flag and restore the mask saved by [`lock`].
    ///
    /// [`lock`]: Mutex::lock
    pub fn unlock(&self) {
        let mask = unsafe { *self.saved_mask.get() };
        self.flag.store(false, Ordering::Release);
        port::restore_syscall_mask(mask);
    }

    /// Whether the flag is currently held
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}
