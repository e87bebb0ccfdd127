//! Host stub port.
//!
//! Lets the kernel's data structures and non-blocking paths build and
//! run on the development machine for unit testing. There is no context
//! switching here: masking degenerates to a nesting level and the cycle
//! counter to a monotonic fake.

use core::sync::atomic::{AtomicU32, Ordering};

use super::MAX_SYSCALL_INTERRUPT_PRIORITY;

static MASK_LEVEL: AtomicU32 = AtomicU32::new(0);
static FAKE_CYCLES: AtomicU32 = AtomicU32::new(0);

pub fn raise_syscall_mask() -> u32 {
    MASK_LEVEL.swap(MAX_SYSCALL_INTERRUPT_PRIORITY, Ordering::Acquire)
}

pub fn restore_syscall_mask(mask: u32) {
    MASK_LEVEL.store(mask, Ordering::Release);
}

pub fn pend_context_switch() {}

pub fn set_exception_priorities() {}

pub fn systick_init(_cnts: u32) {}

pub fn systick_stop() {}

pub fn enable_cycle_counter() {}

pub fn cycle_count() -> u32 {
    FAKE_CYCLES.fetch_add(1_000, Ordering::Relaxed)
}

pub unsafe fn write_vtor(_addr: u32) {}

pub fn start_first_task() -> ! {
    unimplemented!("multitasking requires the Cortex-M target")
}
