//! Runtime kernel configuration.
//!
//! Core clock, tick rate and the priority ceiling are plain process-wide
//! values set before `scheduler::start`. The memory pool hand-off lives
//! here as well since it is part of the same bring-up sequence.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::kernel::error::Result;
use crate::mem;

/// Default core clock for the LPC55S69-class target
pub const DEFAULT_CORE_CLOCK_HZ: u32 = 150_000_000;

/// Default SysTick rate
pub const DEFAULT_TICK_RATE_HZ: u32 = 1_000;

/// Default priority ceiling; user priorities are clamped to ceiling - 1
pub const DEFAULT_MAX_TASK_PRIORITY: u32 = 10;

static CORE_CLOCK_HZ: AtomicU32 = AtomicU32::new(DEFAULT_CORE_CLOCK_HZ);
static TICK_RATE_HZ: AtomicU32 = AtomicU32::new(DEFAULT_TICK_RATE_HZ);
static MAX_TASK_PRIORITY: AtomicU32 = AtomicU32::new(DEFAULT_MAX_TASK_PRIORITY);

/// Set the core clock in Hz. Values of 1 MHz or below are ignored.
pub fn set_core_clock(hz: u32) {
    if hz > 1_000_000 {
        CORE_CLOCK_HZ.store(hz, Ordering::Relaxed);
    }
}

/// Set the tick rate in Hz. Values of 1 MHz or above are ignored.
pub fn set_tick_rate(hz: u32) {
    if hz < 1_000_000 {
        TICK_RATE_HZ.store(hz, Ordering::Relaxed);
    }
}

/// Set the priority ceiling. Needs room for idle (0) and the
/// timer-service task (ceiling - 1), so anything below 2 is ignored.
pub fn set_max_task_priority(prio: u32) {
    if prio >= 2 {
        MAX_TASK_PRIORITY.store(prio, Ordering::Relaxed);
    }
}

#[inline]
pub fn core_clock() -> u32 {
    CORE_CLOCK_HZ.load(Ordering::Relaxed)
}

#[inline]
pub fn tick_rate() -> u32 {
    TICK_RATE_HZ.load(Ordering::Relaxed)
}

#[inline]
pub fn max_task_priority() -> u32 {
    MAX_TASK_PRIORITY.load(Ordering::Relaxed)
}

/// Hand the kernel its memory pool. Required before any task creation.
pub fn init_mem(pool: *mut u8, size: u32) -> Result<()> {
    mem::init_mem(pool, size)
}

/// Bytes currently free in the pool
pub fn free_memory() -> u32 {
    mem::free_memory()
}

/// Bytes currently handed out from the pool
pub fn allocated_memory() -> u32 {
    mem::allocated_memory()
}
