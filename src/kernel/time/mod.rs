//! Kernel time: the tick counter and tick-based delays.

use crate::kernel::critical::CriticalSection;
use crate::kernel::error::{Error, Result};
use crate::kernel::state::{current_tcb, KERNEL};
use crate::kernel::types::{TaskState, Tick};
use crate::port;

/// Current tick count
#[inline]
pub fn tick_count() -> Tick {
    KERNEL.tick_get()
}

/// Delay the calling task for `ticks` system ticks.
///
/// The task leaves the running state until SysTick reaches the wake
/// tick. Zero is rejected; use [`yield_now`] to give way without
/// sleeping.
///
/// [`yield_now`]: crate::kernel::sched::yield_now
pub fn delay(ticks: Tick) -> Result<()> {
    if ticks == 0 {
        return Err(Error::BadParameter);
    }
    if !KERNEL.is_running() {
        return Err(Error::BadParameter);
    }

    {
        let _cs = CriticalSection::enter();
        let cur = current_tcb().ok_or(Error::BadParameter)?;
        let tcb = unsafe { &mut *cur.as_ptr() };
        tcb.wake_tick = KERNEL.tick_get().wrapping_add(ticks);
        tcb.state = TaskState::Delayed;
    }

    port::pend_context_switch();
    Ok(())
}

/// Delay by wall-clock components, converted at the configured tick rate.
pub fn delay_hms(hours: u32, minutes: u32, seconds: u32, milliseconds: u32) -> Result<()> {
    if minutes > 59 || seconds > 59 || milliseconds > 999 {
        return Err(Error::BadParameter);
    }

    let total_ms = hours * 3_600_000 + minutes * 60_000 + seconds * 1_000 + milliseconds;
    let ticks = (total_ms as u64 * crate::kernel::config::tick_rate() as u64 / 1_000) as Tick;
    delay(ticks)
}
