//! Software timers.
//!
//! Registered timers live on one intrusive list that the timer-service
//! task scans once per system tick. An active timer accumulates elapsed
//! ticks; on reaching its timeout the callback runs in the service
//! task's context, then the timer reloads or deactivates. Callbacks run
//! with the syscall mask raised and must not block.

use core::cell::UnsafeCell;

use crate::kernel::critical::critical_section;
use crate::kernel::cs_cell::CsCell;
use crate::kernel::error::{Error, Result};
use crate::kernel::time;
use crate::kernel::types::{Tick, TimerCallback};

struct TimerInner {
    timeout_ticks: Tick,
    elapsed_ticks: Tick,
    is_active: bool,
    callback: TimerCallback,
    callback_arg: *mut (),
    auto_reload: bool,
    registered: bool,
    next: *const SoftwareTimer,
}

fn callback_unset(_: *mut ()) {}

/// A software timer. Declare as a static and register it with
/// [`init`]; all state lives behind the kernel critical section.
pub struct SoftwareTimer {
    inner: UnsafeCell<TimerInner>,
}

unsafe impl Send for SoftwareTimer {}
unsafe impl Sync for SoftwareTimer {}

impl SoftwareTimer {
    pub const fn new() -> Self {
        SoftwareTimer {
            inner: UnsafeCell::new(TimerInner {
                timeout_ticks: 0,
                elapsed_ticks: 0,
                is_active: false,
                callback: callback_unset,
                callback_arg: core::ptr::null_mut(),
                auto_reload: false,
                registered: false,
                next: core::ptr::null(),
            }),
        }
    }

    /// Elapsed ticks since the last start or reload
    pub fn elapsed(&self) -> Tick {
        critical_section(|_cs| unsafe { (*self.inner.get()).elapsed_ticks })
    }

    /// Whether the timer is counting
    pub fn is_active(&self) -> bool {
        critical_section(|_cs| unsafe { (*self.inner.get()).is_active })
    }
}

impl Default for SoftwareTimer {
    fn default() -> Self {
        Self::new()
    }
}

struct TimerList {
    head: *const SoftwareTimer,
}

unsafe impl Send for TimerList {}

static TIMERS: CsCell<TimerList> = CsCell::new(TimerList {
    head: core::ptr::null(),
});

/// Register a timer, inactive, with its callback and reload policy.
/// Re-initializing a registered timer updates it in place.
pub fn init(
    timer: &'static SoftwareTimer,
    timeout_ticks: Tick,
    callback: TimerCallback,
    callback_arg: *mut (),
    auto_reload: bool,
) -> Result<()> {
    if timeout_ticks == 0 {
        return Err(Error::BadParameter);
    }

    critical_section(|cs| {
        let inner = unsafe { &mut *timer.inner.get() };
        inner.timeout_ticks = timeout_ticks;
        inner.elapsed_ticks = 0;
        inner.is_active = false;
        inner.callback = callback;
        inner.callback_arg = callback_arg;
        inner.auto_reload = auto_reload;

        if !inner.registered {
            let list = TIMERS.get(cs);
            inner.next = list.head;
            inner.registered = true;
            list.head = timer as *const SoftwareTimer;
        }
        Ok(())
    })
}

/// Activate a timer from zero elapsed ticks.
pub fn start(timer: &'static SoftwareTimer) -> Result<()> {
    critical_section(|_cs| {
        let inner = unsafe { &mut *timer.inner.get() };
        if !inner.registered {
            return Err(Error::BadParameter);
        }
        if inner.is_active {
            // keep the running count
            return Err(Error::TimerAlreadyActive);
        }
        inner.elapsed_ticks = 0;
        inner.is_active = true;
        Ok(())
    })
}

/// Deactivate a timer and clear its elapsed count.
pub fn stop(timer: &'static SoftwareTimer) -> Result<()> {
    critical_section(|_cs| {
        let inner = unsafe { &mut *timer.inner.get() };
        if !inner.registered {
            return Err(Error::BadParameter);
        }
        if !inner.is_active {
            return Err(Error::TimerAlreadyStopped);
        }
        inner.is_active = false;
        inner.elapsed_ticks = 0;
        Ok(())
    })
}

/// One scan over the registry: step every active timer and fire those
/// that reached their timeout. The timer-service task calls this once
/// per tick.
pub fn service_pass() {
    critical_section(|cs| {
        let mut cur = TIMERS.get(cs).head;
        while !cur.is_null() {
            let next;
            let fire;
            {
                let inner = unsafe { &mut *(*cur).inner.get() };
                next = inner.next;
                fire = if inner.is_active {
                    inner.elapsed_ticks += 1;
                    if inner.elapsed_ticks >= inner.timeout_ticks {
                        inner.elapsed_ticks = 0;
                        if !inner.auto_reload {
                            inner.is_active = false;
                        }
                        Some((inner.callback, inner.callback_arg))
                    } else {
                        None
                    }
                } else {
                    None
                };
            }
            // borrow released: the callback may start/stop timers freely
            if let Some((callback, arg)) = fire {
                callback(arg);
            }
            cur = next;
        }
    });
}

/// Body of the kernel's timer-service task: one registry pass per tick.
pub(crate) fn timer_service_task(_arg: *mut ()) {
    loop {
        service_pass();
        let _ = time::delay(1);
    }
}
