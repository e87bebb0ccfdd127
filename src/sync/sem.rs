//! Binary semaphore.
//!
//! Holds at most one pending signal. A signal either hands off directly
//! to the oldest waiter or, with nobody waiting, latches the counter;
//! signaling an already-latched semaphore reports busy. Waiters are
//! woken in FIFO order.

use core::cell::UnsafeCell;
use core::ptr;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::kernel::critical::{critical_section, CriticalSection};
use crate::kernel::error::{Error, Result};
use crate::kernel::sched;
use crate::kernel::state::current_tcb;
use crate::kernel::task::{TaskHandle, Tcb};
use crate::kernel::time::tick_count;
use crate::kernel::types::{PendStatus, TaskState, Tick};
use crate::port;
use crate::sync::wait_list::{self, WaitList};

struct SemInner {
    waiters: WaitList,
    /// Most recent waiter, for introspection only
    owner: *mut Tcb,
    deadline: Tick,
}

/// Binary semaphore
pub struct Semaphore {
    value: AtomicU32,
    inner: UnsafeCell<SemInner>,
}

unsafe impl Send for Semaphore {}
unsafe impl Sync for Semaphore {}

impl Semaphore {
    /// A semaphore latched when `initial` is non-zero
    pub const fn new(initial: u32) -> Self {
        Semaphore {
            value: AtomicU32::new(if initial > 0 { 1 } else { 0 }),
            inner: UnsafeCell::new(SemInner {
                waiters: WaitList::new(),
                owner: ptr::null_mut(),
                deadline: 0,
            }),
        }
    }

    fn try_take(&self) -> bool {
        let mut value = self.value.load(Ordering::Acquire);
        while value > 0 {
            match self.value.compare_exchange(
                value,
                value - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => value = observed,
            }
        }
        false
    }

    /// Take the semaphore, waiting up to `ticks` system ticks.
    ///
    /// With the counter latched this returns immediately. `ticks == 0`
    /// turns the call into a non-blocking probe.
    pub fn wait(&self, ticks: Tick) -> Result<()> {
        if self.try_take() {
            return Ok(());
        }
        if ticks == 0 {
            return Err(Error::SemaphoreTimeout);
        }

        let deadline = tick_count().wrapping_add(ticks);
        loop {
            {
                let cs = CriticalSection::enter();
                // the signal may have landed before the mask went up
                if self.try_take() {
                    return Ok(());
                }
                let inner = unsafe { &mut *self.inner.get() };
                sched::block_current(
                    &cs,
                    &mut inner.waiters,
                    TaskState::BlockedBySemaphore,
                    deadline,
                )?;
                if let Some(cur) = current_tcb() {
                    inner.owner = cur.as_ptr();
                    inner.deadline = deadline;
                }
            }
            port::pend_context_switch();

            let _cs = CriticalSection::enter();
            let cur = current_tcb().ok_or(Error::BadParameter)?;
            let inner = unsafe { &mut *self.inner.get() };
            let status = unsafe { cur.as_ref() }.pend_status;
            match status {
                PendStatus::TimedOut => {
                    unsafe { wait_list::unlink_from_owner(cur) };
                    if ptr::eq(inner.owner, cur.as_ptr()) {
                        inner.owner = ptr::null_mut();
                    }
                    return Err(Error::SemaphoreTimeout);
                }
                PendStatus::Signaled => {
                    // direct hand-off: the counter was never latched
                    if ptr::eq(inner.owner, cur.as_ptr()) {
                        inner.owner = ptr::null_mut();
                    }
                    return Ok(());
                }
                // woken without a verdict: park again with the same deadline
                _ => {}
            }
        }
    }

    /// Signal the semaphore: wake the oldest waiter, or latch the
    /// counter when nobody waits. Busy when already latched.
    pub fn signal(&self) -> Result<()> {
        critical_section(|_cs| {
            if self.value.load(Ordering::Acquire) > 0 {
                return Err(Error::SemaphoreBusy);
            }
            let inner = unsafe { &mut *self.inner.get() };
            if inner.waiters.is_empty() {
                self.value.store(1, Ordering::Release);
            } else {
                sched::wake_one(&mut inner.waiters);
            }
            Ok(())
        })
    }

    /// Task recorded as the most recent waiter
    pub fn owner(&self) -> Result<TaskHandle> {
        critical_section(|_cs| {
            let inner = unsafe { &*self.inner.get() };
            core::ptr::NonNull::new(inner.owner)
                .map(TaskHandle)
                .ok_or(Error::SemaphoreNoOwner)
        })
    }

    /// Absolute deadline of the most recent waiter
    pub fn timeout(&self) -> Result<Tick> {
        critical_section(|_cs| {
            let inner = unsafe { &*self.inner.get() };
            if inner.owner.is_null() {
                return Err(Error::SemaphoreNoOwner);
            }
            Ok(inner.deadline)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latched_semaphore_is_taken_without_blocking() {
        let sem = Semaphore::new(1);
        assert_eq!(sem.wait(0), Ok(()));
        // second probe finds it drained
        assert_eq!(sem.wait(0), Err(Error::SemaphoreTimeout));
    }

    #[test]
    fn signal_latches_once_then_reports_busy() {
        let sem = Semaphore::new(0);
        assert_eq!(sem.signal(), Ok(()));
        assert_eq!(sem.signal(), Err(Error::SemaphoreBusy));
        assert_eq!(sem.wait(0), Ok(()));
        assert_eq!(sem.signal(), Ok(()));
    }

    #[test]
    fn introspection_without_a_waiter() {
        let sem = Semaphore::new(0);
        assert_eq!(sem.owner().unwrap_err(), Error::SemaphoreNoOwner);
        assert_eq!(sem.timeout().unwrap_err(), Error::SemaphoreNoOwner);
    }
}
