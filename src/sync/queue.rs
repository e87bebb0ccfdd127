//! Bounded queue of fixed-size elements.
//!
//! A contiguous ring allocated from the kernel pool. Producers never
//! block: a full queue fails the send outright. Consumers may wait with
//! a deadline; each send wakes the oldest waiter, which re-checks for
//! data since a higher-priority consumer may get there first.

use core::cell::UnsafeCell;

use crate::kernel::critical::{critical_section, CriticalSection};
use crate::kernel::error::{Error, Result};
use crate::kernel::sched;
use crate::kernel::state::current_tcb;
use crate::kernel::time::tick_count;
use crate::kernel::types::{PendStatus, TaskState, Tick};
use crate::mem;
use crate::port;
use crate::sync::wait_list::{self, WaitList};

struct QueueInner {
    storage: *mut u8,
    elem_size: usize,
    capacity: usize,
    front: usize,
    rear: usize,
    count: usize,
    waiters: WaitList,
}

impl QueueInner {
    /// Copy the oldest element out; caller checked `count > 0`
    unsafe fn take(&mut self, buf: &mut [u8]) {
        unsafe {
            core::ptr::copy_nonoverlapping(
                self.storage.add(self.front * self.elem_size),
                buf.as_mut_ptr(),
                self.elem_size,
            );
        }
        self.front = (self.front + 1) % self.capacity;
        self.count -= 1;
    }
}

/// Fixed-capacity queue of fixed-size elements
pub struct Queue {
    inner: UnsafeCell<QueueInner>,
}

unsafe impl Send for Queue {}
unsafe impl Sync for Queue {}

impl Queue {
    /// Allocate a queue of `capacity` elements of `elem_size` bytes
    /// from the kernel pool.
    pub fn new(capacity: usize, elem_size: usize) -> Result<Queue> {
        if capacity == 0 || elem_size == 0 {
            return Err(Error::BadParameter);
        }
        if !mem::pool_ready() {
            return Err(Error::MemoryNotInitialized);
        }

        let storage = mem::alloc((capacity * elem_size) as u32);
        if storage.is_null() {
            return Err(Error::NoMemory);
        }

        Ok(Queue {
            inner: UnsafeCell::new(QueueInner {
                storage,
                elem_size,
                capacity,
                front: 0,
                rear: 0,
                count: 0,
                waiters: WaitList::new(),
            }),
        })
    }

    /// Enqueue one element. `item` must be exactly one element long.
    /// Fails immediately when the queue is full; wakes the oldest
    /// waiting consumer on success.
    pub fn send(&self, item: &[u8]) -> Result<()> {
        critical_section(|_cs| {
            let inner = unsafe { &mut *self.inner.get() };
            if item.len() != inner.elem_size {
                return Err(Error::BadParameter);
            }
            if inner.count == inner.capacity {
                return Err(Error::QueueFull);
            }

            unsafe {
                core::ptr::copy_nonoverlapping(
                    item.as_ptr(),
                    inner.storage.add(inner.rear * inner.elem_size),
                    inner.elem_size,
                );
            }
            inner.rear = (inner.rear + 1) % inner.capacity;
            inner.count += 1;

            sched::wake_one(&mut inner.waiters);
            Ok(())
        })
    }

    /// Dequeue the oldest element into `buf`, waiting up to `ticks`.
    /// `ticks == 0` turns the call into a non-blocking probe that fails
    /// with the timeout code.
    pub fn receive(&self, buf: &mut [u8], ticks: Tick) -> Result<()> {
        let deadline = tick_count().wrapping_add(ticks);
        loop {
            {
                let cs = CriticalSection::enter();
                let inner = unsafe { &mut *self.inner.get() };
                if buf.len() != inner.elem_size {
                    return Err(Error::BadParameter);
                }
                if inner.count > 0 {
                    unsafe { inner.take(buf) };
                    return Ok(());
                }
                if ticks == 0 {
                    return Err(Error::QueueTimeout);
                }
                sched::block_current(&cs, &mut inner.waiters, TaskState::BlockedByQueue, deadline)?;
            }
            port::pend_context_switch();

            let _cs = CriticalSection::enter();
            let cur = current_tcb().ok_or(Error::BadParameter)?;
            if unsafe { cur.as_ref() }.pend_status == PendStatus::TimedOut {
                unsafe { wait_list::unlink_from_owner(cur) };
                return Err(Error::QueueTimeout);
            }
            // signaled: loop back and race for the element
        }
    }

    /// Non-blocking receive distinguishing emptiness from expiry
    pub fn try_receive(&self, buf: &mut [u8]) -> Result<()> {
        critical_section(|_cs| {
            let inner = unsafe { &mut *self.inner.get() };
            if buf.len() != inner.elem_size {
                return Err(Error::BadParameter);
            }
            if inner.count == 0 {
                return Err(Error::QueueEmpty);
            }
            unsafe { inner.take(buf) };
            Ok(())
        })
    }

    /// Elements currently queued
    pub fn len(&self) -> usize {
        critical_section(|_cs| unsafe { &*self.inner.get() }.count)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        mem::free(inner.storage);
    }
}
