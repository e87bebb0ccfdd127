//! Circular byte buffer.
//!
//! A byte ring for stream-shaped traffic: sends and receives move
//! arbitrary chunk sizes, splitting a copy in two when it crosses the
//! wrap point. Producers never block; a receive waits until enough
//! bytes have accumulated or its deadline passes.

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

struct CircInner {
    storage: *mut u8,
    capacity: usize,
    head: usize,
    tail: usize,
    current_size: usize,
    waiters: WaitList,
}

impl CircInner {
    /// Copy `data` in at the head; caller checked the space
    unsafe fn put(&mut self, data: &[u8]) {
        let len = data.len();
        unsafe {
            if self.head + len <= self.capacity {
                core::ptr::copy_nonoverlapping(data.as_ptr(), self.storage.add(self.head), len);
            } else {
                let first = self.capacity - self.head;
                core::ptr::copy_nonoverlapping(data.as_ptr(), self.storage.add(self.head), first);
                core::ptr::copy_nonoverlapping(data[first..].as_ptr(), self.storage, len - first);
            }
        }
        self.head = (self.head + len) % self.capacity;
        self.current_size += len;
    }

    /// Copy out at the tail; caller checked availability
    unsafe fn get(&mut self, buf: &mut [u8]) {
        let len = buf.len();
        unsafe {
            if self.tail + len <= self.capacity {
                core::ptr::copy_nonoverlapping(self.storage.add(self.tail), buf.as_mut_ptr(), len);
            } else {
                let first = self.capacity - self.tail;
                core::ptr::copy_nonoverlapping(self.storage.add(self.tail), buf.as_mut_ptr(), first);
                core::ptr::copy_nonoverlapping(self.storage, buf[first..].as_mut_ptr(), len - first);
            }
        }
        self.tail = (self.tail + len) % self.capacity;
        self.current_size -= len;
    }
}

/// Fixed-capacity circular byte buffer
pub struct CircularBuffer {
    inner: UnsafeCell<CircInner>,
}

unsafe impl Send for CircularBuffer {}
unsafe impl Sync for CircularBuffer {}

impl CircularBuffer {
    /// Allocate a ring of `capacity` bytes from the kernel pool.
    pub fn new(capacity: usize) -> Result<CircularBuffer> {
        if capacity == 0 {
            return Err(Error::BadParameter);
        }
        if !mem::pool_ready() {
            return Err(Error::MemoryNotInitialized);
        }

        let storage = mem::alloc(capacity as u32);
        if storage.is_null() {
            return Err(Error::NoMemory);
        }

        Ok(CircularBuffer {
            inner: UnsafeCell::new(CircInner {
                storage,
                capacity,
                head: 0,
                tail: 0,
                current_size: 0,
                waiters: WaitList::new(),
            }),
        })
    }

    /// Append `data` to the stream. Fails outright when the bytes do
    /// not fit; wakes the oldest waiting receiver on success.
    pub fn send(&self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(Error::BadParameter);
        }

        critical_section(|_cs| {
            let inner = unsafe { &mut *self.inner.get() };
            if data.len() > inner.capacity || inner.current_size + data.len() > inner.capacity {
                return Err(Error::CircularBufferFull);
            }

            unsafe { inner.put(data) };
            sched::wake_one(&mut inner.waiters);
            Ok(())
        })
    }

    /// Fill `buf` from the stream, waiting up to `ticks` for enough
    /// bytes. `ticks == 0` probes and fails with the timeout code.
    pub fn receive(&self, buf: &mut [u8], ticks: Tick) -> Result<()> {
        if buf.is_empty() {
            return Err(Error::BadParameter);
        }

        let deadline = tick_count().wrapping_add(ticks);
        loop {
            {
                let cs = CriticalSection::enter();
                let inner = unsafe { &mut *self.inner.get() };
                if buf.len() > inner.capacity {
                    return Err(Error::BadParameter);
                }
                if inner.current_size >= buf.len() {
                    unsafe { inner.get(buf) };
                    return Ok(());
                }
                if ticks == 0 {
                    return Err(Error::CircularBufferTimeout);
                }
                sched::block_current(
                    &cs,
                    &mut inner.waiters,
                    TaskState::BlockedByCircularBuffer,
                    deadline,
                )?;
            }
            port::pend_context_switch();

            let _cs = CriticalSection::enter();
            let cur = current_tcb().ok_or(Error::BadParameter)?;
            if unsafe { cur.as_ref() }.pend_status == PendStatus::TimedOut {
                unsafe { wait_list::unlink_from_owner(cur) };
                return Err(Error::CircularBufferTimeout);
            }
            // signaled: loop back and re-check the fill level
        }
    }

    /// Non-blocking receive distinguishing a short buffer from expiry
    pub fn try_receive(&self, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() {
            return Err(Error::BadParameter);
        }

        critical_section(|_cs| {
            let inner = unsafe { &mut *self.inner.get() };
            if inner.current_size < buf.len() {
                return Err(Error::CircularBufferEmpty);
            }
            unsafe { inner.get(buf) };
            Ok(())
        })
    }

    /// Bytes currently buffered
    pub fn len(&self) -> usize {
        critical_section(|_cs| unsafe { &*self.inner.get() }.current_size)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for CircularBuffer {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        mem::free(inner.storage);
    }
}
