//! Ready list: the kernel's single intrusive doubly-linked list of tasks.
//!
//! Every task lives here from create to delete regardless of state;
//! the scheduler inspects state at selection time rather than moving
//! tasks between queues. Insertion is at the tail, and all mutation
//! happens under the syscall mask.

use core::ptr::NonNull;

use crate::kernel::task::Tcb;

/// Intrusive list of all scheduled tasks
pub struct TaskList {
    head: Option<NonNull<Tcb>>,
    tail: Option<NonNull<Tcb>>,
    len: usize,
}

impl TaskList {
    pub const fn new() -> Self {
        TaskList {
            head: None,
            tail: None,
            len: 0,
        }
    }

    #[inline]
    pub fn head(&self) -> Option<NonNull<Tcb>> {
        self.head
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Insert at the tail.
    ///
    /// # Safety
    /// `tcb` must be valid and not already on the list.
    pub unsafe fn insert_tail(&mut self, tcb: NonNull<Tcb>) {
        let tcb_ref = unsafe { &mut *tcb.as_ptr() };

        tcb_ref.next = None;
        tcb_ref.prev = self.tail;

        match self.tail {
            Some(tail) => unsafe { (*tail.as_ptr()).next = Some(tcb) },
            None => self.head = Some(tcb),
        }

        self.tail = Some(tcb);
        self.len += 1;
    }

    /// Unlink a task.
    ///
    /// # Safety
    /// `tcb` must be valid and a member of this list.
    pub unsafe fn remove(&mut self, tcb: NonNull<Tcb>) {
        let tcb_ref = unsafe { &mut *tcb.as_ptr() };

        match tcb_ref.prev {
            Some(prev) => unsafe { (*prev.as_ptr()).next = tcb_ref.next },
            None => self.head = tcb_ref.next,
        }

        match tcb_ref.next {
            Some(next) => unsafe { (*next.as_ptr()).prev = tcb_ref.prev },
            None => self.tail = tcb_ref.prev,
        }

        tcb_ref.prev = None;
        tcb_ref.next = None;
        self.len = self.len.saturating_sub(1);
    }

    /// Whether `tcb` is currently linked here
    pub fn contains(&self, tcb: NonNull<Tcb>) -> bool {
        let mut cur = self.head;
        while let Some(node) = cur {
            if node == tcb {
                return true;
            }
            cur = unsafe { node.as_ref().next };
        }
        false
    }

    /// Successor of `tcb`, wrapping to the head at the end.
    ///
    /// # Safety
    /// `tcb` must be valid; if it is no longer on the list its links must
    /// be cleared, in which case the head is returned.
    pub unsafe fn next_cyclic(&self, tcb: NonNull<Tcb>) -> Option<NonNull<Tcb>> {
        match unsafe { tcb.as_ref().next } {
            Some(next) => Some(next),
            None => self.head,
        }
    }

    /// Visit every member in list order.
    pub fn for_each(&mut self, mut f: impl FnMut(&mut Tcb)) {
        let mut cur = self.head;
        while let Some(node) = cur {
            let tcb = unsafe { &mut *node.as_ptr() };
            cur = tcb.next;
            f(tcb);
        }
    }
}

impl Default for TaskList {
    fn default() -> Self {
        Self::new()
    }
}

// Mutated only under the syscall mask
unsafe impl Send for TaskList {}
unsafe impl Sync for TaskList {}
