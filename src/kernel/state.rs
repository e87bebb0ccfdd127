//! Process-wide kernel state.
//!
//! One instance of everything: the running flag, the tick counter, the
//! ready list, and the pointer the exception handlers chase to find the
//! current task. Initialized before `scheduler::start`, never torn down.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::kernel::cs_cell::CsCell;
use crate::kernel::sched::TaskList;
use crate::kernel::task::Tcb;
use crate::kernel::types::Tick;

/// Atomic kernel flags
pub struct KernelFlags {
    running: AtomicBool,
    tick_counter: AtomicU32,
}

impl KernelFlags {
    const fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            tick_counter: AtomicU32::new(0),
        }
    }

    /// Whether multitasking has been started
    #[inline(always)]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub(crate) fn set_running(&self, val: bool) {
        self.running.store(val, Ordering::Release);
    }

    /// Current tick count
    #[inline(always)]
    pub fn tick_get(&self) -> Tick {
        self.tick_counter.load(Ordering::Relaxed)
    }

    /// Increment and return the tick count
    #[inline(always)]
    pub(crate) fn tick_increment(&self) -> Tick {
        self.tick_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }
}

/// Global kernel flags
pub static KERNEL: KernelFlags = KernelFlags::new();

/// Scheduler state: the ready list and the kernel-owned task handles
pub struct SchedState {
    /// Single intrusive list of every task, whatever its state
    pub ready: TaskList,
    /// Idle task, selected only when nothing else is ready
    pub idle: *mut Tcb,
    /// Timer-service task
    pub timer_svc: *mut Tcb,
}

impl SchedState {
    const fn new() -> Self {
        Self {
            ready: TaskList::new(),
            idle: core::ptr::null_mut(),
            timer_svc: core::ptr::null_mut(),
        }
    }
}

/// Global scheduler state
pub static SCHED: CsCell<SchedState> = CsCell::new(SchedState::new());

/// Current task. Read by PendSV/SVCall through this exact symbol; the
/// saved stack pointer sits at offset 0 of the pointee.
#[no_mangle]
#[used]
pub static mut CURRENT_TCB: *mut Tcb = core::ptr::null_mut();

/// Current TCB pointer, if a task has been dispatched
#[inline]
pub fn current_tcb() -> Option<NonNull<Tcb>> {
    NonNull::new(unsafe { CURRENT_TCB })
}

/// Install the current TCB pointer.
///
/// # Safety
/// Must run under the syscall mask or before multitasking starts.
#[inline]
pub(crate) unsafe fn set_current_tcb(tcb: *mut Tcb) {
    unsafe { CURRENT_TCB = tcb };
}
