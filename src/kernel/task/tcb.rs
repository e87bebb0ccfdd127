//! Task control block.
//!
//! One TCB per task, allocated from the kernel pool together with the
//! task's private stack. The saved stack pointer MUST stay the first
//! field: the PendSV and SVCall handlers store and reload it through
//! `[TCB + 0]` with no indirection.

use core::ptr::NonNull;

use crate::kernel::types::{
    PendStatus, StackWord, TaskEntry, TaskPrio, TaskState, Tick, TASK_NAME_LEN,
};
use crate::sync::wait_list::WaitList;

/// Task control block
#[repr(C)]
pub struct Tcb {
    /// Saved process stack pointer. Offset 0 is the exception handler contract.
    pub stk_ptr: *mut StackWord,

    /// Base (lowest address) of the task's private stack
    pub stk_base: *mut StackWord,
    /// Stack size in machine words
    pub stk_words: usize,

    /// Entry function and its opaque argument
    pub entry: TaskEntry,
    pub entry_arg: *mut (),

    /// Priority level; higher number wins
    pub prio: TaskPrio,
    /// Scheduling state
    pub state: TaskState,
    /// Verdict of the last blocking wait
    pub pend_status: PendStatus,

    /// Absolute tick at which a delayed task becomes ready
    pub wake_tick: Tick,
    /// Absolute tick at which a blocked task gives up
    pub deadline_tick: Tick,

    /// Accumulated execution cycles (64-bit so long windows don't wrap)
    pub exec_cycles: u64,
    /// Cycle-counter reading when the task was last dispatched
    pub enter_cycle: u32,
    /// Cycle-counter reading when the task was last switched out
    pub exit_cycle: u32,
    /// Free stack words observed at the last context switch
    pub free_stack: u32,

    /// Zero-padded task name
    pub name: [u8; TASK_NAME_LEN],

    /// Relocated vector-table base for module-loaded tasks; 0 = none
    pub vtor: u32,

    /// Pool allocation backing the stack. For module tasks this is the
    /// whole relocated RAM region the stack tail lives in.
    pub stack_alloc: *mut u8,
    /// Pool allocation holding a module task's image copy; null for
    /// function tasks
    pub image_alloc: *mut u8,

    /// Ready-list links
    pub next: Option<NonNull<Tcb>>,
    pub prev: Option<NonNull<Tcb>>,

    /// Wait-list links plus the owning list, null when not waiting.
    /// A task is on at most one wait list at a time.
    pub wait_next: Option<NonNull<Tcb>>,
    pub wait_prev: Option<NonNull<Tcb>>,
    pub wait_list: *mut WaitList,
}

fn entry_unset(_: *mut ()) {}

impl Tcb {
    /// A blank TCB; `task::create` and the module loader fill it in.
    pub(crate) fn blank() -> Self {
        Tcb {
            stk_ptr: core::ptr::null_mut(),
            stk_base: core::ptr::null_mut(),
            stk_words: 0,
            entry: entry_unset,
            entry_arg: core::ptr::null_mut(),
            prio: 0,
            state: TaskState::Ready,
            pend_status: PendStatus::None,
            wake_tick: 0,
            deadline_tick: 0,
            exec_cycles: 0,
            enter_cycle: 0,
            exit_cycle: 0,
            free_stack: 0,
            name: [0; TASK_NAME_LEN],
            vtor: 0,
            stack_alloc: core::ptr::null_mut(),
            image_alloc: core::ptr::null_mut(),
            next: None,
            prev: None,
            wait_next: None,
            wait_prev: None,
            wait_list: core::ptr::null_mut(),
        }
    }

    /// Copy up to `TASK_NAME_LEN - 1` bytes of `name`, zero-terminated.
    pub(crate) fn set_name(&mut self, name: &str) {
        self.name = [0; TASK_NAME_LEN];
        let n = name.len().min(TASK_NAME_LEN - 1);
        self.name[..n].copy_from_slice(&name.as_bytes()[..n]);
    }

    /// Name as a string slice (up to the first NUL)
    pub fn name_str(&self) -> &str {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(TASK_NAME_LEN);
        core::str::from_utf8(&self.name[..end]).unwrap_or("")
    }
}

unsafe impl Send for Tcb {}
unsafe impl Sync for Tcb {}

/// Opaque handle to a task, valid until the task is deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskHandle(pub(crate) NonNull<Tcb>);

impl TaskHandle {
    #[inline]
    pub(crate) fn as_ptr(self) -> *mut Tcb {
        self.0.as_ptr()
    }
}

unsafe impl Send for TaskHandle {}
