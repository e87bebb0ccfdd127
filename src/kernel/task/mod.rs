//! Task management.
//!
//! Tasks are created dynamically: TCB and stack both come from the
//! kernel pool, and the TCB joins the single ready list at the tail.
//! Deletion unlinks and releases both; the stack-pointer contract with
//! the exception handlers is documented on [`Tcb`].

mod tcb;

pub use tcb::{TaskHandle, Tcb};

use core::ptr::NonNull;

use crate::kernel::config;
use crate::kernel::critical::{critical_section, CriticalSection};
use crate::kernel::cs_cell::CsCell;
use crate::kernel::error::{Error, Result};
use crate::kernel::sched;
use crate::kernel::state::{current_tcb, set_current_tcb, KERNEL, SCHED};
use crate::kernel::types::{StackWord, TaskEntry, TaskPrio, TaskState, Tick, STACK_SENTINEL};
use crate::mem;
use crate::port;
use crate::sync::wait_list;

/// Smallest stack that can hold the seeded context frame with headroom
pub const MIN_STACK_WORDS: usize = 32;

/// Landing pad for tasks whose entry function returns: the task deletes
/// itself and the core moves on.
fn task_exit_guard() {
    delete_self();
}

/// Create a task and append it to the ready list.
///
/// The stack is allocated in words, filled with the watermark sentinel,
/// and seeded with an exception frame so the first dispatch enters
/// `entry(arg)`. `prio` is clamped to the configured ceiling minus one.
/// If the new task outranks the runner it preempts immediately.
pub fn create(
    entry: TaskEntry,
    name: &str,
    stack_words: usize,
    arg: *mut (),
    prio: TaskPrio,
) -> Result<TaskHandle> {
    if stack_words < MIN_STACK_WORDS {
        return Err(Error::BadParameter);
    }
    if !mem::pool_ready() {
        return Err(Error::MemoryNotInitialized);
    }

    let _cs = CriticalSection::enter();

    let tcb_ptr = mem::alloc(core::mem::size_of::<Tcb>() as u32) as *mut Tcb;
    if tcb_ptr.is_null() {
        return Err(Error::NoMemory);
    }

    let stack = mem::alloc((stack_words * core::mem::size_of::<StackWord>()) as u32)
        as *mut StackWord;
    if stack.is_null() {
        mem::free(tcb_ptr as *mut u8);
        return Err(Error::NoMemory);
    }

    for i in 0..stack_words {
        unsafe { stack.add(i).write(STACK_SENTINEL) };
    }

    let mut tcb = Tcb::blank();
    tcb.set_name(name);
    tcb.prio = prio.min(config::max_task_priority() - 1);
    tcb.entry = entry;
    tcb.entry_arg = arg;
    tcb.stk_base = stack;
    tcb.stk_words = stack_words;
    tcb.stk_ptr = unsafe {
        port::init_task_stack(
            entry as usize as u32,
            arg as usize as u32,
            task_exit_guard as usize as u32,
            stack,
            stack_words,
        )
    };
    tcb.free_stack = (stack_words - port::CONTEXT_FRAME_WORDS) as u32;
    tcb.stack_alloc = stack as *mut u8;

    let prio = tcb.prio;
    unsafe {
        tcb_ptr.write(tcb);
        let sched_state = SCHED.get_unchecked();
        sched_state.ready.insert_tail(NonNull::new_unchecked(tcb_ptr));
    }

    crate::kdebug!("task created: prio {}", prio);
    sched::preempt_if_higher(prio);

    Ok(TaskHandle(unsafe { NonNull::new_unchecked(tcb_ptr) }))
}

/// Delete a task by handle: unlink it from the ready list and any wait
/// list, then release its stack and TCB. Deleting the runner hands the
/// core over via PendSV.
pub fn delete(handle: TaskHandle) -> Result<()> {
    let _cs = CriticalSection::enter();
    let sched_state = unsafe { SCHED.get_unchecked() };
    let target = handle.0;

    if !sched_state.ready.contains(target) {
        return Err(Error::TaskNotFound);
    }
    if core::ptr::eq(target.as_ptr(), sched_state.idle)
        || core::ptr::eq(target.as_ptr(), sched_state.timer_svc)
    {
        return Err(Error::BadParameter);
    }

    unsafe {
        sched_state.ready.remove(target);
        wait_list::unlink_from_owner(target);

        let was_current = current_tcb() == Some(target);
        let image = (*target.as_ptr()).image_alloc;
        if !image.is_null() {
            mem::free(image);
        }
        mem::free((*target.as_ptr()).stack_alloc);
        mem::free(target.as_ptr() as *mut u8);

        if was_current {
            // PendSV sees a null current and skips the outgoing save
            set_current_tcb(core::ptr::null_mut());
            port::pend_context_switch();
        }
    }

    Ok(())
}

/// Delete the calling task. Control leaves only through the resulting
/// context switch; the deleted task's code is never resumed.
pub fn delete_self() -> ! {
    if let Some(cur) = current_tcb() {
        let _ = delete(TaskHandle(cur));
    }
    port::pend_context_switch();
    loop {
        core::hint::spin_loop();
    }
}

/// Exclude a task from scheduling until [`resume`]. A paused task is
/// pulled off any wait list; neither signals nor deadlines wake it.
pub fn pause(handle: TaskHandle) -> Result<()> {
    let _cs = CriticalSection::enter();
    let sched_state = unsafe { SCHED.get_unchecked() };
    let target = handle.0;

    if !sched_state.ready.contains(target) {
        return Err(Error::TaskNotFound);
    }
    if core::ptr::eq(target.as_ptr(), sched_state.idle)
        || core::ptr::eq(target.as_ptr(), sched_state.timer_svc)
    {
        return Err(Error::BadParameter);
    }

    unsafe {
        wait_list::unlink_from_owner(target);
        (*target.as_ptr()).state = TaskState::Paused;
    }

    if current_tcb() == Some(target) {
        port::pend_context_switch();
    }
    Ok(())
}

/// Make a paused task READY again.
pub fn resume(handle: TaskHandle) -> Result<()> {
    let _cs = CriticalSection::enter();
    let sched_state = unsafe { SCHED.get_unchecked() };
    let target = handle.0;

    if !sched_state.ready.contains(target) {
        return Err(Error::TaskNotFound);
    }

    let tcb = unsafe { &mut *target.as_ptr() };
    if tcb.state != TaskState::Paused {
        return Err(Error::BadParameter);
    }

    tcb.state = TaskState::Ready;
    sched::preempt_if_higher(tcb.prio);
    Ok(())
}

/// Handle of the calling task
pub fn current() -> Option<TaskHandle> {
    current_tcb().map(TaskHandle)
}

/// Name of the calling task. The reference is valid while the task
/// lives.
pub fn current_name() -> Option<&'static str> {
    current_tcb().map(|tcb| unsafe { (*tcb.as_ptr()).name_str() })
}

/// Untouched stack words of the calling task, by sentinel scan
pub fn free_stack() -> u32 {
    match current_tcb() {
        Some(tcb) => unsafe {
            let tcb = tcb.as_ref();
            port::free_stack_words(tcb.stk_base, tcb.stk_words)
        },
        None => 0,
    }
}

/// Accumulated execution cycles of the calling task
pub fn task_cycles() -> u32 {
    match current_tcb() {
        Some(tcb) => unsafe { tcb.as_ref() }.exec_cycles as u32,
        None => 0,
    }
}

struct LoadWindow {
    last_cycle: u32,
    last_idle_cycles: u64,
}

static LOAD_WINDOW: CsCell<LoadWindow> = CsCell::new(LoadWindow {
    last_cycle: 0,
    last_idle_cycles: 0,
});

/// Core load since the previous call, as an integer percentage and a
/// two-digit mantissa. Derived from the idle task's share of the cycle
/// counter; call it periodically (once a second is the usual cadence).
pub fn core_load() -> (u32, u32) {
    critical_section(|cs| {
        let sched_state = SCHED.get(cs);
        let window = LOAD_WINDOW.get(cs);

        let now = port::cycle_count();
        let idle_cycles = if sched_state.idle.is_null() {
            0
        } else {
            unsafe { (*sched_state.idle).exec_cycles }
        };

        let total = now.wrapping_sub(window.last_cycle) as u64;
        let idle_delta = idle_cycles.saturating_sub(window.last_idle_cycles);
        window.last_cycle = now;
        window.last_idle_cycles = idle_cycles;

        if total == 0 || !KERNEL.is_running() {
            return (0, 0);
        }

        let load_x100 = 10_000u64.saturating_sub(idle_delta.saturating_mul(10_000) / total);
        ((load_x100 / 100) as u32, (load_x100 % 100) as u32)
    })
}

/// Delay the calling task for `ticks` system ticks.
pub fn delay(ticks: Tick) -> Result<()> {
    crate::kernel::time::delay(ticks)
}
