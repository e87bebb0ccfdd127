//! Scheduler core.
//!
//! Strict fixed-priority preemption over one intrusive list of every
//! task. Selection scans the list cyclically starting after the current
//! task and keeps the highest-priority READY candidate; the first
//! encountered wins a tie, which rotates equal-priority tasks. SysTick
//! promotes expired delays and deadlines and requests a switch only when
//! someone now outranks the runner. The switch itself happens in PendSV.

mod list;

pub use list::TaskList;

use core::ptr::NonNull;

use crate::kernel::critical::{critical_section, CriticalSection};
use crate::kernel::error::{Error, Result};
use crate::kernel::state::{current_tcb, set_current_tcb, SchedState, KERNEL, SCHED};
use crate::kernel::task::Tcb;
use crate::kernel::types::{tick_reached, PendStatus, TaskPrio, TaskState, Tick};
use crate::kernel::{config, task, timer};
use crate::mem;
use crate::port;
use crate::sync::wait_list::WaitList;

/// Stack depth for the kernel-owned tasks, in words
const TIMER_SVC_STACK_WORDS: usize = 400;
const IDLE_STACK_WORDS: usize = 128;

/// Elect the next task to run.
///
/// Walks the whole list once, beginning after `cur` so that equal
/// priorities take turns. Falls back to `idle` when no user task is
/// READY; returns `None` only when there is nothing to run at all.
pub(crate) fn select_next(
    list: &TaskList,
    cur: Option<NonNull<Tcb>>,
    idle: Option<NonNull<Tcb>>,
) -> Option<NonNull<Tcb>> {
    let start = match cur {
        Some(c) => unsafe { list.next_cyclic(c) },
        None => list.head(),
    };
    let Some(start) = start else {
        return idle;
    };

    let mut best: Option<(NonNull<Tcb>, TaskPrio)> = None;
    let mut node = start;
    loop {
        let tcb = unsafe { node.as_ref() };
        if tcb.state == TaskState::Ready && Some(node) != idle {
            match best {
                Some((_, prio)) if prio >= tcb.prio => {}
                _ => best = Some((node, tcb.prio)),
            }
        }
        node = unsafe { list.next_cyclic(node) }.unwrap_or(start);
        if node == start {
            break;
        }
    }

    best.map(|(node, _)| node).or(idle)
}

/// Highest READY user priority, if any task is runnable
fn best_ready_prio(sched: &mut SchedState) -> Option<TaskPrio> {
    let idle = sched.idle;
    let mut best: Option<TaskPrio> = None;
    sched.ready.for_each(|tcb| {
        if tcb.state == TaskState::Ready && !core::ptr::eq(tcb, idle) {
            if best.map_or(true, |b| tcb.prio > b) {
                best = Some(tcb.prio);
            }
        }
    });
    best
}

/// Scheduler half of the PendSV handler. Runs with the syscall mask
/// raised; the asm wrapper has already parked the outgoing context.
#[no_mangle]
pub(crate) unsafe extern "C" fn switch_context() {
    let sched = unsafe { SCHED.get_unchecked() };
    let now = port::cycle_count();

    if let Some(cur) = current_tcb() {
        let cur = unsafe { &mut *cur.as_ptr() };
        cur.exit_cycle = now;
        cur.exec_cycles += now.wrapping_sub(cur.enter_cycle) as u64;
        cur.free_stack = unsafe { port::free_stack_words(cur.stk_base, cur.stk_words) };
        if cur.state == TaskState::Running {
            cur.state = TaskState::Ready;
        }
    }

    if let Some(next) = select_next(&sched.ready, current_tcb(), NonNull::new(sched.idle)) {
        let tcb = unsafe { &mut *next.as_ptr() };
        tcb.state = TaskState::Running;
        tcb.enter_cycle = port::cycle_count();
        if tcb.vtor != 0 {
            unsafe { port::write_vtor(tcb.vtor) };
        }
        unsafe { set_current_tcb(next.as_ptr()) };
    }
}

/// SysTick half of the tick: advance time, wake what is due, and preempt
/// when someone now outranks the runner. The port's SysTick handler is
/// the only expected caller.
pub fn tick_handler() {
    if !KERNEL.is_running() {
        return;
    }

    let _cs = CriticalSection::enter();
    let now = KERNEL.tick_increment();
    let sched = unsafe { SCHED.get_unchecked() };
    let idle = sched.idle;

    sched.ready.for_each(|tcb| match tcb.state {
        TaskState::Delayed if tick_reached(now, tcb.wake_tick) => {
            tcb.state = TaskState::Ready;
            tcb.pend_status = PendStatus::None;
        }
        state if state.is_blocked() && tick_reached(now, tcb.deadline_tick) => {
            // The waiter unlinks itself from the wait list when it runs
            tcb.state = TaskState::Ready;
            tcb.pend_status = PendStatus::TimedOut;
        }
        _ => {}
    });

    let preempt = match (best_ready_prio(sched), current_tcb()) {
        (Some(best), Some(cur)) => {
            let cur = unsafe { cur.as_ref() };
            best > cur.prio
                || cur.state != TaskState::Running
                || core::ptr::eq(cur as *const Tcb, idle)
        }
        (Some(_), None) => true,
        (None, _) => false,
    };
    if preempt {
        port::pend_context_switch();
    }
}

/// Give way if a higher-priority task is READY.
pub fn yield_now() {
    if !KERNEL.is_running() {
        return;
    }

    critical_section(|cs| {
        let sched = SCHED.get(cs);
        if let (Some(best), Some(cur)) = (best_ready_prio(sched), current_tcb()) {
            if best > unsafe { cur.as_ref() }.prio {
                port::pend_context_switch();
            }
        }
    });
}

/// Request a switch when a freshly-readied task outranks the runner.
/// Must be called under the syscall mask.
pub(crate) fn preempt_if_higher(prio: TaskPrio) {
    if !KERNEL.is_running() {
        return;
    }

    let pend = match current_tcb() {
        Some(cur) => {
            let sched = unsafe { SCHED.get_unchecked() };
            let cur_ref = unsafe { cur.as_ref() };
            prio > cur_ref.prio
                || cur_ref.state != TaskState::Running
                || core::ptr::eq(cur.as_ptr(), sched.idle)
        }
        None => true,
    };
    if pend {
        port::pend_context_switch();
    }
}

/// Park the current task on a primitive's wait list with an absolute
/// deadline. Must be called under the syscall mask; the switch fires
/// once the caller drops it.
pub(crate) fn block_current(
    _cs: &CriticalSection,
    waiters: &mut WaitList,
    state: TaskState,
    deadline: Tick,
) -> Result<()> {
    let cur = current_tcb().ok_or(Error::BadParameter)?;
    unsafe {
        let tcb = &mut *cur.as_ptr();
        tcb.pend_status = PendStatus::Waiting;
        tcb.deadline_tick = deadline;
        tcb.state = state;
        waiters.push_back(cur);
    }
    Ok(())
}

/// Wake the oldest waiter, if any, and preempt when it outranks the
/// runner. Must be called under the syscall mask.
pub(crate) fn wake_one(waiters: &mut WaitList) {
    if let Some(waiter) = waiters.pop_front() {
        let tcb = unsafe { &mut *waiter.as_ptr() };
        tcb.pend_status = PendStatus::Signaled;
        tcb.state = TaskState::Ready;
        preempt_if_higher(tcb.prio);
    }
}

/// Idle task: watch for anything runnable and hand the core over.
fn idle_task(_arg: *mut ()) {
    loop {
        let runnable = critical_section(|cs| best_ready_prio(SCHED.get(cs)).is_some());
        if runnable {
            port::pend_context_switch();
        }
        core::hint::spin_loop();
    }
}

/// Start multitasking. Creates the timer-service and idle tasks, elects
/// the first task, programs SysTick and traps into the first dispatch.
/// Does not return under normal operation.
pub fn start() -> Result<()> {
    if KERNEL.is_running() {
        return Err(Error::BadParameter);
    }
    if !mem::pool_ready() {
        return Err(Error::MemoryNotInitialized);
    }

    port::set_exception_priorities();

    // Masked until the first task's frame restores BASEPRI to zero
    let _mask = port::raise_syscall_mask();
    port::systick_stop();

    let timer_svc = task::create(
        timer::timer_service_task,
        "TmrSvc",
        TIMER_SVC_STACK_WORDS,
        core::ptr::null_mut(),
        config::max_task_priority() - 1,
    )?;
    let idle = task::create(idle_task, "Idle", IDLE_STACK_WORDS, core::ptr::null_mut(), 0)?;

    let first = {
        let sched = unsafe { SCHED.get_unchecked() };
        sched.timer_svc = timer_svc.as_ptr();
        sched.idle = idle.as_ptr();
        select_next(&sched.ready, None, NonNull::new(sched.idle)).ok_or(Error::BadParameter)?
    };

    port::enable_cycle_counter();
    unsafe {
        let tcb = &mut *first.as_ptr();
        tcb.state = TaskState::Running;
        tcb.enter_cycle = port::cycle_count();
        set_current_tcb(first.as_ptr());
    }

    crate::kinfo!("scheduler start: {} tasks", unsafe {
        SCHED.get_unchecked().ready.len()
    });

    KERNEL.set_running(true);
    port::systick_init(config::core_clock() / config::tick_rate());
    port::start_first_task()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::task::Tcb;

    fn ready_tcb(prio: TaskPrio) -> Tcb {
        let mut tcb = Tcb::blank();
        tcb.prio = prio;
        tcb.state = TaskState::Ready;
        tcb
    }

    #[test]
    fn picks_highest_priority_ready_task() {
        let mut list = TaskList::new();
        let mut low = ready_tcb(2);
        let mut high = ready_tcb(5);
        let mut mid = ready_tcb(3);

        unsafe {
            list.insert_tail(NonNull::from(&mut low));
            list.insert_tail(NonNull::from(&mut high));
            list.insert_tail(NonNull::from(&mut mid));
        }

        let picked = select_next(&list, None, None).unwrap();
        assert_eq!(picked, NonNull::from(&mut high));
    }

    #[test]
    fn skips_blocked_and_paused_tasks() {
        let mut list = TaskList::new();
        let mut blocked = ready_tcb(9);
        blocked.state = TaskState::BlockedBySemaphore;
        let mut paused = ready_tcb(8);
        paused.state = TaskState::Paused;
        let mut delayed = ready_tcb(7);
        delayed.state = TaskState::Delayed;
        let mut runnable = ready_tcb(1);

        unsafe {
            list.insert_tail(NonNull::from(&mut blocked));
            list.insert_tail(NonNull::from(&mut paused));
            list.insert_tail(NonNull::from(&mut delayed));
            list.insert_tail(NonNull::from(&mut runnable));
        }

        let picked = select_next(&list, None, None).unwrap();
        assert_eq!(picked, NonNull::from(&mut runnable));
    }

    #[test]
    fn equal_priorities_rotate_by_list_order() {
        let mut list = TaskList::new();
        let mut a = ready_tcb(4);
        let mut b = ready_tcb(4);
        let mut c = ready_tcb(4);

        let pa = NonNull::from(&mut a);
        let pb = NonNull::from(&mut b);
        let pc = NonNull::from(&mut c);
        unsafe {
            list.insert_tail(pa);
            list.insert_tail(pb);
            list.insert_tail(pc);
        }

        // scanning begins after the current task, so peers take turns
        assert_eq!(select_next(&list, Some(pa), None), Some(pb));
        assert_eq!(select_next(&list, Some(pb), None), Some(pc));
        assert_eq!(select_next(&list, Some(pc), None), Some(pa));
    }

    #[test]
    fn higher_priority_wins_regardless_of_start_point() {
        let mut list = TaskList::new();
        let mut a = ready_tcb(4);
        let mut b = ready_tcb(6);
        let mut c = ready_tcb(4);

        let pa = NonNull::from(&mut a);
        let pb = NonNull::from(&mut b);
        let pc = NonNull::from(&mut c);
        unsafe {
            list.insert_tail(pa);
            list.insert_tail(pb);
            list.insert_tail(pc);
        }

        assert_eq!(select_next(&list, Some(pb), None), Some(pb));
        assert_eq!(select_next(&list, Some(pc), None), Some(pb));
    }

    #[test]
    fn idle_when_nothing_ready() {
        let mut list = TaskList::new();
        let mut blocked = ready_tcb(5);
        blocked.state = TaskState::BlockedByQueue;
        let mut idle = ready_tcb(0);

        let pb = NonNull::from(&mut blocked);
        let pi = NonNull::from(&mut idle);
        unsafe {
            list.insert_tail(pb);
            list.insert_tail(pi);
        }

        assert_eq!(select_next(&list, None, Some(pi)), Some(pi));
        // empty list also falls back to idle
        let empty = TaskList::new();
        assert_eq!(select_next(&empty, None, Some(pi)), Some(pi));
        assert_eq!(select_next(&empty, None, None), None);
    }

    #[test]
    fn idle_is_never_elected_over_a_user_task() {
        let mut list = TaskList::new();
        let mut idle = ready_tcb(0);
        let mut user = ready_tcb(0);

        let pi = NonNull::from(&mut idle);
        let pu = NonNull::from(&mut user);
        unsafe {
            list.insert_tail(pi);
            list.insert_tail(pu);
        }

        assert_eq!(select_next(&list, None, Some(pi)), Some(pu));
    }
}
