//! Cortex-M33 port.
//!
//! Context switching rides the architectural exceptions: SVCall restores
//! the first task, PendSV performs every later switch, SysTick drives the
//! kernel tick. Both PendSV and SysTick run at the lowest priority so any
//! interrupt may preempt them; the switch itself masks to the syscall
//! ceiling while kernel state is inconsistent.

#![allow(named_asm_labels)]

use core::arch::{asm, naked_asm};

use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::syst::SystClkSource;

use super::MAX_SYSCALL_INTERRUPT_PRIORITY;

/// DWT cycle counter, free-running once enabled
const DWT_CYCCNT: *const u32 = 0xE000_1004 as *const u32;

/// Raise BASEPRI to the syscall ceiling; returns the previous mask.
#[inline(always)]
pub fn raise_syscall_mask() -> u32 {
    let prev: u32;
    unsafe {
        asm!(
            "mrs {prev}, BASEPRI",
            "msr BASEPRI, {mask}",
            "dsb",
            "isb",
            prev = out(reg) prev,
            mask = in(reg) MAX_SYSCALL_INTERRUPT_PRIORITY,
        );
    }
    prev
}

/// Restore a mask previously returned by [`raise_syscall_mask`].
#[inline(always)]
pub fn restore_syscall_mask(mask: u32) {
    unsafe {
        asm!("msr BASEPRI, {mask}", mask = in(reg) mask);
    }
}

/// Request a deferred context switch.
#[inline(always)]
pub fn pend_context_switch() {
    cortex_m::peripheral::SCB::set_pendsv();
}

/// Put PendSV and SysTick at the lowest architectural priority.
pub fn set_exception_priorities() {
    let mut p = unsafe { cortex_m::Peripherals::steal() };
    unsafe {
        p.SCB.set_priority(SystemHandler::PendSV, 0xFF);
        p.SCB.set_priority(SystemHandler::SysTick, 0xFF);
    }
}

/// Program SysTick for `cnts` core cycles per tick, interrupt enabled.
pub fn systick_init(cnts: u32) {
    let mut p = unsafe { cortex_m::Peripherals::steal() };

    p.SYST.set_reload(cnts - 1);
    p.SYST.clear_current();
    p.SYST.set_clock_source(SystClkSource::Core);
    p.SYST.enable_interrupt();
    p.SYST.enable_counter();
}

/// Silence SysTick during scheduler bring-up.
pub fn systick_stop() {
    let mut p = unsafe { cortex_m::Peripherals::steal() };
    p.SYST.disable_counter();
    p.SYST.clear_current();
}

/// Turn on the DWT cycle counter used for task accounting.
pub fn enable_cycle_counter() {
    let mut p = unsafe { cortex_m::Peripherals::steal() };
    p.DCB.enable_trace();
    p.DWT.enable_cycle_counter();
}

/// Current cycle-counter reading
#[inline(always)]
pub fn cycle_count() -> u32 {
    unsafe { DWT_CYCCNT.read_volatile() }
}

/// Point VTOR at a module's relocated vector table.
///
/// # Safety
/// `addr` must reference a valid, aligned vector table.
#[inline]
pub unsafe fn write_vtor(addr: u32) {
    unsafe { (*cortex_m::peripheral::SCB::PTR).vtor.write(addr) };
}

/// Start multitasking: enable interrupts and trap into SVCall, which
/// restores the first task's seeded frame. Never returns.
pub fn start_first_task() -> ! {
    unsafe {
        asm!(
            "cpsie i",
            "cpsie f",
            "dsb",
            "isb",
            "svc 7",
            options(noreturn),
        );
    }
}

/// SVCall handler: dispatches the very first task.
///
/// Pops PSPLIM and EXC_RETURN from the current TCB's seeded frame,
/// switches Thread mode onto PSP, discards the seeded R4-R11 (the
/// hardware will restore the caller-saved half), and returns into the
/// task.
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn SVCall() {
    naked_asm!(
        "ldr r2, ={current}",
        "ldr r1, [r2]",
        "ldr r0, [r1]",
        // r1 = PSPLIM, r2 = EXC_RETURN
        "ldm r0!, {{r1, r2}}",
        "msr psplim, r1",
        // Thread mode on PSP, privileged
        "movs r1, #2",
        "msr CONTROL, r1",
        // Skip the seeded R4-R11
        "adds r0, #32",
        "msr psp, r0",
        "isb",
        "mov r0, #0",
        "msr basepri, r0",
        "bx r2",
        current = sym crate::kernel::state::CURRENT_TCB,
    );
}

/// PendSV handler: the context switch.
///
/// 1. Save PSPLIM, EXC_RETURN and R4-R11 below the hardware frame on the
///    outgoing task's process stack; store the resulting PSP at TCB+0.
///    Skipped when the outgoing task deleted itself (current is null).
/// 2. Under the syscall mask, let the scheduler account the outgoing
///    task and elect the next one.
/// 3. Reload PSP from the incoming TCB+0 and unwind the same layout.
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        "mrs r0, psp",
        "mrs r2, psplim",
        "mov r3, lr",
        "ldr r12, ={current}",
        "ldr r1, [r12]",
        "cbz r1, 1f",
        "stmdb r0!, {{r2-r11}}",
        "str r0, [r1]",
        "1:",
        "mov r0, #{mask}",
        "msr basepri, r0",
        "dsb",
        "isb",
        "bl {switch}",
        "mov r0, #0",
        "msr basepri, r0",
        "ldr r12, ={current}",
        "ldr r1, [r12]",
        "ldr r0, [r1]",
        "ldmia r0!, {{r2-r11}}",
        "msr psplim, r2",
        "msr psp, r0",
        "bx r3",
        current = sym crate::kernel::state::CURRENT_TCB,
        switch = sym crate::kernel::sched::switch_context,
        mask = const MAX_SYSCALL_INTERRUPT_PRIORITY,
    );
}

/// SysTick handler: kernel tick.
#[no_mangle]
pub extern "C" fn SysTick() {
    crate::kernel::sched::tick_handler();
}
