//! Port layer: CPU-specific operations behind a small surface.
//!
//! The ARM implementation owns the exception handlers and register
//! access; a stub backend keeps the crate buildable and testable on the
//! host. Stack framing is shared: it is plain memory layout, identical
//! on every backend, and unit-tested on the host.

#[cfg(target_arch = "arm")]
pub mod cortex_m33;

#[cfg(target_arch = "arm")]
pub use cortex_m33::*;

#[cfg(not(target_arch = "arm"))]
pub mod host;

#[cfg(not(target_arch = "arm"))]
pub use host::*;

use crate::kernel::types::{StackWord, STACK_SENTINEL};

/// Interrupt priorities numerically at or below this stay blocked inside
/// kernel critical sections; faster ones keep running.
pub const MAX_SYSCALL_INTERRUPT_PRIORITY: u32 = 2 << 5;

/// xPSR for a fresh task: Thumb bit set, no flags
pub const INITIAL_XPSR: u32 = 0x0100_0000;

/// EXC_RETURN for a non-FP thread-mode return on PSP
pub const EXC_RETURN_THREAD_PSP: u32 = 0xFFFF_FFFD;

/// Saved context: PSPLIM, EXC_RETURN, R4-R11, then the hardware frame
pub const CONTEXT_FRAME_WORDS: usize = 18;

/// Initial exception frame, low address first, in the order a restoring
/// handler pops it.
#[repr(C)]
struct InitialFrame {
    psplim: u32,
    exc_return: u32,
    r4: u32,
    r5: u32,
    r6: u32,
    r7: u32,
    r8: u32,
    r9: u32,
    r10: u32,
    r11: u32,
    r0: u32,
    r1: u32,
    r2: u32,
    r3: u32,
    r12: u32,
    lr: u32,
    pc: u32,
    xpsr: u32,
}

/// Seed the initial exception frame at the 8-byte-aligned top of a
/// sentinel-filled stack so the first dispatch lands in `entry_pc` with
/// `arg` in R0 and `exit_guard` waiting in LR.
///
/// Returns the seeded stack pointer (lowest frame word).
///
/// # Safety
/// `stk_base..stk_base + stk_words` must be valid, exclusively owned
/// memory.
pub unsafe fn init_task_stack(
    entry_pc: u32,
    arg: u32,
    exit_guard: u32,
    stk_base: *mut StackWord,
    stk_words: usize,
) -> *mut StackWord {
    unsafe {
        let stk_top = stk_base.add(stk_words);
        let aligned_top = ((stk_top as usize) & !7) as *mut StackWord;
        let frame = aligned_top.sub(CONTEXT_FRAME_WORDS) as *mut InitialFrame;

        frame.write(InitialFrame {
            psplim: stk_base as usize as u32,
            exc_return: EXC_RETURN_THREAD_PSP,
            r4: STACK_SENTINEL,
            r5: STACK_SENTINEL,
            r6: STACK_SENTINEL,
            r7: STACK_SENTINEL,
            r8: STACK_SENTINEL,
            r9: STACK_SENTINEL,
            r10: STACK_SENTINEL,
            r11: STACK_SENTINEL,
            r0: arg,
            r1: 0,
            r2: 0,
            r3: 0,
            r12: 0,
            lr: exit_guard,
            pc: entry_pc,
            xpsr: INITIAL_XPSR,
        });

        frame as *mut StackWord
    }
}

/// Free stack in words: scan upward from the base for the first word a
/// task has dirtied.
///
/// # Safety
/// The stack region must be valid for reads.
pub(crate) unsafe fn free_stack_words(stk_base: *mut StackWord, stk_words: usize) -> u32 {
    let mut free = 0u32;
    for i in 0..stk_words {
        if unsafe { stk_base.add(i).read() } != STACK_SENTINEL {
            break;
        }
        free += 1;
    }
    free
}
