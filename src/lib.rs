//! CRTOS, a preemptive real-time kernel for a single Cortex-M33 core.
//!
//! The kernel hosts dynamically created tasks on private stacks and
//! provides:
//! - Fixed-priority preemptive scheduling with exception-driven context
//!   switching (SVCall, PendSV, SysTick)
//! - Blocking synchronization with deadlines: binary semaphore, bounded
//!   queue, circular byte buffer, plus an interrupt-masking spinlock
//! - Software timers served by a kernel task
//! - A loader that spawns position-independent flat binary modules as
//!   tasks with their own relocated vector table
//!
//! Bring-up: hand over a memory pool with [`config::init_mem`], create
//! tasks, then call [`scheduler::start`], which does not return.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

// ============ Critical Section ============

#[cfg(target_arch = "arm")]
mod cs_impl {
    use cortex_m::interrupt;
    use cortex_m::register::primask;
    use critical_section::{set_impl, Impl, RawRestoreState};

    struct SingleCoreCriticalSection;
    set_impl!(SingleCoreCriticalSection);

    unsafe impl Impl for SingleCoreCriticalSection {
        unsafe fn acquire() -> RawRestoreState {
            let was_active = primask::read().is_active();
            interrupt::disable();
            was_active
        }

        unsafe fn release(was_active: RawRestoreState) {
            if was_active {
                unsafe { interrupt::enable() }
            }
        }
    }
}

// ============ Modules ============

pub mod log;
mod lang_items;

pub mod crc;
pub mod kernel;
pub mod loader;
pub mod mem;
pub mod port;
pub mod sync;

// ============ Re-exports ============

pub use kernel::config;
pub use kernel::critical;
pub use kernel::error;
pub use kernel::error::{Error, Result};
pub use kernel::sched as scheduler;
pub use kernel::task;
pub use kernel::task::TaskHandle;
pub use kernel::time;
pub use kernel::timer;
pub use kernel::types;
pub use kernel::types::*;

pub use sync::circ_buf::CircularBuffer;
pub use sync::queue::Queue;

#[cfg(feature = "mutex")]
pub use sync::mutex::Mutex;
#[cfg(feature = "sem")]
pub use sync::sem::Semaphore;

#[cfg(all(feature = "pac", target_arch = "arm"))]
pub use lpc55_pac as pac;
