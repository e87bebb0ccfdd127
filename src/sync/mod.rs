//! Synchronization primitives.
//!
//! All blocking primitives share one protocol: park on a FIFO wait list
//! with an absolute deadline, wake by hand-off from the producer side,
//! or by SysTick when the deadline passes.

pub mod wait_list;

#[cfg(feature = "sem")]
pub mod sem;

#[cfg(feature = "mutex")]
pub mod mutex;

pub mod circ_buf;
pub mod queue;
