//! Kernel memory pool facade.
//!
//! A single process-wide allocator hands out TCBs, stacks, queue storage
//! and loader regions. The pool arrives once through `init_mem`; callers
//! serialize access through the kernel critical section.

mod heap;

pub use heap::HeapAllocator;

use crate::kernel::cs_cell::CsCell;
use crate::kernel::error::{Error, Result};

static MEM: CsCell<HeapAllocator> = CsCell::new(HeapAllocator::new());

/// Supply the kernel memory pool. Must happen before any task creation.
pub fn init_mem(pool: *mut u8, size: u32) -> Result<()> {
    if pool.is_null() || size == 0 {
        return Err(Error::NoMemory);
    }

    MEM.with(|mem| unsafe { mem.init(pool, size) });
    Ok(())
}

/// Whether a pool has been supplied
pub fn pool_ready() -> bool {
    MEM.with(|mem| mem.is_initialized())
}

/// Allocate `size` bytes from the pool; null when exhausted or
/// uninitialized.
pub(crate) fn alloc(size: u32) -> *mut u8 {
    MEM.with(|mem| mem.allocate(size))
}

/// Return an allocation to the pool.
pub(crate) fn free(ptr: *mut u8) {
    MEM.with(|mem| mem.deallocate(ptr))
}

/// Bytes available for allocation
pub fn free_memory() -> u32 {
    MEM.with(|mem| mem.free_memory())
}

/// Bytes currently handed out
pub fn allocated_memory() -> u32 {
    MEM.with(|mem| mem.allocated_memory())
}
