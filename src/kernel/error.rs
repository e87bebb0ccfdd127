//! Error type for all fallible kernel operations.
//!
//! Every operation returns its result by value; there is no out-of-band
//! error channel. Blocking primitives report expiry through their own
//! timeout variant so callers can tell the sources apart.

/// Kernel error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Error {
    /// Null pointer, zero size, or an otherwise out-of-range argument
    BadParameter,
    /// The pool allocator could not satisfy a request
    NoMemory,
    /// No memory pool was supplied before use
    MemoryNotInitialized,

    /// Signal on an already-signaled semaphore with no waiter
    SemaphoreBusy,
    /// Semaphore wait expired
    SemaphoreTimeout,
    /// Introspection on a semaphore with no recorded waiter
    SemaphoreNoOwner,

    /// Start on a timer that is already running
    TimerAlreadyActive,
    /// Stop on a timer that is already inactive
    TimerAlreadyStopped,

    /// Send on a full queue
    QueueFull,
    /// Queue receive expired
    QueueTimeout,
    /// Non-blocking receive on an empty queue
    QueueEmpty,

    /// Send that would overrun the circular buffer
    CircularBufferFull,
    /// Circular buffer receive expired
    CircularBufferTimeout,
    /// Non-blocking receive with insufficient buffered data
    CircularBufferEmpty,

    /// Delete-by-handle missed the ready list
    TaskNotFound,

    /// CRC helper used before `init`
    CrcNotInitialized,
    /// CRC helper initialized twice
    CrcAlreadyInitialized,
}

/// Result alias used throughout the kernel
pub type Result<T> = core::result::Result<T, Error>;
