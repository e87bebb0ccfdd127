//! Kernel event logging.
//!
//! The kernel reports three kinds of events: routine lifecycle traces
//! (task creation), bring-up milestones (scheduler start, module load),
//! and faults. Each gets its own macro so call sites stay unconditional.
//! With the `defmt` feature the events go out over RTT stamped with the
//! kernel tick; without it the macros still evaluate their arguments and
//! emit nothing.

/// Routine lifecycle trace
#[cfg(feature = "defmt")]
#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => { defmt::debug!($($arg)*) };
}

/// Bring-up and module-load milestones
#[cfg(feature = "defmt")]
#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => { defmt::info!($($arg)*) };
}

/// Faults and unrecoverable conditions
#[cfg(feature = "defmt")]
#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => { defmt::error!($($arg)*) };
}

#[cfg(not(feature = "defmt"))]
#[macro_export]
macro_rules! kdebug {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {{ $(let _ = &$arg;)* }};
}

#[cfg(not(feature = "defmt"))]
#[macro_export]
macro_rules! kinfo {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {{ $(let _ = &$arg;)* }};
}

#[cfg(not(feature = "defmt"))]
#[macro_export]
macro_rules! kerror {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {{ $(let _ = &$arg;)* }};
}
