//! Panic and fault handling.
//!
//! A hard fault ends the party: the handler reports the faulting
//! context (stacked PC/LR, the fault status registers, and the task
//! that was running) and traps. Panics follow the same path, through
//! panic-probe when defmt is enabled.

#[cfg(all(feature = "defmt", target_arch = "arm"))]
use defmt_rtt as _;

#[cfg(all(feature = "defmt", target_arch = "arm"))]
use panic_probe as _;

#[cfg(all(feature = "defmt", target_arch = "arm"))]
#[defmt::panic_handler]
fn defmt_panic() -> ! {
    cortex_m::asm::udf()
}

#[cfg(all(not(feature = "defmt"), target_arch = "arm"))]
#[panic_handler]
fn panic(_: &core::panic::PanicInfo) -> ! {
    loop {
        cortex_m::asm::udf();
    }
}

/// Configurable fault status register
#[cfg(target_arch = "arm")]
const CFSR: *const u32 = 0xE000_ED28 as *const u32;

/// Hard fault status register
#[cfg(target_arch = "arm")]
const HFSR: *const u32 = 0xE000_ED2C as *const u32;

#[cfg(target_arch = "arm")]
#[cortex_m_rt::exception]
unsafe fn HardFault(ef: &cortex_m_rt::ExceptionFrame) -> ! {
    crate::kerror!(
        "hard fault: pc={:#x} lr={:#x} cfsr={:#x} hfsr={:#x}",
        ef.pc(),
        ef.lr(),
        unsafe { CFSR.read_volatile() },
        unsafe { HFSR.read_volatile() },
    );
    if let Some(name) = crate::kernel::task::current_name() {
        crate::kerror!("while running {}", name);
    }
    loop {
        cortex_m::asm::udf();
    }
}

// Log lines carry the kernel tick as their timestamp
#[cfg(all(feature = "defmt", target_arch = "arm"))]
defmt::timestamp!("{=u32}", crate::kernel::state::KERNEL.tick_get());
