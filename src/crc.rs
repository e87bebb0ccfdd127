//! CRC32 helper with a pool-allocated lookup table.
//!
//! Reflected CRC-32 (polynomial 0xEDB88320). The 256-entry table is
//! built once from the kernel pool and released on deinit.

use crate::kernel::critical::critical_section;
use crate::kernel::cs_cell::CsCell;
use crate::kernel::error::{Error, Result};
use crate::mem;

const POLYNOMIAL: u32 = 0xEDB8_8320;
const TABLE_LEN: usize = 256;

struct CrcState {
    table: *mut u32,
}

unsafe impl Send for CrcState {}

static CRC: CsCell<CrcState> = CsCell::new(CrcState {
    table: core::ptr::null_mut(),
});

/// Build the lookup table. Fails when already built or when the pool
/// cannot back it.
pub fn init() -> Result<()> {
    critical_section(|cs| {
        let state = CRC.get(cs);
        if !state.table.is_null() {
            return Err(Error::CrcAlreadyInitialized);
        }
        if !mem::pool_ready() {
            return Err(Error::MemoryNotInitialized);
        }

        let table = mem::alloc((TABLE_LEN * 4) as u32) as *mut u32;
        if table.is_null() {
            return Err(Error::NoMemory);
        }

        for i in 0..TABLE_LEN {
            let mut crc = i as u32;
            for _ in 0..8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ POLYNOMIAL
                } else {
                    crc >> 1
                };
            }
            unsafe { table.add(i).write(crc) };
        }

        state.table = table;
        Ok(())
    })
}

/// CRC of `data`, continuing from `previous` (pass `0xFFFF_FFFF` to
/// start a fresh computation). The result is final-XORed and can be fed
/// back in as `previous` after re-inverting; for one-shot use just take
/// the return value.
pub fn calculate(data: &[u8], previous: u32) -> Result<u32> {
    critical_section(|cs| {
        let state = CRC.get(cs);
        if state.table.is_null() {
            return Err(Error::CrcNotInitialized);
        }

        let mut crc = previous;
        for &byte in data {
            let idx = ((crc ^ byte as u32) & 0xFF) as usize;
            crc = (crc >> 8) ^ unsafe { state.table.add(idx).read() };
        }
        Ok(crc ^ 0xFFFF_FFFF)
    })
}

/// Release the table.
pub fn deinit() -> Result<()> {
    critical_section(|cs| {
        let state = CRC.get(cs);
        if state.table.is_null() {
            return Err(Error::CrcNotInitialized);
        }
        mem::free(state.table as *mut u8);
        state.table = core::ptr::null_mut();
        Ok(())
    })
}
