//! Host-side kernel tests.
//!
//! These run on the development machine against the stub port: no
//! context switching, but everything that is plain data and arithmetic
//! — pool allocation, queues, buffers, timers, the module loader — is
//! exercised for real. Tests share one kernel pool, so they serialize
//! on a process-wide lock.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, Once};

use crtos::loader::{self, ProgramInfo, MODULE_MAGIC};
use crtos::timer::{self, SoftwareTimer};
use crtos::{config, crc, task, CircularBuffer, Error, Queue, Semaphore};

static POOL_INIT: Once = Once::new();
static TEST_LOCK: Mutex<()> = Mutex::new(());

fn setup() -> MutexGuard<'static, ()> {
    let guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    POOL_INIT.call_once(|| {
        let pool: &'static mut [u64] = Box::leak(vec![0u64; 16 * 1024].into_boxed_slice());
        let bytes = (pool.len() * 8) as u32;
        config::init_mem(pool.as_mut_ptr() as *mut u8, bytes).expect("pool init");
    });
    guard
}

// ============ Configuration ============

#[test]
fn init_mem_rejects_null_and_empty_pools() {
    let _guard = setup();
    assert_eq!(
        config::init_mem(core::ptr::null_mut(), 4096),
        Err(Error::NoMemory)
    );
    let mut byte = 0u8;
    assert_eq!(config::init_mem(&mut byte, 0), Err(Error::NoMemory));
}

#[test]
fn pool_accounting_moves_with_allocations() {
    let _guard = setup();
    let free_before = config::free_memory();
    let q = Queue::new(16, 32).unwrap();
    assert!(config::free_memory() < free_before);
    assert!(config::allocated_memory() >= 16 * 32);
    drop(q);
    assert_eq!(config::free_memory(), free_before);
}

// ============ Queue ============

#[test]
fn queue_round_trips_in_fifo_order() {
    let _guard = setup();
    let queue = Queue::new(4, 8).unwrap();

    for i in 0..4u8 {
        let item = [i; 8];
        queue.send(&item).unwrap();
    }
    assert_eq!(queue.len(), 4);
    assert_eq!(queue.send(&[9u8; 8]), Err(Error::QueueFull));

    for i in 0..4u8 {
        let mut buf = [0u8; 8];
        queue.receive(&mut buf, 100).unwrap();
        assert_eq!(buf, [i; 8]);
    }
    assert!(queue.is_empty());
}

#[test]
fn queue_empty_paths_are_distinguished() {
    let _guard = setup();
    let queue = Queue::new(2, 4).unwrap();
    let mut buf = [0u8; 4];

    // non-blocking probe vs. zero-tick receive
    assert_eq!(queue.try_receive(&mut buf), Err(Error::QueueEmpty));
    assert_eq!(queue.receive(&mut buf, 0), Err(Error::QueueTimeout));

    queue.send(&[7u8; 4]).unwrap();
    assert_eq!(queue.receive(&mut buf, 0), Ok(()));
    assert_eq!(buf, [7u8; 4]);
}

#[test]
fn queue_enforces_element_size() {
    let _guard = setup();
    let queue = Queue::new(2, 4).unwrap();
    assert_eq!(queue.send(&[0u8; 3]), Err(Error::BadParameter));
    let mut small = [0u8; 2];
    assert_eq!(queue.try_receive(&mut small), Err(Error::BadParameter));
    assert!(matches!(Queue::new(0, 4), Err(Error::BadParameter)));
    assert!(matches!(Queue::new(4, 0), Err(Error::BadParameter)));
}

#[test]
fn queue_allocation_failure_reports_no_memory() {
    let _guard = setup();
    assert!(matches!(Queue::new(1 << 20, 1024), Err(Error::NoMemory)));
}

// ============ Circular buffer ============

#[test]
fn circular_buffer_preserves_bytes_across_wrap() {
    let _guard = setup();
    let buf = CircularBuffer::new(8).unwrap();

    buf.send(&[1, 2, 3, 4, 5]).unwrap();
    let mut out = [0u8; 5];
    buf.receive(&mut out, 10).unwrap();
    assert_eq!(out, [1, 2, 3, 4, 5]);

    // head is at 5 of 8: this send wraps
    buf.send(&[6, 7, 8, 9, 10, 11]).unwrap();
    assert_eq!(buf.len(), 6);
    let mut out = [0u8; 6];
    buf.receive(&mut out, 10).unwrap();
    assert_eq!(out, [6, 7, 8, 9, 10, 11]);
    assert!(buf.is_empty());
}

#[test]
fn circular_buffer_chunk_splits_keep_the_stream_intact() {
    let _guard = setup();
    let buf = CircularBuffer::new(16);
    let buf = buf.unwrap();

    let stream: Vec<u8> = (0..48).collect();
    let mut received = Vec::new();
    let mut sent = 0;

    // drive uneven send/receive chunk sizes through several wraps
    for (send_n, recv_n) in [(7, 5), (9, 11), (5, 5), (11, 9), (7, 9), (9, 9)] {
        buf.send(&stream[sent..sent + send_n]).unwrap();
        sent += send_n;
        let mut chunk = vec![0u8; recv_n];
        buf.receive(&mut chunk, 10).unwrap();
        received.extend_from_slice(&chunk);
    }

    assert_eq!(sent, 48);
    assert_eq!(received, stream);
}

#[test]
fn circular_buffer_full_and_empty_paths() {
    let _guard = setup();
    let buf = CircularBuffer::new(4).unwrap();

    buf.send(&[1, 2, 3]).unwrap();
    assert_eq!(buf.send(&[4, 5]), Err(Error::CircularBufferFull));

    let mut big = [0u8; 4];
    assert_eq!(buf.try_receive(&mut big), Err(Error::CircularBufferEmpty));
    assert_eq!(buf.receive(&mut big, 0), Err(Error::CircularBufferTimeout));

    let mut out = [0u8; 3];
    buf.receive(&mut out, 0).unwrap();
    assert_eq!(out, [1, 2, 3]);
}

// ============ Semaphore ============

#[test]
fn semaphore_latch_and_probe() {
    let _guard = setup();
    let sem = Semaphore::new(0);

    assert_eq!(sem.wait(0), Err(Error::SemaphoreTimeout));
    assert_eq!(sem.signal(), Ok(()));
    assert_eq!(sem.signal(), Err(Error::SemaphoreBusy));
    assert_eq!(sem.wait(0), Ok(()));
    assert_eq!(sem.owner().unwrap_err(), Error::SemaphoreNoOwner);
}

// ============ Software timers ============

fn bump(arg: *mut ()) {
    let counter = unsafe { &*(arg as *const AtomicU32) };
    counter.fetch_add(1, Ordering::Relaxed);
}

fn leaked_timer() -> &'static SoftwareTimer {
    Box::leak(Box::new(SoftwareTimer::new()))
}

fn leaked_counter() -> &'static AtomicU32 {
    Box::leak(Box::new(AtomicU32::new(0)))
}

#[test]
fn auto_reload_timer_fires_once_per_period() {
    let _guard = setup();
    let tmr = leaked_timer();
    let counter = leaked_counter();

    timer::init(
        tmr,
        100,
        bump,
        counter as *const AtomicU32 as *mut (),
        true,
    )
    .unwrap();
    timer::start(tmr).unwrap();

    for _ in 0..1050 {
        timer::service_pass();
    }

    assert_eq!(counter.load(Ordering::Relaxed), 10);
    timer::stop(tmr).unwrap();
}

#[test]
fn one_shot_timer_deactivates_after_firing() {
    let _guard = setup();
    let tmr = leaked_timer();
    let counter = leaked_counter();

    timer::init(tmr, 3, bump, counter as *const AtomicU32 as *mut (), false).unwrap();
    timer::start(tmr).unwrap();

    for _ in 0..10 {
        timer::service_pass();
    }

    assert_eq!(counter.load(Ordering::Relaxed), 1);
    assert!(!tmr.is_active());
    assert_eq!(timer::stop(tmr), Err(Error::TimerAlreadyStopped));
}

#[test]
fn start_on_active_timer_keeps_the_running_count() {
    let _guard = setup();
    let tmr = leaked_timer();
    let counter = leaked_counter();

    timer::init(
        tmr,
        100,
        bump,
        counter as *const AtomicU32 as *mut (),
        false,
    )
    .unwrap();
    timer::start(tmr).unwrap();

    for _ in 0..50 {
        timer::service_pass();
    }
    assert_eq!(timer::start(tmr), Err(Error::TimerAlreadyActive));
    assert_eq!(tmr.elapsed(), 50);

    // the rejected start did not reset elapsed: 50 more passes fire it
    for _ in 0..50 {
        timer::service_pass();
    }
    assert_eq!(counter.load(Ordering::Relaxed), 1);
}

#[test]
fn timer_parameter_validation() {
    let _guard = setup();
    let tmr = leaked_timer();
    assert_eq!(
        timer::init(tmr, 0, bump, core::ptr::null_mut(), false),
        Err(Error::BadParameter)
    );
    // unregistered timers cannot start or stop
    assert_eq!(timer::start(tmr), Err(Error::BadParameter));
    assert_eq!(timer::stop(tmr), Err(Error::BadParameter));
}

// ============ Tasks ============

fn spin_entry(_arg: *mut ()) {
    loop {
        core::hint::spin_loop();
    }
}

#[test]
fn task_lifecycle_create_delete() {
    let _guard = setup();

    let handle = task::create(spin_entry, "victim", 128, core::ptr::null_mut(), 3).unwrap();
    assert_eq!(task::delete(handle), Ok(()));
    // the handle is gone from the ready list
    assert_eq!(task::delete(handle), Err(Error::TaskNotFound));
}

#[test]
fn task_create_validates_stack_depth() {
    let _guard = setup();
    assert_eq!(
        task::create(spin_entry, "tiny", 8, core::ptr::null_mut(), 1).unwrap_err(),
        Error::BadParameter
    );
}

#[test]
fn pause_and_resume_round_trip() {
    let _guard = setup();

    let handle = task::create(spin_entry, "pausee", 128, core::ptr::null_mut(), 2).unwrap();
    assert_eq!(task::pause(handle), Ok(()));
    // resuming a task that is not paused is rejected
    assert_eq!(task::resume(handle), Ok(()));
    assert_eq!(task::resume(handle), Err(Error::BadParameter));
    task::delete(handle).unwrap();
}

#[test]
fn zero_tick_delay_is_rejected() {
    assert_eq!(crtos::time::delay(0), Err(Error::BadParameter));
}

// ============ Module loader ============

const HEADER_WORDS: usize = core::mem::size_of::<ProgramInfo>() / 4;

fn put_word(image: &mut [u8], word: usize, value: u32) {
    image[word * 4..word * 4 + 4].copy_from_slice(&value.to_le_bytes());
}

fn read_word(base: *const u8, word: usize) -> u32 {
    let mut bytes = [0u8; 4];
    unsafe {
        core::ptr::copy_nonoverlapping(base.add(word * 4), bytes.as_mut_ptr(), 4);
    }
    u32::from_le_bytes(bytes)
}

/// Flat image: header, then code padding, then the .data payload.
fn build_image(entry_off: u32, data: &[u8], bss_size: u32, stack_size: u32) -> Vec<u8> {
    let data_off = (core::mem::size_of::<ProgramInfo>() as u32 + 64 + 7) & !7;
    let mut image = vec![0u8; data_off as usize + data.len()];

    put_word(&mut image, 0, 0x2000_4000 + stack_size); // link-time SP
    put_word(&mut image, 1, entry_off);
    put_word(&mut image, 76, data_off); // data load offset
    put_word(&mut image, 78, data.len() as u32); // data size
    put_word(&mut image, 80, bss_size);
    put_word(&mut image, 104, 0x2000_4000); // msp limit

    image[data_off as usize..].copy_from_slice(data);
    image
}

#[test]
fn loader_relocates_a_headered_image() {
    let _guard = setup();

    let data: Vec<u8> = (0x40..0x50).collect(); // 16 initializer bytes
    let image = build_image(0x40, &data, 32, 1024);

    let module = loader::load_bin_module(&image).unwrap();
    assert_eq!(module.image_size as usize, image.len());
    assert_eq!(module.ram_size, 16 + 32 + 1024);
    assert_eq!(module.stack_words, 256);

    let image_addr = module.image_base as usize as u32;
    let ram_addr = module.ram_base as usize as u32;

    // the in-copy header now reflects runtime addresses
    assert_eq!(
        read_word(module.image_base, 1),
        image_addr.wrapping_add(0x40) | 1
    );
    assert_eq!(read_word(module.image_base, 77), ram_addr); // data dest
    assert_eq!(read_word(module.image_base, 79), ram_addr.wrapping_add(16)); // bss start
    let new_sp = ram_addr.wrapping_add(module.ram_size);
    assert_eq!(read_word(module.image_base, 0), new_sp);
    assert_eq!(read_word(module.image_base, 104), new_sp.wrapping_sub(1024));
    assert_eq!(read_word(module.image_base, 103), image_addr); // vtor
    assert_eq!(module.vtor, image_addr);
    assert_eq!(module.entry_addr & 1, 1);

    // .data landed at the front of the RAM region
    let relocated = unsafe { core::slice::from_raw_parts(module.ram_base, 16) };
    assert_eq!(relocated, &data[..]);

    // bss and stack arrive zeroed
    let bss = unsafe { core::slice::from_raw_parts(module.ram_base.add(16), 32) };
    assert!(bss.iter().all(|&b| b == 0));
}

#[test]
fn loader_honors_the_module_descriptor() {
    let _guard = setup();

    // header, descriptor, padding, then 8 data bytes at offset 512
    let data_off = 512usize;
    let data = [0xAAu8; 8];
    let declared = (data_off + data.len() + 128) as u32;

    let mut image = vec![0u8; data_off + data.len()];
    put_word(&mut image, 0, 0x2000_4200);
    put_word(&mut image, 1, 0x40);
    put_word(&mut image, 76, data_off as u32);
    put_word(&mut image, 78, data.len() as u32);
    put_word(&mut image, 104, 0x2000_4000);

    put_word(&mut image, HEADER_WORDS, MODULE_MAGIC);
    // image_size sits behind magic, versions, name, semver, timestamp
    let size_off = core::mem::size_of::<ProgramInfo>() + 52;
    image[size_off..size_off + 4].copy_from_slice(&declared.to_le_bytes());
    image[data_off..].copy_from_slice(&data);

    let module = loader::load_bin_module(&image).unwrap();
    // the descriptor's size wins over the data-layout estimate, and the
    // copy is zero-padded out to it
    assert_eq!(module.image_size, declared);
    let desc = module.descriptor.expect("descriptor present");
    assert_eq!({ desc.magic }, MODULE_MAGIC);
    assert_eq!({ desc.image_size }, declared);
    let pad = unsafe {
        core::slice::from_raw_parts(module.image_base.add(image.len()), 128)
    };
    assert!(pad.iter().all(|&b| b == 0));
}

#[test]
fn loader_rejects_malformed_images() {
    let _guard = setup();

    assert!(matches!(
        loader::load_bin_module(&[]),
        Err(Error::BadParameter)
    ));
    let short = vec![0u8; 64];
    assert!(matches!(
        loader::load_bin_module(&short),
        Err(Error::BadParameter)
    ));

    // a descriptor-declared size that cannot hold the data payload
    let data = [1u8, 2, 3, 4];
    let data_off = 512usize;
    let mut image = vec![0u8; data_off + data.len()];
    put_word(&mut image, 0, 0x2000_4100);
    put_word(&mut image, 1, 0x40);
    put_word(&mut image, 76, data_off as u32);
    put_word(&mut image, 78, data.len() as u32);
    put_word(&mut image, 104, 0x2000_4000);
    put_word(&mut image, HEADER_WORDS, MODULE_MAGIC);
    let size_off = core::mem::size_of::<ProgramInfo>() + 52;
    image[size_off..size_off + 4]
        .copy_from_slice(&(core::mem::size_of::<ProgramInfo>() as u32).to_le_bytes());
    assert!(matches!(
        loader::load_bin_module(&image),
        Err(Error::BadParameter)
    ));

    // an image too large for the pool fails allocation, not silently
    let mut huge = build_image(0x40, &[0u8; 4], 0, 256);
    put_word(&mut huge, 76, 1 << 20);
    assert!(matches!(loader::load_bin_module(&huge), Err(Error::NoMemory)));
}

#[test]
fn module_task_spawns_and_deletes_cleanly() {
    let _guard = setup();

    let free_before = config::free_memory();
    let data = [0x5Au8; 16];
    let image = build_image(0x40, &data, 32, 1024);

    let handle =
        loader::create_task_for_bin_module(&image, "mod", core::ptr::null_mut(), 4).unwrap();

    // deletion releases the TCB, the image copy and the RAM region
    task::delete(handle).unwrap();
    assert_eq!(task::delete(handle), Err(Error::TaskNotFound));
    assert_eq!(config::free_memory(), free_before);
}

#[test]
fn introspection_without_a_running_kernel() {
    let _guard = setup();
    assert!(task::current().is_none());
    assert!(task::current_name().is_none());
    assert_eq!(task::free_stack(), 0);
    assert_eq!(task::task_cycles(), 0);
    assert_eq!(task::core_load(), (0, 0));
}

#[test]
fn timer_reinit_updates_in_place() {
    let _guard = setup();
    let tmr = leaked_timer();
    let counter = leaked_counter();

    timer::init(tmr, 500, bump, counter as *const AtomicU32 as *mut (), false).unwrap();
    // re-registering tightens the timeout without duplicating the entry
    timer::init(tmr, 5, bump, counter as *const AtomicU32 as *mut (), false).unwrap();
    timer::start(tmr).unwrap();

    for _ in 0..20 {
        timer::service_pass();
    }
    assert_eq!(counter.load(Ordering::Relaxed), 1);
}

#[test]
fn loader_defaults_when_the_header_is_minimal() {
    let _guard = setup();

    // no descriptor, no data/bss, zero stack bounds
    let image = vec![0u8; core::mem::size_of::<ProgramInfo>()];
    let module = loader::load_bin_module(&image).unwrap();

    assert_eq!(module.image_size, loader::DEFAULT_IMAGE_SIZE);
    assert_eq!(module.ram_size, loader::DEFAULT_STACK_BYTES);
    assert_eq!(module.stack_words as u32, loader::DEFAULT_STACK_BYTES / 4);
    assert_eq!(module.entry_addr, (module.image_base as usize as u32) | 1);
}

// ============ CRC32 ============

#[test]
fn crc32_lifecycle_and_check_value() {
    let _guard = setup();

    assert_eq!(crc::calculate(b"123456789", 0xFFFF_FFFF), Err(Error::CrcNotInitialized));
    assert_eq!(crc::deinit(), Err(Error::CrcNotInitialized));

    crc::init().unwrap();
    assert_eq!(crc::init(), Err(Error::CrcAlreadyInitialized));

    // the standard CRC-32 check value
    assert_eq!(crc::calculate(b"123456789", 0xFFFF_FFFF), Ok(0xCBF4_3926));
    assert_eq!(crc::calculate(b"", 0xFFFF_FFFF), Ok(0));

    crc::deinit().unwrap();
    assert_eq!(crc::deinit(), Err(Error::CrcNotInitialized));
}
