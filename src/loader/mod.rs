//! Position-independent module loader.
//!
//! A module is a flat image beginning with a `ProgramInfo` header whose
//! first 76 words double as the module's vector table (initial SP,
//! entry, 74 exception vectors), optionally followed by a
//! `ModuleDescriptor` carrying the authoritative image size and version
//! metadata. Loading copies the image into the pool, carves a zeroed
//! RAM region for data + bss + stack, rewrites the in-copy header to
//! runtime addresses, and can then synthesize a READY task whose first
//! dispatch enters the relocated Thumb entry point.

use core::mem::size_of;
use core::ptr::NonNull;

use crate::kernel::config;
use crate::kernel::critical::CriticalSection;
use crate::kernel::error::{Error, Result};
use crate::kernel::sched;
use crate::kernel::state::SCHED;
use crate::kernel::task::{TaskHandle, Tcb, MIN_STACK_WORDS};
use crate::kernel::types::{StackWord, TaskPrio, STACK_SENTINEL};
use crate::mem;
use crate::port;

/// "MODU", marking a `ModuleDescriptor` behind the header
pub const MODULE_MAGIC: u32 = 0x4D4F_4455;

/// Image size assumed when neither descriptor nor data layout bound it
pub const DEFAULT_IMAGE_SIZE: u32 = 4096;

/// Stack carved for a module whose header leaves `msp_limit` at zero
pub const DEFAULT_STACK_BYTES: u32 = 1024;

/// Flat-image header. The leading 76 words are laid out as a Cortex-M
/// vector table, so VTOR can point straight at the image base.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ProgramInfo {
    /// Link-time initial stack pointer (end of the module's RAM)
    pub stack_pointer: u32,
    /// Entry-point offset from the image base (Thumb)
    pub entry_point: u32,
    /// Exception vector copy
    pub vectors: [u32; 74],
    /// Offset of the .data initializer payload within the image
    pub data_start: u32,
    /// Runtime destination of .data, recomputed at load
    pub data_dest: u32,
    /// .data size in bytes
    pub data_size: u32,
    /// Runtime start of .bss, recomputed at load
    pub bss_start: u32,
    /// .bss size in bytes
    pub bss_size: u32,
    pub reserved: [u32; 22],
    /// Vector-table base, filled by the loader
    pub vtor_offset: u32,
    /// Link-time stack lower bound
    pub msp_limit: u32,
}

/// Optional metadata block directly behind `ProgramInfo`
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct ModuleDescriptor {
    pub magic: u32,
    pub desc_version: u16,
    pub reserved: u16,
    pub api_version: u32,
    pub name: [u8; 32],
    pub ver_major: u8,
    pub ver_minor: u8,
    pub ver_patch: u16,
    pub build_timestamp: u32,
    /// Authoritative image size in bytes
    pub image_size: u32,
    pub entry: u32,
    pub reserved2: [u32; 6],
}

/// A module relocated into the pool, ready for task synthesis
pub struct LoadedModule {
    /// Pool allocation holding the image copy
    pub image_base: *mut u8,
    pub image_size: u32,
    /// Zeroed region holding data + bss + stack
    pub ram_base: *mut u8,
    pub ram_size: u32,
    /// Lowest address of the module's stack (its msp limit)
    pub stack_base: *mut StackWord,
    pub stack_words: usize,
    /// Relocated entry address, Thumb bit set
    pub entry_addr: u32,
    /// Relocated vector-table base
    pub vtor: u32,
    /// Descriptor copy, when the image carried one
    pub descriptor: Option<ModuleDescriptor>,
}

fn read_header(image: &[u8]) -> ProgramInfo {
    unsafe { (image.as_ptr() as *const ProgramInfo).read_unaligned() }
}

fn read_descriptor(image: &[u8]) -> Option<ModuleDescriptor> {
    let offset = size_of::<ProgramInfo>();
    if image.len() < offset + size_of::<ModuleDescriptor>() {
        return None;
    }
    let desc =
        unsafe { (image.as_ptr().add(offset) as *const ModuleDescriptor).read_unaligned() };
    if desc.magic == MODULE_MAGIC {
        Some(desc)
    } else {
        None
    }
}

/// Relocate a flat module image into the kernel pool.
///
/// Either every allocation this makes survives into the returned
/// [`LoadedModule`] or all of them are rolled back before the error
/// comes out.
pub fn load_bin_module(image: &[u8]) -> Result<LoadedModule> {
    if image.is_empty() || image.len() < size_of::<ProgramInfo>() {
        return Err(Error::BadParameter);
    }
    if !mem::pool_ready() {
        return Err(Error::MemoryNotInitialized);
    }

    let header = read_header(image);
    let descriptor = read_descriptor(image);

    let image_size = match &descriptor {
        Some(desc) => desc.image_size,
        None if header.data_start != 0 || header.data_size != 0 => header
            .data_start
            .checked_add(header.data_size)
            .ok_or(Error::BadParameter)?,
        None => DEFAULT_IMAGE_SIZE,
    };
    if image_size < size_of::<ProgramInfo>() as u32 {
        return Err(Error::BadParameter);
    }
    // the .data payload must lie inside the image
    if header.data_size > 0
        && (header.data_start > image_size || header.data_size > image_size - header.data_start)
    {
        return Err(Error::BadParameter);
    }

    let stack_size = match header.stack_pointer.wrapping_sub(header.msp_limit) {
        0 => DEFAULT_STACK_BYTES,
        n => n,
    };
    // the module runs on this stack; it must at least hold a context frame
    if stack_size < (MIN_STACK_WORDS * size_of::<StackWord>()) as u32 {
        return Err(Error::BadParameter);
    }
    let ram_size = header
        .data_size
        .checked_add(header.bss_size)
        .and_then(|n| n.checked_add(stack_size))
        .ok_or(Error::BadParameter)?;

    let image_base = mem::alloc(image_size);
    if image_base.is_null() {
        crate::kerror!("module load: pool cannot hold {} image bytes", image_size);
        return Err(Error::NoMemory);
    }
    let ram_base = mem::alloc(ram_size);
    if ram_base.is_null() {
        crate::kerror!("module load: pool cannot hold {} ram bytes", ram_size);
        mem::free(image_base);
        return Err(Error::NoMemory);
    }

    unsafe {
        // image copy, zero-padded out to the declared size
        let copied = image.len().min(image_size as usize);
        core::ptr::copy_nonoverlapping(image.as_ptr(), image_base, copied);
        core::ptr::write_bytes(image_base.add(copied), 0, image_size as usize - copied);

        // data at offset 0, bss behind it, stack at the tail
        core::ptr::write_bytes(ram_base, 0, ram_size as usize);
        core::ptr::copy_nonoverlapping(
            image_base.add(header.data_start as usize),
            ram_base,
            header.data_size as usize,
        );
    }

    let image_addr = image_base as usize as u32;
    let ram_addr = ram_base as usize as u32;
    let new_sp = ram_addr.wrapping_add(ram_size);
    let entry_addr = image_addr.wrapping_add(header.entry_point) | 1;

    // rewrite the in-copy header to runtime addresses
    unsafe {
        let info = &mut *(image_base as *mut ProgramInfo);
        info.data_dest = ram_addr;
        info.data_start = image_addr.wrapping_add(header.data_start);
        info.bss_start = ram_addr.wrapping_add(header.data_size);
        info.stack_pointer = new_sp;
        info.msp_limit = new_sp.wrapping_sub(stack_size);
        info.entry_point = entry_addr;
        info.vtor_offset = image_addr;
    }

    Ok(LoadedModule {
        image_base,
        image_size,
        ram_base,
        ram_size,
        stack_base: unsafe {
            ram_base.add((header.data_size + header.bss_size) as usize) as *mut StackWord
        },
        stack_words: stack_size as usize / size_of::<StackWord>(),
        entry_addr,
        vtor: image_addr,
        descriptor,
    })
}

/// Load a flat module image and spawn it as a READY task.
///
/// The task runs on the module's own relocated stack; its seeded frame
/// vectors into the relocated entry with `arg` in R0, and VTOR is
/// switched to the module's vector table whenever the task is
/// dispatched.
pub fn create_task_for_bin_module(
    image: &[u8],
    name: &str,
    arg: *mut (),
    prio: TaskPrio,
) -> Result<TaskHandle> {
    let module = load_bin_module(image)?;

    let _cs = CriticalSection::enter();

    let tcb_ptr = mem::alloc(size_of::<Tcb>() as u32) as *mut Tcb;
    if tcb_ptr.is_null() {
        mem::free(module.ram_base);
        mem::free(module.image_base);
        return Err(Error::NoMemory);
    }

    for i in 0..module.stack_words {
        unsafe { module.stack_base.add(i).write(STACK_SENTINEL) };
    }

    let mut tcb = Tcb::blank();
    tcb.set_name(name);
    tcb.prio = prio.min(config::max_task_priority() - 1);
    tcb.entry_arg = arg;
    tcb.stk_base = module.stack_base;
    tcb.stk_words = module.stack_words;
    tcb.stk_ptr = unsafe {
        port::init_task_stack(
            module.entry_addr,
            arg as usize as u32,
            module_exit_guard as usize as u32,
            module.stack_base,
            module.stack_words,
        )
    };
    tcb.free_stack = (module.stack_words - port::CONTEXT_FRAME_WORDS) as u32;
    tcb.vtor = module.vtor;
    tcb.stack_alloc = module.ram_base;
    tcb.image_alloc = module.image_base;

    let prio = tcb.prio;
    unsafe {
        tcb_ptr.write(tcb);
        let sched_state = SCHED.get_unchecked();
        sched_state.ready.insert_tail(NonNull::new_unchecked(tcb_ptr));
    }

    crate::kinfo!("module task loaded: prio {}", prio);
    sched::preempt_if_higher(prio);

    Ok(TaskHandle(unsafe { NonNull::new_unchecked(tcb_ptr) }))
}

/// Landing pad for a module entry that returns
fn module_exit_guard() {
    crate::kernel::task::delete_self();
}
