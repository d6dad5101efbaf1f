//! Kernel Memory Bring-up
//!
//! Wires the pure allocators from `vesper-alloc` to real memory:
//!
//! 1. **Kernel heap** — one fifth of RAM (clamped to 4 MiB..256 MiB),
//!    its block table placed at the first 4 KiB boundary after the
//!    kernel image and the heap region after the table.
//! 2. **Page frame allocator** — bitmap and info array allocated from
//!    the kernel heap, covering all of RAM, with the kernel image, the
//!    heap and the allocator's own metadata reserved.
//!
//! Both live behind interrupt-safe locks; allocation failure is `None`
//! or a `Status`, never a panic.

use vesper_alloc::{BlockHeap, FrameAllocator, PageFlags};
use vesper_arch::IrqSpinMutex;
use vesper_common::config::{
    HEAP_BLOCK_SIZE, HEAP_RAM_DIVISOR, MAX_HEAP_SIZE, MAX_PAGES, MIN_HEAP_SIZE, PAGE_SIZE,
};
use vesper_common::{KernelResult, Status};
use vesper_pal::platform;

static KHEAP: IrqSpinMutex<Option<BlockHeap<'static>>> = IrqSpinMutex::new(None);
static FRAMES: IrqSpinMutex<Option<FrameAllocator<'static>>> = IrqSpinMutex::new(None);

const fn align_up(value: u64, align: u64) -> u64 {
    (value + align - 1) & !(align - 1)
}

/// Bring up the kernel heap and the page frame allocator.
///
/// # Safety
/// Must be called exactly once, before any allocation. `kernel_end`
/// must be the end of everything the image occupies; the region from
/// there to the end of RAM must be otherwise unused.
pub unsafe fn init(ram_size: u64, kernel_start: u64, kernel_end: u64) -> KernelResult<()> {
    let (heap_table, heap_start, heap_size) = unsafe { kheap_init(ram_size, kernel_end)? };
    unsafe {
        page_init(
            ram_size,
            kernel_start,
            kernel_end,
            heap_table,
            heap_start + heap_size as u64,
        )?;
    }
    Ok(())
}

/// Place and initialise the kernel heap. Returns the block table
/// address, the heap region start and its size.
unsafe fn kheap_init(ram_size: u64, kernel_end: u64) -> KernelResult<(u64, u64, usize)> {
    let target = ((ram_size as usize / HEAP_RAM_DIVISOR).clamp(MIN_HEAP_SIZE, MAX_HEAP_SIZE)
        / HEAP_BLOCK_SIZE)
        * HEAP_BLOCK_SIZE;
    let entries = target / HEAP_BLOCK_SIZE;

    let table_addr = align_up(kernel_end, PAGE_SIZE as u64);
    let heap_start = align_up(table_addr + entries as u64, PAGE_SIZE as u64);

    if heap_start + target as u64 > platform::RAM_BASE + ram_size {
        return Err(Status::NoMem);
    }

    // SAFETY: the table region sits after the kernel image and before
    // the heap region; nothing else uses it (caller contract).
    let table = unsafe { core::slice::from_raw_parts_mut(table_addr as *mut u8, entries) };
    let heap = BlockHeap::new(heap_start, table)?;

    log::info!(
        "Kernel heap: {} KB at {:#x} (block table at {:#x})",
        target / 1024,
        heap_start,
        table_addr
    );

    *KHEAP.lock() = Some(heap);
    Ok((table_addr, heap_start, target))
}

/// Initialise the frame allocator over all of RAM and reserve what the
/// kernel already occupies.
unsafe fn page_init(
    ram_size: u64,
    kernel_start: u64,
    kernel_end: u64,
    heap_table: u64,
    heap_end: u64,
) -> KernelResult<()> {
    let total = ((ram_size as usize) / PAGE_SIZE).min(MAX_PAGES);
    let bitmap_bytes = total.div_ceil(64) * 8;

    let bitmap_addr = kmalloc(bitmap_bytes).ok_or(Status::NoMem)?;
    let Some(info_addr) = kmalloc(total) else {
        kfree(bitmap_addr);
        return Err(Status::NoMem);
    };

    // SAFETY: both buffers were just allocated from the kernel heap
    // with at least the required sizes.
    let bitmap =
        unsafe { core::slice::from_raw_parts_mut(bitmap_addr as *mut u64, bitmap_bytes / 8) };
    let info = unsafe { core::slice::from_raw_parts_mut(info_addr as *mut u8, total) };

    let mut frames = FrameAllocator::new(platform::RAM_BASE, total, bitmap, info)?;

    // The first 64 frames stay reserved for the kernel image and
    // critical structures, then everything the image and the heap
    // actually cover, then the allocator's own metadata.
    for index in 0..64 {
        frames.reserve(index);
    }
    frames.reserve_range(kernel_start, (kernel_end - kernel_start) as usize);
    frames.reserve_range(heap_table, (heap_end - heap_table) as usize);
    frames.reserve_range(bitmap_addr, bitmap_bytes);
    frames.reserve_range(info_addr, total);

    log::info!(
        "Page allocator: {} frames, {} free after reservations",
        frames.total_frames(),
        frames.free_frames()
    );

    *FRAMES.lock() = Some(frames);

    // Smoke-test the allocator before anything depends on it.
    match page_alloc(PageFlags::ZEROED) {
        Some(page) => {
            page_free(page)?;
            log::debug!("Page allocator self-test passed ({:#x})", page);
        }
        None => {
            log::warn!("Page allocator self-test failed: no frame available");
        }
    }

    Ok(())
}

/// Allocate kernel heap memory. Returns the address or `None`.
#[must_use]
pub fn kmalloc(size: usize) -> Option<u64> {
    KHEAP.lock().as_mut()?.alloc(size)
}

/// Allocate kernel heap memory and zero it.
#[must_use]
pub fn kzalloc(size: usize) -> Option<u64> {
    let addr = kmalloc(size)?;
    // SAFETY: the heap hands out block-granular memory of at least
    // `size` bytes.
    unsafe {
        core::ptr::write_bytes(addr as *mut u8, 0, size);
    }
    Some(addr)
}

/// Free kernel heap memory. Tolerates double-frees; ignores addresses
/// the heap does not own.
pub fn kfree(addr: u64) {
    if let Some(heap) = KHEAP.lock().as_mut() {
        heap.free(addr);
    }
}

/// Allocate one page frame, honouring `PageFlags::ZEROED`.
#[must_use]
pub fn page_alloc(flags: PageFlags) -> Option<u64> {
    let addr = FRAMES.lock().as_mut()?.alloc(flags)?;
    if flags.zeroed {
        // SAFETY: the frame was just allocated and is backed by RAM.
        unsafe {
            core::ptr::write_bytes(addr as *mut u8, 0, PAGE_SIZE);
        }
    }
    Some(addr)
}

/// Allocate `count` contiguous page frames.
#[must_use]
pub fn page_alloc_contiguous(count: usize, flags: PageFlags) -> Option<u64> {
    let addr = FRAMES.lock().as_mut()?.alloc_contiguous(count, flags)?;
    if flags.zeroed {
        // SAFETY: the frames were just allocated and are backed by RAM.
        unsafe {
            core::ptr::write_bytes(addr as *mut u8, 0, count * PAGE_SIZE);
        }
    }
    Some(addr)
}

/// Free one page frame. Freeing a free frame is `Status::InvArg`.
pub fn page_free(addr: u64) -> KernelResult<()> {
    FRAMES.lock().as_mut().ok_or(Status::NotReady)?.free(addr)
}

/// Free `count` contiguous page frames.
pub fn page_free_contiguous(addr: u64, count: usize) -> KernelResult<()> {
    FRAMES
        .lock()
        .as_mut()
        .ok_or(Status::NotReady)?
        .free_contiguous(addr, count)
}

/// (free, total) page frame counts.
#[must_use]
pub fn page_stats() -> (usize, usize) {
    match FRAMES.lock().as_ref() {
        Some(f) => (f.free_frames(), f.total_frames()),
        None => (0, 0),
    }
}
