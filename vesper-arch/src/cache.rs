//! Cache Maintenance
//!
//! AArch64 data/instruction cache operations. The one operation the
//! kernel needs is [`sync_code_range`]: after copying executable code
//! into memory, the new bytes must be cleaned out of the data cache and
//! the corresponding instruction cache lines invalidated before the CPU
//! may fetch them.

#[cfg(target_arch = "aarch64")]
use core::arch::asm;
use core::sync::atomic::{AtomicUsize, Ordering};

/// Cached data cache minimum line size; 0 = not yet read.
static CACHE_LINE_SIZE: AtomicUsize = AtomicUsize::new(0);

/// Data cache minimum line size in bytes, from CTR_EL0.DminLine.
#[inline]
#[must_use]
pub fn cache_line_size() -> usize {
    let cached = CACHE_LINE_SIZE.load(Ordering::Relaxed);
    if cached != 0 {
        return cached;
    }

    #[cfg(target_arch = "aarch64")]
    let line = {
        let ctr: u64;
        // SAFETY: CTR_EL0 is readable at EL1 with no side effects.
        unsafe {
            asm!("mrs {}, ctr_el0", out(reg) ctr, options(nomem, nostack, preserves_flags));
        }
        // DminLine = log2(words per line), word = 4 bytes.
        4usize << ((ctr >> 16) & 0xF)
    };
    #[cfg(not(target_arch = "aarch64"))]
    let line = 64;

    CACHE_LINE_SIZE.store(line, Ordering::Relaxed);
    line
}

/// Make freshly written code in `[addr, addr + size)` executable.
///
/// Walks the range in cache line strides: `DC CIVAC` over every line,
/// `DSB ISH` to complete the cleans, `IC IVAU` over every line, then
/// `ISB` so subsequent fetches see the new instructions.
pub fn sync_code_range(addr: u64, size: usize) {
    if size == 0 {
        return;
    }

    let line = cache_line_size() as u64;
    let start = addr & !(line - 1);
    let end = (addr + size as u64 + line - 1) & !(line - 1);

    #[cfg(target_arch = "aarch64")]
    {
        let mut cur = start;
        while cur < end {
            // SAFETY: DC CIVAC on a valid address only affects caching.
            unsafe {
                asm!("dc civac, {}", in(reg) cur, options(nostack));
            }
            cur += line;
        }

        // SAFETY: barriers order the cleans against the invalidates.
        unsafe {
            asm!("dsb ish", options(nostack));
        }

        let mut cur = start;
        while cur < end {
            // SAFETY: IC IVAU on a valid address only affects caching.
            unsafe {
                asm!("ic ivau, {}", in(reg) cur, options(nostack));
            }
            cur += line;
        }

        // SAFETY: barriers order the invalidates against later fetches.
        unsafe {
            asm!("dsb ish", options(nostack));
            asm!("isb", options(nostack));
        }
    }
    #[cfg(not(target_arch = "aarch64"))]
    let _ = (start, end);
}
