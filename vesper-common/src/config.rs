//! Kernel Configuration
//!
//! Compile-time configuration constants shared across the workspace.

/// Size of a physical page frame in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Size of one kernel heap block in bytes.
pub const HEAP_BLOCK_SIZE: usize = 4096;

/// Maximum number of page frames managed by the frame allocator
/// (4M frames covers 16 GiB of RAM).
pub const MAX_PAGES: usize = 4 * 1024 * 1024;

/// Minimum kernel heap size.
pub const MIN_HEAP_SIZE: usize = 4 * 1024 * 1024;

/// Maximum kernel heap size.
pub const MAX_HEAP_SIZE: usize = 256 * 1024 * 1024;

/// Fraction of RAM given to the kernel heap (one fifth).
pub const HEAP_RAM_DIVISOR: usize = 5;

/// Maximum number of live processes.
pub const MAX_PROCESSES: usize = 64;

/// Maximum process name length in bytes.
pub const MAX_PROCESS_NAME: usize = 64;

/// Per-process heap allocation slots.
pub const MAX_PROCESS_ALLOCATIONS: usize = 128;

/// Per-process stack size (128 KiB, SP_EL0 for user processes).
pub const PROCESS_STACK_SIZE: usize = 128 * 1024;

/// Maximum number of tasks in the task arena. One task per process.
pub const MAX_TASKS: usize = MAX_PROCESSES;

/// Scheduler tick interval in milliseconds.
pub const SCHEDULER_TICK_MS: u32 = 10;

/// GIC interrupt ID of the EL1 physical timer (PPI).
pub const TIMER_IRQ: u32 = 30;

/// Counter frequency programmed into CNTFRQ_EL0 when firmware left it zero.
pub const TIMER_FALLBACK_FREQ_HZ: u64 = 1_000_000_000;

/// Number of GIC interrupt IDs with registrable handlers.
pub const MAX_INTERRUPT_HANDLERS: usize = 128;

/// RAM size assumed when the boot info record fails validation.
pub const DEGRADED_RAM_SIZE: u64 = 128 * 1024 * 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_clamp_bounds_are_block_aligned() {
        assert_eq!(MIN_HEAP_SIZE % HEAP_BLOCK_SIZE, 0);
        assert_eq!(MAX_HEAP_SIZE % HEAP_BLOCK_SIZE, 0);
        assert!(MIN_HEAP_SIZE < MAX_HEAP_SIZE);
    }

    #[test]
    fn stack_size_is_page_aligned() {
        assert_eq!(PROCESS_STACK_SIZE % PAGE_SIZE, 0);
    }
}
