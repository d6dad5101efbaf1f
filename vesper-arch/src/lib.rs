//! # vesper-arch
//!
//! AArch64 architecture support for the Vesper kernel:
//! - [`cpu`]: CPU control (halt, barriers, interrupt masking)
//! - [`registers`]: system register access and ESR/SPSR decoding
//! - [`cache`]: data/instruction cache maintenance
//! - [`exceptions`]: exception vector table, entry stubs and the
//!   interrupt frame shared with the high-level handlers
//! - [`sync`]: interrupt-safe spinlock
//!
//! # Safety
//!
//! This crate contains extensive `unsafe` code for hardware access. All
//! unsafe operations carry `// SAFETY:` comments naming the invariants.
//! Code that only exists on the target is gated on
//! `target_arch = "aarch64"`; the pure parts (frame layout, register
//! field decoding, the spinlock) build and test on the host.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod cache;
pub mod cpu;
pub mod exceptions;
pub mod registers;
pub mod sync;

pub use cpu::halt;
pub use exceptions::InterruptFrame;
pub use sync::IrqSpinMutex;
