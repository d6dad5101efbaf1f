//! # vesper-alloc
//!
//! Allocator logic for the Vesper kernel:
//! - [`heap`]: the fixed-block kernel heap (4 KiB blocks, first-fit)
//! - [`frame`]: the physical page frame allocator (bitmap + info bytes)
//!
//! Both allocators manage *metadata only* and operate over storage
//! borrowed from the caller, so the same code runs against real kernel
//! memory on the target and against plain arrays in host tests. Zeroing
//! and placement of the managed memory are the kernel's concern.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod frame;
pub mod heap;

pub use frame::{FrameAllocator, PageFlags};
pub use heap::BlockHeap;
