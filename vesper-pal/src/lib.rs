//! # vesper-pal
//!
//! Platform abstraction for the QEMU `virt` machine:
//! - [`platform`]: the fixed physical memory map
//! - [`console`]: PL011 UART console byte sink
//! - [`gic`]: GICv2 interrupt controller driver and handler table
//! - [`timer`]: ARM generic timer (EL1 physical timer)

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod console;
pub mod gic;
pub mod platform;
pub mod timer;
