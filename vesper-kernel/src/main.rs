//! Kernel binary entry. Everything lives in the library crate; the
//! boot path (`_start` → `boot_stage2` → `kernel_main`) is linked in
//! from there. On non-AArch64 hosts this builds as an empty binary so
//! the workspace compiles for unit tests.

#![cfg_attr(target_arch = "aarch64", no_std, no_main)]

#[cfg(target_arch = "aarch64")]
use vesper_kernel as _;

#[cfg(not(target_arch = "aarch64"))]
fn main() {}
