//! QEMU `virt` Memory Map
//!
//! The kernel targets a single platform: QEMU `virt` with
//! `gic-version=2`. The physical map is fixed, so the platform layer is
//! a set of constants rather than a device-tree walk.

/// Start of RAM; also the kernel load address.
pub const RAM_BASE: u64 = 0x4000_0000;

/// RAM size assumed by the boot stage (1 GiB).
pub const RAM_SIZE: u64 = 0x4000_0000;

/// PL011 UART base.
pub const UART_BASE: u64 = 0x0900_0000;

/// GICv2 distributor base.
pub const GICD_BASE: u64 = 0x0800_1000;

/// GICv2 CPU interface base.
pub const GICC_BASE: u64 = 0x0800_2000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distributor_precedes_cpu_interface() {
        assert_eq!(GICC_BASE - GICD_BASE, 0x1000);
    }
}
