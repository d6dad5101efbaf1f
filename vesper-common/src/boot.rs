//! Boot Handoff Protocol
//!
//! Defines the record the boot stage hands to `kernel_main`.

/// Magic number for boot info validation: "BOOT" in hex.
pub const BOOT_INFO_MAGIC: u64 = 0x424F_4F54;

/// Boot information passed from the boot stage to the kernel.
///
/// The layout is fixed (little-endian, 8-byte fields) so the record can
/// be assembled by early boot code and consumed exactly once by
/// `kernel_main`. If `magic` does not validate, the kernel must not
/// trust any other field.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct BootInfo {
    /// Magic number, must equal [`BOOT_INFO_MAGIC`].
    pub magic: u64,
    /// Architecture identifier (opaque to the kernel).
    pub architecture: u64,
    /// Total RAM size in bytes.
    pub ram_size: u64,
    /// Size of the kernel image in bytes.
    pub kernel_size: u64,
}

impl BootInfo {
    /// An all-zero record, filled in by the boot stage.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            magic: 0,
            architecture: 0,
            ram_size: 0,
            kernel_size: 0,
        }
    }

    /// Check the magic number.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.magic == BOOT_INFO_MAGIC
    }
}

// The boot stage assembles this record in `.data`; keep the field offsets
// pinned to the handoff protocol.
const _: () = {
    assert!(core::mem::offset_of!(BootInfo, magic) == 0);
    assert!(core::mem::offset_of!(BootInfo, architecture) == 8);
    assert!(core::mem::offset_of!(BootInfo, ram_size) == 16);
    assert!(core::mem::offset_of!(BootInfo, kernel_size) == 24);
    assert!(core::mem::size_of::<BootInfo>() == 32);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_spells_boot() {
        assert_eq!(BOOT_INFO_MAGIC.to_be_bytes()[4..], *b"BOOT");
    }

    #[test]
    fn empty_record_does_not_validate() {
        assert!(!BootInfo::empty().is_valid());
    }

    #[test]
    fn valid_record_validates() {
        let mut info = BootInfo::empty();
        info.magic = BOOT_INFO_MAGIC;
        info.ram_size = 1024 * 1024 * 1024;
        assert!(info.is_valid());
    }
}
