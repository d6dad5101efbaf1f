//! System Register Access and Decoding
//!
//! Thin wrappers over the registers the kernel reads on exception paths,
//! plus pure decoding helpers for ESR_EL1 and SPSR_EL1.

use aarch64_cpu::registers::{ELR_EL1, ESR_EL1, FAR_EL1, SP_EL0, SPSR_EL1, VBAR_EL1};
use tock_registers::interfaces::{Readable, Writeable};

/// Read VBAR_EL1.
#[must_use]
#[inline]
pub fn read_vbar_el1() -> u64 {
    VBAR_EL1.get()
}

/// Write VBAR_EL1. The address must point at a 2 KiB-aligned vector table.
#[inline]
pub fn write_vbar_el1(value: u64) {
    VBAR_EL1.set(value);
}

/// Read ESR_EL1 (Exception Syndrome Register).
#[must_use]
#[inline]
pub fn read_esr_el1() -> u64 {
    ESR_EL1.get()
}

/// Read ELR_EL1 (Exception Link Register).
#[must_use]
#[inline]
pub fn read_elr_el1() -> u64 {
    ELR_EL1.get()
}

/// Read FAR_EL1 (Fault Address Register).
#[must_use]
#[inline]
pub fn read_far_el1() -> u64 {
    FAR_EL1.get()
}

/// Read SPSR_EL1.
#[must_use]
#[inline]
pub fn read_spsr_el1() -> u64 {
    SPSR_EL1.get()
}

/// Read SP_EL0.
#[must_use]
#[inline]
pub fn read_sp_el0() -> u64 {
    SP_EL0.get()
}

/// Write SP_EL0.
#[inline]
pub fn write_sp_el0(value: u64) {
    SP_EL0.set(value);
}

/// Exception Syndrome Register parsing.
pub mod esr {
    /// Exception class, ESR[31:26].
    #[inline]
    #[must_use]
    pub const fn exception_class(esr: u64) -> u8 {
        ((esr >> 26) & 0x3F) as u8
    }

    /// Instruction Specific Syndrome, ESR[24:0].
    #[inline]
    #[must_use]
    pub const fn iss(esr: u64) -> u32 {
        (esr & 0x1FF_FFFF) as u32
    }

    /// Exception class values the kernel distinguishes.
    pub mod ec {
        pub const UNKNOWN: u8 = 0b000000;
        pub const WFI_WFE: u8 = 0b000001;
        pub const SVE_SIMD_FP: u8 = 0b000111;
        pub const ILLEGAL_EXECUTION: u8 = 0b001110;
        pub const SVC_AARCH64: u8 = 0b010101;
        pub const INSTRUCTION_ABORT_LOWER: u8 = 0b100000;
        pub const INSTRUCTION_ABORT_SAME: u8 = 0b100001;
        pub const PC_ALIGNMENT: u8 = 0b100010;
        pub const DATA_ABORT_LOWER: u8 = 0b100100;
        pub const DATA_ABORT_SAME: u8 = 0b100101;
        pub const SP_ALIGNMENT: u8 = 0b100110;
        pub const FP_EXCEPTION: u8 = 0b101100;
        pub const SERROR: u8 = 0b101111;
        pub const BRK_AARCH64: u8 = 0b111100;
    }

    /// Human-readable name of an exception class.
    #[must_use]
    pub fn ec_name(class: u8) -> &'static str {
        match class {
            ec::UNKNOWN => "Unknown",
            ec::WFI_WFE => "WFI/WFE trapped",
            ec::SVE_SIMD_FP => "SVE/SIMD/FP access",
            ec::ILLEGAL_EXECUTION => "Illegal execution state",
            ec::SVC_AARCH64 => "SVC (AArch64)",
            ec::INSTRUCTION_ABORT_LOWER => "Instruction abort (lower EL)",
            ec::INSTRUCTION_ABORT_SAME => "Instruction abort (same EL)",
            ec::PC_ALIGNMENT => "PC alignment fault",
            ec::DATA_ABORT_LOWER => "Data abort (lower EL)",
            ec::DATA_ABORT_SAME => "Data abort (same EL)",
            ec::SP_ALIGNMENT => "SP alignment fault",
            ec::FP_EXCEPTION => "FP exception",
            ec::SERROR => "SError",
            ec::BRK_AARCH64 => "BRK (AArch64)",
            _ => "Reserved/Unknown",
        }
    }
}

/// Saved Program Status Register parsing.
pub mod spsr {
    /// EL1h mode word used for kernel tasks: EL1 with SP_EL1,
    /// Debug and SError masked, IRQ/FIQ unmasked.
    pub const MODE_EL1H: u64 = 0x305;

    /// EL0t mode word used for user tasks: everything unmasked.
    pub const MODE_EL0T: u64 = 0x0;

    /// Mode field M[3:0].
    #[inline]
    #[must_use]
    pub const fn mode(spsr: u64) -> u8 {
        (spsr & 0xF) as u8
    }

    /// Exception level from M[3:2].
    #[inline]
    #[must_use]
    pub const fn exception_level(spsr: u64) -> u8 {
        ((spsr >> 2) & 0x3) as u8
    }

    /// Stack selection from M[0]: true = SP_ELx, false = SP_EL0.
    #[inline]
    #[must_use]
    pub const fn sp_sel(spsr: u64) -> bool {
        spsr & 1 != 0
    }

    /// True if the saved state targets EL0 with SP_EL0.
    #[inline]
    #[must_use]
    pub const fn is_el0t(spsr: u64) -> bool {
        mode(spsr) == 0
    }

    /// Execution state from M[4]: true = AArch32.
    #[inline]
    #[must_use]
    pub const fn is_aarch32(spsr: u64) -> bool {
        (spsr >> 4) & 1 != 0
    }

    /// Mode name such as "EL0t" or "EL1h".
    #[must_use]
    pub fn mode_name(spsr: u64) -> &'static str {
        if is_aarch32(spsr) {
            return "AArch32";
        }
        match (exception_level(spsr), sp_sel(spsr)) {
            (0, _) => "EL0t",
            (1, false) => "EL1t",
            (1, true) => "EL1h",
            (2, false) => "EL2t",
            (2, true) => "EL2h",
            (3, false) => "EL3t",
            (3, true) => "EL3h",
            _ => "Unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exception_class_extraction() {
        // SVC #0 from AArch64: EC = 0x15, IL = 1, ISS = 0.
        let esr = (0x15u64 << 26) | (1 << 25);
        assert_eq!(esr::exception_class(esr), esr::ec::SVC_AARCH64);
        assert_eq!(esr::iss(esr), 0);
        assert_eq!(esr::ec_name(esr::exception_class(esr)), "SVC (AArch64)");
    }

    #[test]
    fn mode_words_decode() {
        assert_eq!(spsr::mode(spsr::MODE_EL1H), 0b0101);
        assert_eq!(spsr::mode_name(spsr::MODE_EL1H), "EL1h");
        assert!(!spsr::is_el0t(spsr::MODE_EL1H));

        assert_eq!(spsr::mode(spsr::MODE_EL0T), 0);
        assert_eq!(spsr::mode_name(spsr::MODE_EL0T), "EL0t");
        assert!(spsr::is_el0t(spsr::MODE_EL0T));
    }

    #[test]
    fn el1h_mode_word_masks_debug_and_serror_only() {
        // 0x305: D and A set, I and F clear.
        assert_ne!(spsr::MODE_EL1H & (1 << 9), 0);
        assert_ne!(spsr::MODE_EL1H & (1 << 8), 0);
        assert_eq!(spsr::MODE_EL1H & (1 << 7), 0);
        assert_eq!(spsr::MODE_EL1H & (1 << 6), 0);
    }
}
