//! PL011 Console
//!
//! A chromeless, line-oriented byte sink over the PL011 UART. `\n` is
//! expanded to CRLF; no escape handling. The console must work before
//! anything else is up (boot banner, panic path), so it does raw MMIO
//! with busy-wait on the TX FIFO and nothing more.

use core::fmt::{self, Write};

use spin::mutex::SpinMutex;

/// PL011 register offsets and flags used by the sink.
mod pl011 {
    /// Data register offset.
    pub const DR: u64 = 0x00;
    /// Flag register offset.
    pub const FR: u64 = 0x18;
    /// Flag: transmit FIFO full.
    pub const FR_TXFF: u32 = 1 << 5;
}

struct Console {
    base: u64,
}

impl Console {
    const fn new() -> Self {
        Self { base: 0 }
    }

    fn putc(&self, c: u8) {
        if self.base == 0 {
            return;
        }

        // SAFETY: `base` is the PL011 MMIO region on QEMU virt; reads of
        // FR and writes of DR are side-effect-free beyond the UART.
        unsafe {
            let fr = (self.base + pl011::FR) as *const u32;
            while core::ptr::read_volatile(fr) & pl011::FR_TXFF != 0 {
                core::hint::spin_loop();
            }
            core::ptr::write_volatile((self.base + pl011::DR) as *mut u32, c as u32);
        }
    }

    fn puts(&self, s: &str) {
        for c in s.bytes() {
            if c == b'\n' {
                self.putc(b'\r');
            }
            self.putc(c);
        }
    }
}

impl Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.puts(s);
        Ok(())
    }
}

static CONSOLE: SpinMutex<Console> = SpinMutex::new(Console::new());

/// Initialise the console at the given UART base address.
pub fn init(base: u64) {
    CONSOLE.lock().base = base;
}

/// Write one byte.
pub fn putc(c: u8) {
    CONSOLE.lock().putc(c);
}

/// Write a string, translating `\n` to CRLF.
pub fn puts(s: &str) {
    CONSOLE.lock().puts(s);
}

/// `fmt::Write` adapter for the print macros.
pub struct ConsoleWriter;

impl Write for ConsoleWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        puts(s);
        Ok(())
    }
}

/// Print formatted output to the console.
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {{
        use core::fmt::Write;
        let _ = write!($crate::console::ConsoleWriter, $($arg)*);
    }};
}

/// Print formatted output with a trailing newline.
#[macro_export]
macro_rules! println {
    () => {
        $crate::console::puts("\n")
    };
    ($($arg:tt)*) => {{
        use core::fmt::Write;
        let _ = write!($crate::console::ConsoleWriter, $($arg)*);
        $crate::console::puts("\n");
    }};
}
