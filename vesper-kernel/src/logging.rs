//! Kernel Logging
//!
//! `log` facade over the console sink. Messages are formatted into a
//! fixed stack buffer — no allocation, no locks beyond the console's —
//! and stamped with the scheduler-tick uptime.

use core::fmt::Write;

use log::{Level, LevelFilter, Log, Metadata, Record};
use vesper_pal::{console, timer};

/// Stack buffer for one formatted log line.
const MESSAGE_CAPACITY: usize = 256;

struct MessageBuffer {
    data: [u8; MESSAGE_CAPACITY],
    len: usize,
}

impl MessageBuffer {
    const fn new() -> Self {
        Self {
            data: [0; MESSAGE_CAPACITY],
            len: 0,
        }
    }

    fn as_str(&self) -> &str {
        core::str::from_utf8(&self.data[..self.len]).unwrap_or("<invalid>")
    }
}

impl Write for MessageBuffer {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let bytes = s.as_bytes();
        let to_copy = bytes.len().min(MESSAGE_CAPACITY - self.len);
        self.data[self.len..self.len + to_copy].copy_from_slice(&bytes[..to_copy]);
        self.len += to_copy;
        Ok(())
    }
}

struct KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let ms = timer::uptime_ms();
        let level = match record.level() {
            Level::Error => "ERROR",
            Level::Warn => " WARN",
            Level::Info => " INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        };

        let mut line = MessageBuffer::new();
        let _ = writeln!(
            line,
            "[{:>4}.{:03}] {} {}: {}",
            ms / 1000,
            ms % 1000,
            level,
            record.target(),
            record.args()
        );
        console::puts(line.as_str());
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger;

/// Install the kernel logger at Info level.
pub fn init() {
    log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(LevelFilter::Info))
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_buffer_truncates_at_capacity() {
        let mut buf = MessageBuffer::new();
        let chunk = [b'a'; 100];
        let chunk = core::str::from_utf8(&chunk).unwrap();
        for _ in 0..4 {
            let _ = buf.write_str(chunk);
        }
        assert_eq!(buf.len, MESSAGE_CAPACITY);
        assert_eq!(buf.as_str().len(), MESSAGE_CAPACITY);
    }
}
