//! COM1 output and the `log` backend.

use core::fmt::Write;

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use pmode::hal;
use spin::{Lazy, Mutex};
use uart_16550::SerialPort;

use crate::cpu::HardwareCpu;

const COM1: u16 = 0x3F8;

pub static SERIAL1: Lazy<Mutex<SerialPort>> = Lazy::new(|| {
    // SAFETY: COM1 is a standard 16550 and nothing else drives it.
    let mut port = unsafe { SerialPort::new(COM1) };
    port.init();
    Mutex::new(port)
});

#[doc(hidden)]
pub fn _print(args: core::fmt::Arguments) {
    // SAFETY: the kernel runs at ring 0.
    let mut cpu = unsafe { HardwareCpu::new() };
    // An interrupt handler that logs would spin on the held lock.
    hal::without_interrupts(&mut cpu, |_| {
        let _ = SERIAL1.lock().write_fmt(args);
    });
}

/// Print to COM1.
#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => {
        $crate::serial::_print(format_args!($($arg)*))
    };
}

/// Print to COM1, with a newline.
#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($fmt:expr) => ($crate::serial_print!(concat!($fmt, "\n")));
    ($fmt:expr, $($arg:tt)*) => ($crate::serial_print!(concat!($fmt, "\n"), $($arg)*));
}

struct SerialLogger;

impl Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            serial_println!("[{:<5}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: SerialLogger = SerialLogger;

/// Route `log` records to COM1.
pub fn init_logger(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}
