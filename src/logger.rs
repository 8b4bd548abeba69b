//! # Serial Console and Logger
//!
//! COM1 carries everything the kernel has to say. Two paths lead there:
//!
//! - `println!` for raw console text (boot banner, partition report)
//! - the `log` facade, backed by [`SerialLogger`], for everything else
//!
//! Both take the port lock with interrupts masked. A handler that logs while
//! boot code holds the lock would otherwise spin forever.

use core::fmt::{self, Write};

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::Mutex;
use uart_16550::SerialPort;

use crate::arch;
use crate::syscalls::Console;

pub static SERIAL: Mutex<SerialPort> = Mutex::new(unsafe { SerialPort::new(0x3F8) });

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {{
        $crate::logger::_print(format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! println {
    () => {
        $crate::print!("\n")
    };
    ($($arg:tt)*) => {{
        $crate::logger::_print(format_args!("{}\n", format_args!($($arg)*)));
    }};
}

#[doc(hidden)]
#[cfg(target_os = "none")]
pub fn _print(args: fmt::Arguments) {
    arch::without_interrupts(|| {
        let mut serial = SERIAL.lock();
        let _ = serial.write_fmt(args);
    });
}

/// Host builds have no UART to poke; test output goes to stdout instead.
#[doc(hidden)]
#[cfg(not(target_os = "none"))]
pub fn _print(_args: fmt::Arguments) {
    #[cfg(test)]
    std::print!("{}", _args);
}

pub struct SerialLogger;

static LOGGER: SerialLogger = SerialLogger;

impl Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        arch::without_interrupts(|| {
            let mut serial = SERIAL.lock();
            let _ = writeln!(
                serial,
                "[{:<5}] {}: {}",
                record.level(),
                record.target(),
                record.args()
            );
        });
    }

    fn flush(&self) {}
}

/// Brings up COM1 and installs the logger. Call once, first thing at boot.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    SERIAL.lock().init();
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}

/// Console sink for the `Write` syscall.
pub struct SerialConsole;

impl Console for SerialConsole {
    fn write_str(&mut self, text: &str) {
        #[cfg(target_os = "none")]
        arch::without_interrupts(|| {
            let _ = SERIAL.lock().write_str(text);
        });
        #[cfg(not(target_os = "none"))]
        let _ = text;
    }
}
