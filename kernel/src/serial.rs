// Serial Port Driver (Kernel Debug I/O)
//
// Minimal COM1 (0x3F8) output used as the log sink. It is the only output
// path that keeps working inside fatal error handling, so it depends on
// nothing but port I/O and the interrupt lock.
//
// Implementation details:
// - UART is configured for 38400 baud, 8N1, FIFOs enabled
// - The transmit holding register is polled before each byte
// - Newlines are normalized to CRLF for terminal compatibility
//
// Concurrency and safety:
// - `SERIAL1` is an `IrqMutex`: interrupts stay masked while a line is
//   written, and the previous interrupt state is restored afterwards
// - A CPU exception can arrive while this CPU holds `SERIAL1`; fatal output
//   goes through `_print_unblocked`, which never waits for the lock
// - Hosted test builds print to stdout instead of the port

use crate::arch::{inb, outb};
use crate::sync::IrqMutex;
use core::fmt;

const COM1: u16 = 0x3F8;

pub struct SerialPort {
    base: u16,
}

impl SerialPort {
    pub const fn new(base: u16) -> Self {
        SerialPort { base }
    }

    pub fn init(&self) {
        // SAFETY: the COM1 register block belongs to this driver.
        unsafe {
            outb(self.base + 1, 0x00);
            outb(self.base + 3, 0x80);
            outb(self.base, 0x03);
            outb(self.base + 1, 0x00);
            outb(self.base + 3, 0x03);
            outb(self.base + 2, 0xC7);
            outb(self.base + 4, 0x0B);
            outb(self.base + 4, 0x1E);
            outb(self.base, 0xAE);

            if inb(self.base) != 0xAE {
                return;
            }

            outb(self.base + 4, 0x0F);
        }
    }

    fn is_transmit_empty(&self) -> bool {
        // SAFETY: reading the line status register has no side effects.
        unsafe { inb(self.base + 5) & 0x20 != 0 }
    }

    pub fn write_byte(&self, byte: u8) {
        while !self.is_transmit_empty() {
            core::hint::spin_loop();
        }

        // SAFETY: the transmit holding register is empty.
        unsafe { outb(self.base, byte) };
    }

    pub fn write_str(&self, s: &str) {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(byte);
        }
    }
}

impl fmt::Write for SerialPort {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        SerialPort::write_str(self, s);
        Ok(())
    }
}

pub static SERIAL1: IrqMutex<SerialPort> = IrqMutex::new(SerialPort::new(COM1));

pub fn init() {
    SERIAL1.lock().init();
}

#[doc(hidden)]
#[cfg(not(test))]
pub fn _print(args: fmt::Arguments) {
    use core::fmt::Write;

    // The port cannot fail; a formatting error only truncates the line.
    let _ = SERIAL1.lock().write_fmt(args);
}

#[doc(hidden)]
#[cfg(test)]
pub fn _print(args: fmt::Arguments) {
    std::print!("{}", args);
}

/// Run `f` on `shared` if it is free, otherwise on a second handle to COM1.
/// A line written through the second handle may interleave with the one the
/// holder was writing.
pub fn with_unblocked_port<R>(shared: &IrqMutex<SerialPort>, f: impl FnOnce(&mut SerialPort) -> R) -> R {
    match shared.try_lock() {
        Some(mut port) => f(&mut *port),
        None => f(&mut SerialPort::new(COM1)),
    }
}

/// Output path of the fatal and exception handlers.
#[doc(hidden)]
pub fn _print_unblocked(args: fmt::Arguments) {
    use core::fmt::Write;

    with_unblocked_port(&SERIAL1, |port| {
        let _ = port.write_fmt(args);
    });

    #[cfg(test)]
    std::print!("{}", args);
}

#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => ($crate::serial::_print(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($($arg:tt)*) => ($crate::serial_print!("{}\n", format_args!($($arg)*)));
}
