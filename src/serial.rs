//! 16550 UART serial port, used for boot diagnostics and `log` output.
//!
//! Kept separate from the VGA-style [`console`](crate::console) framebuffer
//! that backs the `print` syscall: serial output is for kernel developers,
//! the console cells are what the user sees.

use core::fmt;

use spin::Mutex;
use uart_16550::SerialPort;

use crate::arch::x86::without_interrupts;

const COM1: u16 = 0x3F8;

lazy_static::lazy_static! {
    pub static ref SERIAL1: Mutex<SerialPort> = {
        // SAFETY: COM1 is the standard first serial port; no other code
        // touches this port range.
        let mut port = unsafe { SerialPort::new(COM1) };
        port.init();
        Mutex::new(port)
    };
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use core::fmt::Write;
    without_interrupts(|| {
        SERIAL1
            .lock()
            .write_fmt(args)
            .expect("serial write should never fail");
    });
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
