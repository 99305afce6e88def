//! VGA-style console framebuffer backing the `print`, `set_term_color`,
//! `set_cursor_pos`, and `get_cursor_pos` system calls (spec §4.9/§6).
//! Writes are serialized behind [`CONSOLE`]'s spinlock so one process's
//! output can never interleave with another's.

pub mod keyboard;

use core::fmt;

use spin::Mutex;

use crate::arch::x86::port;
use crate::error::{KernelError, KernelResult};

pub const CONSOLE_WIDTH: usize = 80;
pub const CONSOLE_HEIGHT: usize = 25;

const VGA_BUFFER_ADDR: usize = 0xb_8000;

/// Foreground/background color nibble pair, the VGA text-mode attribute
/// byte's own encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ColorCode(u8);

impl ColorCode {
    const MAX: u8 = 15;
    const DEFAULT: ColorCode = ColorCode(0x07);

    fn new(foreground: u8, background: u8) -> KernelResult<Self> {
        if foreground > Self::MAX || background > Self::MAX {
            return Err(KernelError::InvalidArgument {
                name: "color",
                value: "foreground/background must be in 0..=15",
            });
        }
        Ok(Self(background << 4 | foreground))
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
struct ScreenChar {
    ascii: u8,
    color: u8,
}

struct Writer {
    row: usize,
    col: usize,
    color: ColorCode,
}

impl Writer {
    fn cell(&self, row: usize, col: usize) -> *mut ScreenChar {
        // SAFETY: every caller in this module keeps row < CONSOLE_HEIGHT
        // and col < CONSOLE_WIDTH, and the VGA buffer is mapped for the
        // kernel's entire lifetime.
        unsafe { (VGA_BUFFER_ADDR as *mut ScreenChar).add(row * CONSOLE_WIDTH + col) }
    }

    fn write_byte(&mut self, byte: u8) {
        if byte == b'\n' {
            self.new_line();
            update_hw_cursor(self.row, self.col);
            return;
        }
        if self.col >= CONSOLE_WIDTH {
            self.new_line();
        }
        let cell = self.cell(self.row, self.col);
        // SAFETY: `cell` was computed from the current, in-bounds
        // row/col.
        unsafe {
            cell.write_volatile(ScreenChar { ascii: byte, color: self.color.0 });
        }
        self.col += 1;
        update_hw_cursor(self.row, self.col);
    }

    fn new_line(&mut self) {
        self.col = 0;
        if self.row + 1 < CONSOLE_HEIGHT {
            self.row += 1;
        } else {
            self.scroll_up();
        }
    }

    /// Shift every row up by one and blank-fill the last row, per the
    /// console component's scroll-up contract.
    fn scroll_up(&mut self) {
        for row in 1..CONSOLE_HEIGHT {
            for col in 0..CONSOLE_WIDTH {
                // SAFETY: both cells are within the mapped VGA buffer.
                unsafe {
                    let moved = self.cell(row, col).read_volatile();
                    self.cell(row - 1, col).write_volatile(moved);
                }
            }
        }
        let blank = ScreenChar { ascii: b' ', color: self.color.0 };
        for col in 0..CONSOLE_WIDTH {
            // SAFETY: within the mapped VGA buffer.
            unsafe {
                self.cell(CONSOLE_HEIGHT - 1, col).write_volatile(blank);
            }
        }
    }
}

impl fmt::Write for Writer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            match byte {
                0x20..=0x7e | b'\n' => self.write_byte(byte),
                _ => self.write_byte(0xfe),
            }
        }
        Ok(())
    }
}

static CONSOLE: Mutex<Writer> = Mutex::new(Writer {
    row: 0,
    col: 0,
    color: ColorCode::DEFAULT,
});

/// Move the hardware text-mode cursor via the CRTC index/data ports.
/// Writing outside the cell grid is unreachable: every caller of
/// `write_byte`/`set_cursor_pos` keeps row/col in bounds first.
fn update_hw_cursor(row: usize, col: usize) {
    let pos = (row * CONSOLE_WIDTH + col) as u16;
    // SAFETY: 0x3D4/0x3D5 are the standard CRTC index/data ports; this is
    // the documented two-register sequence for moving the cursor.
    unsafe {
        port::outb(0x3D4, 0x0F);
        port::outb(0x3D5, (pos & 0xFF) as u8);
        port::outb(0x3D4, 0x0E);
        port::outb(0x3D5, (pos >> 8) as u8);
    }
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use core::fmt::Write;
    crate::arch::x86::without_interrupts(|| {
        CONSOLE.lock().write_fmt(args).expect("console write should never fail");
    });
}

/// `set_term_color`: change the color every subsequent write uses.
pub fn set_term_color(foreground: u8, background: u8) -> KernelResult<()> {
    let color = ColorCode::new(foreground, background)?;
    crate::arch::x86::without_interrupts(|| {
        CONSOLE.lock().color = color;
    });
    Ok(())
}

/// `get_cursor_pos`.
pub fn cursor_pos() -> (usize, usize) {
    crate::arch::x86::without_interrupts(|| {
        let writer = CONSOLE.lock();
        (writer.row, writer.col)
    })
}

/// `set_cursor_pos`.
pub fn set_cursor_pos(row: usize, col: usize) -> KernelResult<()> {
    if row >= CONSOLE_HEIGHT || col >= CONSOLE_WIDTH {
        return Err(KernelError::InvalidArgument {
            name: "cursor_pos",
            value: "row/col out of bounds",
        });
    }
    crate::arch::x86::without_interrupts(|| {
        let mut writer = CONSOLE.lock();
        writer.row = row;
        writer.col = col;
    });
    update_hw_cursor(row, col);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_rejects_out_of_range_channel() {
        assert!(ColorCode::new(16, 0).is_err());
        assert!(ColorCode::new(0, 16).is_err());
        assert!(ColorCode::new(15, 15).is_ok());
    }
}
