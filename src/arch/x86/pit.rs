//! 8254 Programmable Interval Timer, channel 0, programmed for a fixed
//! 5ms tick period. Each tick drives the scheduler's round-robin preemption
//! and the `get_ticks` syscall's counter.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::arch::x86::port::outb;

const PIT_CHANNEL0: u16 = 0x40;
const PIT_CMD: u16 = 0x43;
const PIT_BASE_HZ: u32 = 1_193_182;

/// Ticks per second; a 5ms period.
pub const TICK_HZ: u32 = 200;
const DIVISOR: u32 = PIT_BASE_HZ / TICK_HZ;

static TICKS: AtomicU32 = AtomicU32::new(0);

/// Program channel 0 in mode 3 (square wave), lobyte/hibyte access.
pub fn init() {
    // SAFETY: programming PIT channel 0 is the documented startup sequence;
    // ports are not touched anywhere else in the kernel.
    unsafe {
        outb(PIT_CMD, 0x36);
        outb(PIT_CHANNEL0, (DIVISOR & 0xFF) as u8);
        outb(PIT_CHANNEL0, ((DIVISOR >> 8) & 0xFF) as u8);
    }
}

/// Advance the tick counter. Called once per timer interrupt.
pub fn on_tick() -> u32 {
    TICKS.fetch_add(1, Ordering::Relaxed) + 1
}

/// Current tick count since boot, backing the `get_ticks` system call.
pub fn get_ticks() -> u32 {
    TICKS.load(Ordering::Relaxed)
}
