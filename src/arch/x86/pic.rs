//! 8259 Programmable Interrupt Controller, remapped so IRQ 0-15 land on
//! vectors 32-47 (clear of the CPU exception range).

use pic8259::ChainedPics;
use spin::Mutex;

pub const PIC1_OFFSET: u8 = 32;
pub const PIC2_OFFSET: u8 = 40;

pub const IRQ_TIMER: u8 = PIC1_OFFSET;
pub const IRQ_KEYBOARD: u8 = PIC1_OFFSET + 1;

pub static PICS: Mutex<ChainedPics> =
    // SAFETY: PIC1_OFFSET/PIC2_OFFSET are chosen clear of vectors 0-31.
    unsafe { Mutex::new(ChainedPics::new(PIC1_OFFSET, PIC2_OFFSET)) };

/// Remap both PICs and mask every line; callers unmask what they need.
pub fn init() {
    // SAFETY: called once from boot before interrupts are enabled.
    unsafe {
        PICS.lock().initialize();
    }
}

/// Acknowledge the given interrupt vector so the PIC delivers the next one.
pub fn send_eoi(vector: u8) {
    // SAFETY: vector came from an actual PIC-delivered interrupt.
    unsafe {
        PICS.lock().notify_end_of_interrupt(vector);
    }
}
