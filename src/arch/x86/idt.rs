//! Interrupt Descriptor Table: one trap/interrupt gate per CPU exception,
//! the timer and keyboard IRQ lines, and the `int 0x80` syscall gate.

use core::arch::asm;
use core::mem::size_of;

use super::gdt::KERNEL_CODE_SEL;

const IDT_ENTRIES: usize = 256;

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct IdtEntry {
    offset_low: u16,
    selector: u16,
    zero: u8,
    type_attr: u8,
    offset_high: u16,
}

#[repr(C, packed)]
struct IdtDescriptor {
    size: u16,
    offset: u32,
}

const NULL_GATE: IdtEntry = IdtEntry {
    offset_low: 0,
    selector: 0,
    zero: 0,
    type_attr: 0,
    offset_high: 0,
};

static mut IDT: [IdtEntry; IDT_ENTRIES] = [NULL_GATE; IDT_ENTRIES];
static mut IDT_DESC: IdtDescriptor = IdtDescriptor { size: 0, offset: 0 };

/// Present, ring 0, 32-bit interrupt gate (clears IF on entry).
const GATE_INTERRUPT: u8 = 0x8E;
/// Present, ring 3, 32-bit trap gate — the one DPL-3 gate, for `int 0x80`.
const GATE_TRAP_DPL3: u8 = 0xEF;

fn set_gate(num: usize, handler: unsafe extern "C" fn(), type_attr: u8) {
    let handler = handler as usize as u32;
    // SAFETY: boot-time single-threaded write to one static table slot.
    unsafe {
        IDT[num] = IdtEntry {
            offset_low: (handler & 0xFFFF) as u16,
            selector: KERNEL_CODE_SEL,
            zero: 0,
            type_attr,
            offset_high: ((handler >> 16) & 0xFFFF) as u16,
        };
    }
}

extern "C" {
    fn isr0();
    fn isr1();
    fn isr2();
    fn isr3();
    fn isr4();
    fn isr5();
    fn isr6();
    fn isr7();
    fn isr8();
    fn isr9();
    fn isr10();
    fn isr11();
    fn isr12();
    fn isr13();
    fn isr14();
    fn isr15();
    fn isr16();
    fn isr17();
    fn isr18();
    fn isr19();
    fn irq0();
    fn irq1();
    fn isr0x80();
}

/// Populate the IDT and load it via `lidt`.
///
/// # Safety
///
/// Must run once at boot, after [`super::gdt::init`], before `sti`.
pub unsafe fn init() {
    set_gate(0, isr0, GATE_INTERRUPT);
    set_gate(1, isr1, GATE_INTERRUPT);
    set_gate(2, isr2, GATE_INTERRUPT);
    set_gate(3, isr3, GATE_INTERRUPT);
    set_gate(4, isr4, GATE_INTERRUPT);
    set_gate(5, isr5, GATE_INTERRUPT);
    set_gate(6, isr6, GATE_INTERRUPT);
    set_gate(7, isr7, GATE_INTERRUPT);
    set_gate(8, isr8, GATE_INTERRUPT);
    set_gate(9, isr9, GATE_INTERRUPT);
    set_gate(10, isr10, GATE_INTERRUPT);
    set_gate(11, isr11, GATE_INTERRUPT);
    set_gate(12, isr12, GATE_INTERRUPT);
    set_gate(13, isr13, GATE_INTERRUPT);
    set_gate(14, isr14, GATE_INTERRUPT);
    set_gate(15, isr15, GATE_INTERRUPT);
    set_gate(16, isr16, GATE_INTERRUPT);
    set_gate(17, isr17, GATE_INTERRUPT);
    set_gate(18, isr18, GATE_INTERRUPT);
    set_gate(19, isr19, GATE_INTERRUPT);

    set_gate(0x20, irq0, GATE_INTERRUPT);
    set_gate(0x21, irq1, GATE_INTERRUPT);
    set_gate(0x80, isr0x80, GATE_TRAP_DPL3);

    // SAFETY: IDT/IDT_DESC are fully populated above; LIDT just loads the
    // address, no earlier code depends on the IDT being live yet.
    unsafe {
        IDT_DESC = IdtDescriptor {
            size: (IDT_ENTRIES * size_of::<IdtEntry>() - 1) as u16,
            offset: IDT.as_ptr() as u32,
        };
        asm!("lidt [{0}]", in(reg) &raw const IDT_DESC, options(nostack, preserves_flags));
    }
}
