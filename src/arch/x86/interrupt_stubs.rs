//! Assembly trampolines from raw interrupt vectors into [`common_handler`].
//!
//! Each stub pushes a vector number (and, for the handful of exceptions
//! that don't, a dummy error code) then falls into a shared tail that
//! saves the full register set as a [`super::interrupts::TrapFrame`] and
//! calls into Rust.

use core::arch::global_asm;

macro_rules! isr_no_err {
    ($name:ident, $vec:literal) => {
        global_asm!(
            concat!(".global ", stringify!($name)),
            concat!(stringify!($name), ":"),
            "push 0",
            concat!("push ", $vec),
            "jmp interrupt_common",
        );
    };
}

macro_rules! isr_with_err {
    ($name:ident, $vec:literal) => {
        global_asm!(
            concat!(".global ", stringify!($name)),
            concat!(stringify!($name), ":"),
            concat!("push ", $vec),
            "jmp interrupt_common",
        );
    };
}

isr_no_err!(isr0, 0);
isr_no_err!(isr1, 1);
isr_no_err!(isr2, 2);
isr_no_err!(isr3, 3);
isr_no_err!(isr4, 4);
isr_no_err!(isr5, 5);
isr_no_err!(isr6, 6);
isr_no_err!(isr7, 7);
isr_with_err!(isr8, 8);
isr_no_err!(isr9, 9);
isr_with_err!(isr10, 10);
isr_with_err!(isr11, 11);
isr_with_err!(isr12, 12);
isr_with_err!(isr13, 13);
isr_with_err!(isr14, 14);
isr_no_err!(isr15, 15);
isr_no_err!(isr16, 16);
isr_with_err!(isr17, 17);
isr_no_err!(isr18, 18);
isr_no_err!(isr19, 19);

isr_no_err!(irq0, 0x20);
isr_no_err!(irq1, 0x21);

// int 0x80 carries the syscall number in eax and, for multi-argument
// calls, a pointer to a packed argument block in a second register; no
// CPU error code is pushed for software interrupts.
isr_no_err!(isr0x80, 0x80);

global_asm!(
    ".global interrupt_common",
    "interrupt_common:",
    "pusha",
    "push ds",
    "push es",
    "push fs",
    "push gs",
    "mov ax, 0x10",
    "mov ds, ax",
    "mov es, ax",
    "mov fs, ax",
    "mov gs, ax",
    "push esp",
    "call common_handler",
    "add esp, 4",
    "pop gs",
    "pop fs",
    "pop es",
    "pop ds",
    "popa",
    "add esp, 8", // discard vector + error code
    "iretd",
);
