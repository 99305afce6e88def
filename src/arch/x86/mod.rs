//! i686 architecture support: GDT, IDT, TSS, 8259 PIC, 8254 PIT, raw port
//! I/O, and the atomic/interrupt-gate primitives the rest of the kernel is
//! built on.

pub mod gdt;
pub mod idt;
pub mod interrupt_stubs;
pub mod interrupts;
pub mod pic;
pub mod pit;
pub mod port;
pub mod regs;
pub mod tss;
pub mod usermode;

pub use regs::without_interrupts;

/// Bring up segmentation, interrupt handling, and the two onboard devices
/// this kernel drives directly (PIT, PIC). Keyboard and console devices
/// are brought up separately once the console module exists.
///
/// # Safety
///
/// Must be called exactly once, early in boot, before interrupts are
/// enabled and before any code touches segment-relative state.
pub unsafe fn init() {
    // SAFETY: single boot-time call, ordering matches each module's
    // documented precondition (gdt before tss before idt).
    unsafe {
        gdt::init();
        tss::init();
        idt::init();
    }
    pic::init();
    pit::init();
}
