//! i386 Task State Segment.
//!
//! Only `esp0`/`ss0` are meaningful on this kernel: they give the CPU a
//! Ring 0 stack to switch to on every interrupt or syscall taken from user
//! mode. The scheduler rewrites `esp0` on every context switch so each
//! thread's kernel stack is the one in use when it next traps in.

use core::arch::asm;
use core::mem::size_of;

use super::gdt;

#[repr(C, packed)]
struct Tss {
    link: u16,
    _r0: u16,
    esp0: u32,
    ss0: u16,
    _r1: u16,
    esp1: u32,
    ss1: u16,
    _r2: u16,
    esp2: u32,
    ss2: u16,
    _r3: u16,
    cr3: u32,
    eip: u32,
    eflags: u32,
    eax: u32,
    ecx: u32,
    edx: u32,
    ebx: u32,
    esp: u32,
    ebp: u32,
    esi: u32,
    edi: u32,
    es: u16,
    _r4: u16,
    cs: u16,
    _r5: u16,
    ss: u16,
    _r6: u16,
    ds: u16,
    _r7: u16,
    fs: u16,
    _r8: u16,
    gs: u16,
    _r9: u16,
    ldt: u16,
    _r10: u16,
    trap: u16,
    iomap_base: u16,
}

const EMPTY_TSS: Tss = Tss {
    link: 0,
    _r0: 0,
    esp0: 0,
    ss0: gdt::KERNEL_DATA_SEL,
    _r1: 0,
    esp1: 0,
    ss1: 0,
    _r2: 0,
    esp2: 0,
    ss2: 0,
    _r3: 0,
    cr3: 0,
    eip: 0,
    eflags: 0,
    eax: 0,
    ecx: 0,
    edx: 0,
    ebx: 0,
    esp: 0,
    ebp: 0,
    esi: 0,
    edi: 0,
    es: 0,
    _r4: 0,
    cs: 0,
    _r5: 0,
    ss: 0,
    _r6: 0,
    ds: 0,
    _r7: 0,
    fs: 0,
    _r8: 0,
    gs: 0,
    _r9: 0,
    ldt: 0,
    _r10: 0,
    trap: 0,
    iomap_base: size_of::<Tss>() as u16,
};

static mut TSS: Tss = EMPTY_TSS;

/// Install the TSS descriptor in the GDT and load the task register.
///
/// # Safety
///
/// Must run once at boot, after [`super::gdt::init`].
pub unsafe fn init() {
    // SAFETY: single boot-time writer, GDT entry installed before LTR reads
    // it, selector matches the slot gdt::init reserved.
    unsafe {
        let base = &raw const TSS as u32;
        let limit = (size_of::<Tss>() - 1) as u32;
        gdt::set_tss_entry(base, limit);
        asm!("ltr {0:x}", in(reg) gdt::TSS_SEL, options(nostack, preserves_flags));
    }
}

/// Point the TSS's Ring 0 stack at `esp0`, called on every context switch
/// so the next trap from user mode lands on the incoming thread's stack.
pub fn set_kernel_stack(esp0: u32) {
    // SAFETY: plain field write; readers are the CPU's trap machinery,
    // which only consults this after a context switch completes.
    unsafe {
        TSS.esp0 = esp0;
    }
}
