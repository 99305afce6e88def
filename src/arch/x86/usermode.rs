//! Ring-0-to-ring-3 transitions: the iret frame every first entry into
//! user mode needs, whether from a syscall handler that never returns
//! (`exec`) or from a freshly switched-to kernel thread seeded by
//! [`crate::sched::ktcb::seed_user_entry`].

use core::arch::{asm, global_asm};

use crate::arch::x86::gdt::{USER_CODE_SEL, USER_DATA_SEL};

/// Build an iretd frame on the current kernel stack and drop straight
/// into user mode at `entry` with stack `user_esp` and `eax` preloaded
/// with `initial_eax` — the child-of-fork/new-thread return-value
/// convention. Called directly (not via a context switch) by `exec`,
/// which replaces the calling thread's own image and never returns.
///
/// # Safety
///
/// `entry` and `user_esp` must be mapped present+user+(executable /
/// writable respectively) in the CR3 already installed; the caller has
/// no more kernel-side cleanup to do, since this never returns.
pub unsafe fn enter_usermode(entry: u32, user_esp: u32, initial_eax: u32) -> ! {
    // SAFETY: delegated to caller; segment registers are reloaded to the
    // flat user data selector before the privilege change takes effect.
    unsafe {
        asm!(
            "mov ds, {uds:x}",
            "mov es, {uds:x}",
            "mov fs, {uds:x}",
            "mov gs, {uds:x}",
            "push {uds}",
            "push {esp}",
            "push {eflags}",
            "push {ucs}",
            "push {entry}",
            "mov eax, {eax}",
            "iretd",
            uds = in(reg) USER_DATA_SEL as u32,
            esp = in(reg) user_esp,
            eflags = in(reg) 0x202u32,
            ucs = in(reg) USER_CODE_SEL as u32,
            entry = in(reg) entry,
            eax = in(reg) initial_eax,
            options(noreturn)
        );
    }
}

global_asm!(
    ".global new_thread_trampoline",
    "new_thread_trampoline:",
    "mov ax, {uds}",
    "mov ds, ax",
    "mov es, ax",
    "mov fs, ax",
    "mov gs, ax",
    "push {uds}",
    "push esi",
    "push 0x202",
    "push {ucs}",
    "push ebx",
    "mov eax, edi",
    "iretd",
    uds = const USER_DATA_SEL as u32,
    ucs = const USER_CODE_SEL as u32,
);

unsafe extern "C" {
    /// Entry point seeded by [`crate::sched::ktcb::seed_user_entry`]:
    /// on first switch-in, `ebx` holds the user entry eip, `esi` the
    /// user esp, and `edi` the value to preload into `eax` (the
    /// fork-child / thread-fork-child return convention). Never
    /// returns.
    pub fn new_thread_trampoline();
}
