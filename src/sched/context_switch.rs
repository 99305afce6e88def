//! Low-level kernel-to-kernel context switch: save the callee-saved
//! registers of the outgoing thread, load the incoming thread's, swap
//! CR3 if the address space changes, and repoint the TSS's esp0.
//!
//! `raw_switch`/`load_context` are `#[unsafe(naked)]`: the instant `esp`
//! is repointed at another thread's stack, no ordinary Rust code may run
//! in this frame again (locals, including the compiler's own spilled
//! values, live at addresses relative to the stack we just abandoned).
//! Naked functions give full control over the prologue/epilogue so nothing
//! sneaks in between the swap and the final `ret`.

use crate::arch::x86::{regs, tss};
use crate::sched::ktcb::{self, KtcbId, SavedContext};
use core::arch::naked_asm;

/// Switch from `from` (or from no thread, for the first switch into the
/// idle KTCB at boot) to `to`. When `from` is `Some`, this returns once
/// some later switch resumes `from` again — exactly at this call site.
/// When `from` is `None`, this never returns.
///
/// # Safety
///
/// `to` must be a live KTCB whose saved context was produced either by a
/// prior call to this function or by hand-seeding an initial frame (see
/// [`crate::sched::ktcb::seed_user_entry`]). `to_pgd` must be the
/// physical address of a valid, fully populated page directory.
pub unsafe fn switch(from: Option<KtcbId>, to: KtcbId, to_pgd: u32) {
    // SAFETY: `to` is validated present by the caller's contract; esp0 is
    // always safe to install since it only takes effect on the next trap.
    let to_ctx = ktcb::with(to, |k| k.context).expect("switch target must exist");
    tss::set_kernel_stack(to_ctx.esp0);
    unsafe {
        regs::set_cr3(to_pgd);
    }

    match from {
        Some(from_id) => {
            let esp_slot = ktcb::context_esp_slot(from_id).expect("switch source must exist");
            // SAFETY: `esp_slot` points at `from_id`'s own (heap-stable)
            // saved context; `to_ctx.esp` was read from a live KTCB above.
            unsafe {
                raw_switch(esp_slot, to_ctx.esp);
            }
        }
        None => {
            // SAFETY: there is no caller state to preserve; this call
            // never returns.
            unsafe {
                load_context(to_ctx.esp);
            }
        }
    }
}

/// Push the callee-saved set, stash the resulting `esp` through
/// `from_esp_slot`, load `to_esp`, and pop the incoming thread's set.
/// The trailing `ret` lands wherever that thread's own `esp` last
/// pointed — either a previous call into this function, or a synthetic
/// frame built by [`crate::sched::ktcb::seed_user_entry`].
///
/// # Safety
///
/// `from_esp_slot` must point at a live KTCB's `context.esp` field and
/// stay valid until this call stores into it (true for a heap-boxed
/// KTCB pulled from the table while its owner is not running).
/// `to_esp` must be a previously saved or seeded `esp` as described
/// above.
#[unsafe(naked)]
unsafe extern "C" fn raw_switch(_from_esp_slot: *mut u32, _to_esp: u32) {
    naked_asm!(
        "pushf",
        "push ebx",
        "push esi",
        "push edi",
        "push ebp",
        // 5 pushes = 20 bytes; [esp] is now the 5-word saved block, the
        // return address sits at [esp+20], args follow it.
        "mov eax, [esp + 24]", // from_esp_slot
        "mov ecx, [esp + 28]", // to_esp
        "mov [eax], esp",
        "mov esp, ecx",
        "pop ebp",
        "pop edi",
        "pop esi",
        "pop ebx",
        "popf",
        "ret",
    )
}

/// Load `to_esp` as a fresh stack and pop a 5-word saved block off it,
/// then `ret` into whatever address follows — used only when there is no
/// outgoing thread to save (the very first switch off the boot stack).
///
/// # Safety
/// Same contract as `raw_switch`'s `to_esp`, with no `from` to save.
#[unsafe(naked)]
unsafe extern "C" fn load_context(_to_esp: u32) -> ! {
    naked_asm!(
        "mov eax, [esp + 4]",
        "mov esp, eax",
        "pop ebp",
        "pop edi",
        "pop esi",
        "pop ebx",
        "popf",
        "ret",
    )
}
