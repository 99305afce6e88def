//! User-mode exception delivery: validating/adopting a `swexn`-supplied
//! replacement register set, and building the crafted frame a registered
//! handler resumes into when a fault arrives. Grounded on spec §4.7's
//! "delivery path (all user faults)".

use crate::arch::x86::gdt::{USER_CODE_SEL, USER_DATA_SEL};
use crate::arch::x86::interrupts::TrapFrame;
use crate::error::{KernelError, KernelResult};
use crate::mm::page_table::PageDirectory;
use crate::mm::vas::{self, ReadOnlyRegion};
use crate::process::thread::SwexnHandler;

const EFLAGS_IF: u32 = 1 << 9;

/// Validate a user-supplied replacement register set read from
/// `newureg_ptr` and splice it into `frame`: only the kernel's own flat
/// user code/data selectors are accepted, and interrupts must stay
/// enabled, matching `swexn`'s "validates cs/ss/eflags and resumes those
/// registers" contract.
pub fn adopt_new_ureg(
    frame: &mut TrapFrame,
    dir: &PageDirectory,
    regions: &[ReadOnlyRegion],
    newureg_ptr: u32,
) -> KernelResult<()> {
    vas::check_region(dir, regions, newureg_ptr, core::mem::size_of::<TrapFrame>() as u32, false)?;
    // SAFETY: `check_region` just proved `size_of::<TrapFrame>()` bytes
    // starting at `newureg_ptr` are mapped and readable.
    let candidate = unsafe { core::ptr::read(newureg_ptr as *const TrapFrame) };

    if candidate.cs != USER_CODE_SEL as u32 || candidate.ss != USER_DATA_SEL as u32 {
        return Err(KernelError::InvalidArgument {
            name: "newureg",
            value: "cs/ss must be the flat user selectors",
        });
    }
    if candidate.eflags & EFLAGS_IF == 0 {
        return Err(KernelError::InvalidArgument {
            name: "newureg",
            value: "eflags must keep interrupts enabled",
        });
    }

    *frame = candidate;
    Ok(())
}

/// Redirect a faulting `frame` into a registered handler: a copy of the
/// original frame, a pointer to that copy, and the registered `arg` are
/// pushed onto the handler's own stack (`esp3`), and `frame` is rewritten
/// so the trap return lands at `handler.eip` running on that stack, with
/// `void h(void *arg, ureg_t *ureg)`'s two arguments sitting at
/// `esp+4`/`esp+8`. One-shot — the caller clears the thread's
/// registration before calling this, matching the original's "handler
/// fires once, re-register from inside it to keep going" contract.
pub fn deliver(frame: &mut TrapFrame, handler: &SwexnHandler) {
    let ureg_size = core::mem::size_of::<TrapFrame>() as u32;
    let ureg_addr = handler.esp3 - ureg_size;
    let ureg_ptr_slot = ureg_addr - 4;
    let arg_slot = ureg_ptr_slot - 4;
    let retaddr_slot = arg_slot - 4;

    // SAFETY: `esp3` was validated writable for this exact layout when
    // the handler was registered by `swexn` (see
    // `crate::syscall::exception::sys_swexn`).
    unsafe {
        core::ptr::write(ureg_addr as *mut TrapFrame, *frame);
        core::ptr::write(ureg_ptr_slot as *mut u32, ureg_addr);
        core::ptr::write(arg_slot as *mut u32, handler.arg);
        core::ptr::write(retaddr_slot as *mut u32, ureg_addr);
    }

    frame.eip = handler.eip;
    frame.useresp = retaddr_slot;
}
