//! `exec`: replace the calling (single-threaded) process's image in
//! place. Grounded on `exec_handler`; unlike `fork`, this transition
//! never returns through the ordinary syscall-return path — once the
//! new image is loaded it drops straight into user mode via
//! [`crate::arch::x86::usermode::enter_usermode`].

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::arch::x86::{regs, usermode};
use crate::error::{KernelError, KernelResult};
use crate::mm::page_table::PageDirectory;
use crate::process::loader;
use crate::process::pcb::Process;

/// Tear down `process`'s current address space and build a fresh one for
/// `execname`/`argv`, then jump into it. On failure the caller's image
/// and CR3 are left exactly as found, matching the original's
/// validate-and-build-before-touching-anything ordering.
///
/// # Safety
///
/// Must be called on `process`'s own (single) running thread, with no
/// other reference to `process.dir` outstanding.
pub unsafe fn exec(process: &Arc<Process>, execname: &str, argv: Vec<String>) -> KernelResult<()> {
    if process.thread_count() > 1 {
        return Err(KernelError::InvalidState {
            expected: "single-threaded process",
            actual: "process has more than one thread",
        });
    }
    if argv.first().map(String::as_str) != Some(execname) {
        return Err(KernelError::InvalidArgument {
            name: "argv",
            value: "argv[0] must equal the executable name",
        });
    }

    let mut new_dir = {
        let current = process.dir.lock();
        PageDirectory::new(&current)?
    };

    let old_phys = process.dir.lock().phys_addr();
    // SAFETY: `new_dir` already carries the shared kernel range every
    // directory does, so switching to it now — before it has any user
    // mappings — is safe; `loader::load` writes segment/argv bytes
    // through the new directory's own (not-yet-installed) user
    // addresses, so CR3 must point here first.
    unsafe {
        regs::set_cr3(new_dir.phys_addr());
    }

    let image = match loader::load(&mut new_dir, execname, &argv) {
        Ok(image) => image,
        Err(e) => {
            // SAFETY: the old directory is still fully intact; restoring
            // CR3 to it undoes the speculative switch above.
            unsafe {
                regs::set_cr3(old_phys);
            }
            return Err(e);
        }
    };

    {
        let mut dir = process.dir.lock();
        dir.teardown_user_mappings();
        *dir = new_dir;
    }
    process.set_regions(image.txt, image.rodata);

    // SAFETY: `new_dir` (now installed as CR3 and as `process.dir`) maps
    // `image.entry` and `image.initial_esp` present+user; the calling
    // thread has no more kernel-side state to preserve.
    unsafe {
        usermode::enter_usermode(image.entry, image.initial_esp, 0);
    }
}
