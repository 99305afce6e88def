//! `swexn`: register or deregister the calling thread's user-mode
//! exception handler, and optionally adopt a caller-supplied replacement
//! register set immediately (used to resume after handling a fault
//! in-band rather than through the syscall's own return path).

use alloc::sync::Arc;

use crate::arch::x86::interrupts::TrapFrame;
use crate::error::KernelResult;
use crate::exception;
use crate::mm::vas;
use crate::process::pcb::Process;
use crate::process::thread::{SwexnHandler, Thread};

pub fn sys_swexn(
    process: &Arc<Process>,
    thread: &Arc<Thread>,
    frame: &mut TrapFrame,
    esp3: u32,
    eip: u32,
    arg: u32,
    newureg_ptr: u32,
) -> KernelResult<()> {
    let regions = process.regions();
    let dir = process.dir.lock();

    if esp3 == 0 {
        thread.deregister_swexn();
    } else {
        // The handler resumes into a crafted frame sitting just below
        // esp3: a ureg copy, a pointer to it, the registered `arg`, and a
        // return address slot (see `crate::exception::deliver`); all of
        // it must already be writable.
        let needed = core::mem::size_of::<TrapFrame>() as u32 + 12;
        vas::check_region(&dir, &regions, esp3 - needed, needed, true)?;
        thread.install_swexn(SwexnHandler { eip, esp3, arg });
    }

    if newureg_ptr != 0 {
        exception::adopt_new_ureg(frame, &dir, &regions, newureg_ptr)?;
    }
    Ok(())
}
