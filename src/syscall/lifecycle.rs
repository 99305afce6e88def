//! `fork`/`thread_fork`/`exec`/`wait`/`vanish`/`set_status`/`gettid`/
//! `task_vanish`/`halt`: thin wrappers over [`crate::process`] that add the
//! user-pointer marshalling the raw operations don't do themselves.

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::arch::x86::interrupts::TrapFrame;
use crate::arch::x86::regs;
use crate::error::KernelResult;
use crate::process::pcb::{Pid, Process};
use crate::process::thread::{self, Thread};
use crate::process::{bind_ktcb_to_process, exec, exit, fork, wait};
use crate::sched::ktcb::{self, KtcbId};
use crate::sched::scheduler;

pub fn sys_fork(process: &Arc<Process>, me: KtcbId, tid: u32, frame: &TrapFrame) -> KernelResult<Pid> {
    fork::fork(process, me, tid, frame)
}

/// `thread_fork`: add a peer thread to the calling process, sharing its
/// address space. Unlike `fork` there is no directory to copy, so the new
/// KTCB is simply seeded to resume at the caller's own trap frame with
/// `eax = 0` and handed straight to the scheduler; the calling thread
/// keeps running and gets the new tid back as its own return value.
pub fn sys_thread_fork(process: &Arc<Process>, frame: &TrapFrame) -> KernelResult<u32> {
    let child_ktcb = ktcb::alloc()?;
    let child_tid = thread::generate_tid();
    let child_thread = Arc::new(Thread::new(child_tid, process.pid, child_ktcb));
    process.insert_thread(child_thread);
    bind_ktcb_to_process(child_ktcb, process.clone());
    ktcb::bind_tid(child_ktcb, child_tid)?;

    ktcb::seed_user_entry(child_ktcb, frame.eip, frame.useresp, 0)?;
    scheduler::spawn_runnable(child_ktcb);

    Ok(child_tid)
}

pub fn sys_exec(process: &Arc<Process>, execname_ptr: u32, argv_ptr: u32) -> KernelResult<()> {
    let execname = super::read_c_string(process, execname_ptr, 256)?;
    let argc = {
        let regions = process.regions();
        let dir = process.dir.lock();
        crate::mm::vas::check_null_terminated_array(&dir, &regions, argv_ptr)?
    };

    let mut argv = Vec::with_capacity(argc);
    for i in 0..argc {
        let word: [u32; 1] = super::read_packed(process, argv_ptr + (i as u32) * 4)?;
        argv.push(super::read_c_string(process, word[0], 256)?);
    }

    // SAFETY: the dispatcher only ever calls this on the calling thread's
    // own process, which `exec::exec`'s own thread-count check further
    // requires to be single-threaded.
    unsafe { exec::exec(process, &execname, argv) }
}

pub fn sys_wait(process: &Arc<Process>, me: KtcbId, status_ptr: Option<u32>) -> KernelResult<Pid> {
    wait::wait(process, me, status_ptr).map(|(pid, _)| pid)
}

/// `vanish`: terminate the calling thread without overriding whatever
/// `set_status` last recorded.
pub fn sys_vanish(process: &Arc<Process>, me: KtcbId, tid: u32) -> ! {
    exit::vanish(process, me, tid, None)
}

/// `task_vanish`: left as a stub, per the design notes' Open Questions —
/// a full implementation would tear down every thread in the task at
/// once rather than just the caller's, but this is sufficient to be
/// callable without crashing and to record the exit status the caller
/// asked for.
pub fn sys_task_vanish(process: &Arc<Process>, me: KtcbId, tid: u32, status: i32) -> ! {
    exit::vanish(process, me, tid, Some(status))
}

pub fn sys_set_status(process: &Arc<Process>, status: i32) -> KernelResult<()> {
    *process.exit_status.lock() = Some(status);
    Ok(())
}

pub fn sys_halt() -> ! {
    regs::halt_loop()
}
