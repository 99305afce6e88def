//! `fork`: copy-on-write process duplication. Grounded directly on the
//! original's `fork_handler` sequencing — reject multi-threaded callers,
//! build every child structure before touching any shared state, and
//! unwind cleanly on the first failure.
//!
//! The original kernel gets the child running by `memcpy`-ing the tail of
//! the parent's live kernel stack and patching the copy's saved `eax` to
//! 0. That trick depends on the exact shape of the original's call chain
//! (only the topmost frame's saved `ebp` ever needs fixing up); it doesn't
//! carry over to a context-switch primitive that only knows how to save
//! and restore a fixed 5-register set (see `sched::context_switch`).
//! Instead the child is seeded with a synthetic context that resumes
//! directly in user mode via [`crate::sched::ktcb::seed_user_entry`], at
//! the same `eip`/`esp` the parent is about to resume at, with `eax` (the
//! fork return slot) set to 0.

use alloc::sync::Arc;
use core::sync::atomic::AtomicU32;

use crate::arch::x86::interrupts::TrapFrame;
use crate::error::{KernelError, KernelResult};
use crate::mm::page_table::PageDirectory;
use crate::process::pcb::{Pid, Process};
use crate::process::thread::{self, Thread};
use crate::sched::ktcb::{self, KtcbId};
use crate::sched::scheduler;

// Pid 1 is reserved for the boot-created reaper process (see
// `process::exit::INIT_PID`); this counter, shared with the boot stub's
// first-process loader (`generate_pid`), never hands it out.
static NEXT_PID: AtomicU32 = AtomicU32::new(2);

/// Allocate the next process id. Shared by `fork` and the boot stub's
/// "load the first user program" path so both draw from one counter.
pub fn generate_pid() -> Pid {
    Pid(NEXT_PID.fetch_add(1, core::sync::atomic::Ordering::SeqCst))
}

/// Perform `fork` on behalf of the calling thread, returning the new
/// child's pid to the parent. `frame` is the calling thread's trap frame
/// at the point of the `fork` syscall — the child is seeded to resume at
/// `frame.eip`/`frame.useresp` with `eax = 0`.
pub fn fork(parent: &Arc<Process>, caller_ktcb: KtcbId, caller_tid: u32, frame: &TrapFrame) -> KernelResult<Pid> {
    if parent.thread_count() > 1 {
        return Err(KernelError::InvalidState {
            expected: "single-threaded process",
            actual: "process has more than one thread",
        });
    }

    let mut parent_dir = parent.dir.lock();
    let child_dir = PageDirectory::new(&parent_dir)?;
    let mut child_dir = child_dir;
    if let Err(e) = parent_dir.cow_clone(&mut child_dir) {
        return Err(e);
    }
    drop(parent_dir);

    let child_ktcb = match ktcb::alloc() {
        Ok(id) => id,
        Err(e) => return Err(e),
    };

    let child_pid = generate_pid();
    let child_tid = thread::generate_tid();
    let [parent_txt, parent_rodata] = parent.regions();
    let child_process = Arc::new(Process::new(
        child_pid,
        Some(parent.pid),
        child_dir,
        parent_txt,
        parent_rodata,
    ));
    let child_thread = Arc::new(Thread::new(child_tid, child_pid, child_ktcb));
    child_process.insert_thread(child_thread);
    crate::process::bind_ktcb_to_process(child_ktcb, child_process.clone());
    ktcb::bind_tid(child_ktcb, child_tid)?;

    ktcb::seed_user_entry(child_ktcb, frame.eip, frame.useresp, 0)?;

    parent.children.lock().insert(child_pid, child_process.clone());
    scheduler::add_process(child_pid, child_process);

    scheduler::running_to_runnable(caller_ktcb);
    scheduler::spawn_runnable(child_ktcb);
    scheduler::switch_away_parked(caller_ktcb);

    let _ = caller_tid;
    Ok(child_pid)
}
