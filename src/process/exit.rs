//! `vanish`: terminate the calling thread. If it was the process's last,
//! tear down the address space, reparent any children onto the reaper,
//! and wake the parent blocked in `wait`. Grounded on `vanish_handler`.
//! [`reaper_loop`] is the other half: the scheduler's idle KTCB runs it
//! forever, collecting whatever `vanish` reparents here once every one of
//! its threads has exited.

use alloc::sync::Arc;
use core::sync::atomic::Ordering;

use crate::process::pcb::{Pid, Process};
use crate::sched::ktcb::KtcbId;
use crate::sched::scheduler;
use crate::sync::{condvar, mutex};

/// The first process ever created; children of a reaped process are
/// reparented here, mirroring `sched_add_child`'s implicit reaper.
pub const INIT_PID: Pid = Pid(1);

/// Terminate the calling thread and, if it is the last one standing in
/// its process, tear down the process. Never returns: the final step is
/// an unconditional switch to whatever the scheduler picks next.
pub fn vanish(process: &Arc<Process>, ktcb_id: KtcbId, tid: u32, exit_status: Option<i32>) -> ! {
    if let Some(thread) = process.find_thread(tid) {
        thread.mark_exited();
    }

    let process_exited =
        process.exited_thread_count.load(Ordering::SeqCst) as usize + 1 == process.thread_count();

    if let Some(status) = exit_status {
        *process.exit_status.lock() = Some(status);
    }

    if process_exited {
        // SAFETY: this process's own directory is about to be torn down;
        // switch away from it first so no frame it owns is freed while
        // still the active translation base.
        unsafe {
            crate::arch::x86::regs::set_cr3(crate::process::kernel_pgd());
        }
        process.dir.lock().teardown_user_mappings();

        if let Some(reaper) = scheduler::find_process(INIT_PID) {
            process.orphan_children_to(&reaper);
            let _ = condvar::signal(reaper.wait_cond);
        }

        if let Some(parent_pid) = process.parent {
            if let Some(parent) = scheduler::find_process(parent_pid) {
                let _ = condvar::signal(parent.wait_cond);
            }
        }

        crate::process::unbind_ktcb(ktcb_id);
        scheduler::remove_process(process.pid);
    }

    process.exited_thread_count.fetch_add(1, Ordering::SeqCst);
    crate::sched::ktcb::free(ktcb_id);

    let to_run = scheduler::next();
    let to_pgd = crate::process::current_pgd_for_ktcb(to_run);
    scheduler::set_running(to_run);
    // SAFETY: `to_run` came from the scheduler's own runnable/idle slot;
    // there is no caller state left to preserve for this (now freed) KTCB.
    unsafe {
        crate::sched::context_switch::switch(None, to_run, to_pgd);
    }
    unreachable!("switching to no prior context never returns");
}

/// Runs forever on the scheduler's idle KTCB. Repeatedly scans the
/// reaper process's (`INIT_PID`) children map for one whose
/// exited-thread count has reached its thread count, removes and drops
/// it, and blocks on the reaper's own condition variable when none
/// qualifies yet. `vanish` signals that condvar after every
/// `orphan_children_to`, so a newly orphaned, already-fully-exited
/// process is collected without waiting for the next spurious wakeup.
/// Grounded on spec §4.3's reaper loop.
pub fn reaper_loop(me: KtcbId) -> ! {
    let reaper = scheduler::find_process(INIT_PID).expect("reaper process registered at boot");

    loop {
        mutex::lock(reaper.children_mutex, me).expect("reaper children mutex lock");

        let collected = loop {
            let found = reaper.children.lock().values().find(|c| c.all_threads_exited()).cloned();
            match found {
                Some(child) => break child,
                None => condvar::wait(reaper.wait_cond, reaper.children_mutex, me)
                    .expect("reaper cond wait"),
            }
        };
        reaper.children.lock().remove(&collected.pid);

        mutex::unlock(reaper.children_mutex, me).expect("reaper children mutex unlock");
        log::debug!("reaper collected process {}", collected.pid.0);
    }
}
