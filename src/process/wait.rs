//! `wait`: block until any child process's every thread has exited, reap
//! it, and report its exit status. Grounded on `wait_handler`.

use alloc::sync::Arc;

use crate::error::{KernelError, KernelResult};
use crate::mm::vas;
use crate::process::pcb::{Pid, Process};
use crate::sched::ktcb::KtcbId;
use crate::sync::{condvar, mutex};

/// Find and reap an exited child of `process`, blocking on its
/// `wait_cond` while none qualifies yet. `status_ptr`, if given, is
/// validated writable in `process`'s own address space up front —
/// mirrors `vm_mem_region_check` running before `children->mp` is taken,
/// so a bad pointer fails fast without blocking.
pub fn wait(
    process: &Arc<Process>,
    me: KtcbId,
    status_ptr: Option<u32>,
) -> KernelResult<(Pid, Option<i32>)> {
    if process.children.lock().is_empty() {
        return Err(KernelError::InvalidState {
            expected: "at least one child process",
            actual: "no children",
        });
    }

    if let Some(addr) = status_ptr {
        vas::check_region(&process.dir.lock(), &process.regions(), addr, 4, true)?;
    }

    mutex::lock(process.children_mutex, me)?;

    let child = loop {
        let found = process.children.lock().values().find(|c| c.all_threads_exited()).cloned();
        match found {
            Some(child) => break child,
            None => condvar::wait(process.wait_cond, process.children_mutex, me)?,
        }
    };

    process.children.lock().remove(&child.pid);
    mutex::unlock(process.children_mutex, me)?;

    let status = *child.exit_status.lock();
    if let Some(addr) = status_ptr {
        if let Some(value) = status {
            // SAFETY: validated writable above; nothing between that
            // check and here can unmap the caller's own stack.
            unsafe {
                core::ptr::write(addr as *mut i32, value);
            }
        }
    }

    Ok((child.pid, status))
}
