//! Fault handlers: page faults try copy-on-write resolution first, then
//! fall through (together with every other non-syscall, non-IRQ trap) to
//! user-mode exception delivery if the faulting thread has a `swexn`
//! handler registered, and otherwise terminate the thread. Grounded on
//! spec §4.7's fault-handling component.

use crate::arch::x86::interrupts::TrapFrame;
use crate::arch::x86::regs;
use crate::exception;
use crate::mm::frame;
use crate::process;
use crate::sched::scheduler;

fn current_thread() -> Option<alloc::sync::Arc<crate::process::thread::Thread>> {
    let me = scheduler::current()?;
    let tid = crate::sched::ktcb::with(me, |k| k.tid).ok()??;
    process::owning_process(me)?.find_thread(tid)
}

/// Vector 14: kernel-mode faults are a kernel bug (panic). User-mode
/// faults outside the user region, or inside the text/rodata regions,
/// always go straight to delivery — `resolve_cow` is never attempted
/// there, since a freshly loaded (non-shared) text page has refcount 1
/// and would otherwise be "resolved" by flipping it writable, violating
/// the read-only enforcement invariant. Otherwise try COW resolution
/// first; if that's not what the fault was (or the resolve itself
/// fails), treat it like any other fault.
pub fn page_fault(frame: &mut TrapFrame) {
    let addr = regs::get_cr2();

    if !frame.from_user_mode() {
        log::error!("page fault in kernel mode at {addr:#x}, eip={:#x}", frame.eip);
        panic!("kernel page fault at {addr:#x}");
    }

    if let Some(me) = scheduler::current() {
        if let Some(proc) = process::owning_process(me) {
            let in_user_region = addr >= frame::USER_MEM_START;
            let in_readonly_region = proc.regions().iter().any(|r| r.contains(addr));
            if in_user_region && !in_readonly_region {
                let resolved = proc.dir.lock().resolve_cow(addr).is_ok();
                if resolved {
                    return;
                }
            }
        }
    }

    deliver_or_kill(frame);
}

/// Every other trap this kernel doesn't otherwise dispatch (general
/// protection fault, divide error, and so on): deliver to a registered
/// handler if one exists, otherwise terminate the faulting thread.
pub fn general_fault(frame: &mut TrapFrame) {
    deliver_or_kill(frame);
}

fn deliver_or_kill(frame: &mut TrapFrame) {
    let Some(thread) = current_thread() else {
        // No resolvable owning thread for this trap (e.g. it landed on
        // the idle/reaper KTCB) — nothing left to do but halt.
        regs::halt_loop();
    };

    if let Some(handler) = thread.take_swexn() {
        exception::deliver(frame, &handler);
        return;
    }

    log::warn!("thread {} killed by unhandled fault (vector {})", thread.tid, frame.vector);

    let Some(me) = scheduler::current() else {
        regs::halt_loop();
    };
    let Some(proc) = process::owning_process(me) else {
        regs::halt_loop();
    };
    process::exit::vanish(&proc, me, thread.tid, Some(-2));
}
