//! The thread control block: the unit the user-visible syscall surface
//! operates on. Binds a tid to an owning process, a kernel thread, and
//! the deferred `swexn` handler it may have registered.

use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use spin::Mutex;

use crate::process::pcb::Pid;
use crate::sched::ktcb::KtcbId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ThreadState {
    Running = 0,
    Exited = 1,
}

/// A registered user-mode exception handler, installed by `swexn` and
/// consumed (cleared) the first time a fault is delivered through it.
#[derive(Debug, Clone, Copy)]
pub struct SwexnHandler {
    pub eip: u32,
    pub esp3: u32,
    pub arg: u32,
}

pub struct Thread {
    pub tid: u32,
    pub pid: Pid,
    pub ktcb: KtcbId,
    state: AtomicU8,
    pub swexn: Mutex<Option<SwexnHandler>>,
}

impl Thread {
    pub fn new(tid: u32, pid: Pid, ktcb: KtcbId) -> Self {
        Self {
            tid,
            pid,
            ktcb,
            state: AtomicU8::new(ThreadState::Running as u8),
            swexn: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ThreadState {
        match self.state.load(Ordering::SeqCst) {
            0 => ThreadState::Running,
            _ => ThreadState::Exited,
        }
    }

    pub fn mark_exited(&self) {
        self.state.store(ThreadState::Exited as u8, Ordering::SeqCst);
    }

    pub fn install_swexn(&self, handler: SwexnHandler) {
        *self.swexn.lock() = Some(handler);
    }

    pub fn take_swexn(&self) -> Option<SwexnHandler> {
        self.swexn.lock().take()
    }

    pub fn deregister_swexn(&self) {
        *self.swexn.lock() = None;
    }
}

static NEXT_TID: AtomicU32 = AtomicU32::new(1);

/// Generate a fresh, process-wide-unique tid. Grounded on the
/// original's monotonically increasing `tcb_count`/`generate_tid`.
pub fn generate_tid() -> u32 {
    NEXT_TID.fetch_add(1, Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_tid_is_monotonic_and_unique() {
        let a = generate_tid();
        let b = generate_tid();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn fresh_thread_starts_running() {
        let t = Thread::new(1, Pid(1), KtcbId(1));
        assert_eq!(t.state(), ThreadState::Running);
        t.mark_exited();
        assert_eq!(t.state(), ThreadState::Exited);
    }

    #[test]
    fn swexn_install_then_take_clears_it() {
        let t = Thread::new(2, Pid(1), KtcbId(2));
        assert!(t.take_swexn().is_none());
        t.install_swexn(SwexnHandler { eip: 0x1000, esp3: 0x2000, arg: 0 });
        let h = t.take_swexn().expect("installed");
        assert_eq!(h.eip, 0x1000);
        assert!(t.take_swexn().is_none());
    }
}
