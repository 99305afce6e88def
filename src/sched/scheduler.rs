//! The scheduler: a runnable FIFO, a waiting map of descheduled threads,
//! a sleep list ordered by wake-tick, and the process table. Every
//! mutation here runs with interrupts disabled (see
//! [`crate::arch::x86::regs::without_interrupts`]).

use alloc::collections::{BTreeMap, VecDeque};

use spin::Mutex;

use crate::arch::x86::interrupts::TrapFrame;
use crate::arch::x86::{pit, regs};
use crate::error::{KernelError, KernelResult};
use crate::process::pcb::Pid;
use crate::sched::context_switch;
use crate::sched::ktcb::{self, KtcbId};

struct SchedulerState {
    runnable: VecDeque<KtcbId>,
    /// Keyed by the *waiting thread's* tid, per `deschedule`/`make_runnable`.
    waiting: BTreeMap<u32, KtcbId>,
    /// Ascending by wake tick; a linear scan is fine at this scale.
    sleeping: VecDeque<(u32, KtcbId)>,
    running: Option<KtcbId>,
    /// The reaper's own KTCB, once boot has created it.
    idle: Option<KtcbId>,
}

static STATE: Mutex<SchedulerState> = Mutex::new(SchedulerState {
    runnable: VecDeque::new(),
    waiting: BTreeMap::new(),
    sleeping: VecDeque::new(),
    running: None,
    idle: None,
});

pub fn set_idle(id: KtcbId) {
    STATE.lock().idle = Some(id);
}

/// The scheduler's own idle/reaper KTCB, once boot has created it. The
/// idle thread's entry point (see `main::idle_loop`) takes no arguments —
/// naked-`asm!` switch tails can't pass one — so it recovers its own id
/// through this accessor rather than a parameter.
pub fn idle_id() -> Option<KtcbId> {
    STATE.lock().idle
}

pub fn current() -> Option<KtcbId> {
    STATE.lock().running
}

/// Force `running` to `id` directly, for callers (`vanish`) that switch
/// via `context_switch::switch(None, ...)` outside the usual
/// `switch_to`/`switch_away_parked` bookkeeping.
pub fn set_running(id: KtcbId) {
    STATE.lock().running = Some(id);
}

/// Move a KTCB from running to the back of the runnable queue.
pub fn running_to_runnable(id: KtcbId) {
    let mut s = STATE.lock();
    s.runnable.push_back(id);
}

/// Enqueue a brand-new KTCB (just seeded, never yet switched to) as
/// runnable. Used by `fork`/`thread_fork` for the child/peer thread,
/// which has no tid registered in the waiting map to `make_runnable` out
/// of.
pub fn spawn_runnable(id: KtcbId) {
    STATE.lock().runnable.push_back(id);
}

/// Pick the next KTCB to run, falling back to the idle/reaper thread if
/// nothing else is runnable.
pub fn next() -> KtcbId {
    let mut s = STATE.lock();
    s.runnable
        .pop_front()
        .or(s.idle)
        .expect("scheduler has no runnable thread and no idle thread")
}

/// Suspend the calling KTCB until a matching `make_runnable(tid)`.
pub fn deschedule(id: KtcbId, tid: u32) {
    STATE.lock().waiting.insert(tid, id);
}

/// Wake a descheduled thread by tid, moving it back to runnable.
/// Fails if the tid is not currently in the waiting map.
pub fn make_runnable(tid: u32) -> KernelResult<KtcbId> {
    let mut s = STATE.lock();
    let id = s.waiting.remove(&tid).ok_or(KernelError::ThreadNotFound { tid })?;
    s.runnable.push_back(id);
    Ok(id)
}

pub fn is_waiting(tid: u32) -> bool {
    STATE.lock().waiting.contains_key(&tid)
}

/// Suspend the calling KTCB until at least `ticks` timer ticks elapse.
pub fn sleep_until(id: KtcbId, wake_tick: u32) {
    let mut s = STATE.lock();
    let pos = s.sleeping.partition_point(|(t, _)| *t <= wake_tick);
    s.sleeping.insert(pos, (wake_tick, id));
}

/// Called on every timer interrupt, with interrupts already disabled by
/// the trap gate: wake matured sleepers ahead of the currently-runnable
/// set, requeue the preempted thread, and switch to whatever's next.
pub fn on_timer_tick(frame: &mut TrapFrame) {
    let now = pit::on_tick();

    let mut s = STATE.lock();
    let mut woken = VecDeque::new();
    while let Some(&(wake_tick, id)) = s.sleeping.front() {
        if wake_tick > now {
            break;
        }
        s.sleeping.pop_front();
        woken.push_back(id);
    }
    for id in woken.into_iter().rev() {
        s.runnable.push_front(id);
    }

    let current = match s.running {
        Some(id) => id,
        None => return, // preempted before any thread was scheduled
    };
    if Some(current) == s.idle {
        // the reaper never preempts itself out; it yields voluntarily
        return;
    }
    s.runnable.push_back(current);
    let to_run = s.runnable.pop_front().expect("just pushed current");
    drop(s);

    if to_run == current {
        return;
    }
    switch_to(current, to_run, frame);
}

/// Perform an actual context switch away from `from` to `to`, updating
/// `running` and folding the interrupted frame's CR3 requirement in.
fn switch_to(from: KtcbId, to: KtcbId, _interrupted_frame: &TrapFrame) {
    STATE.lock().running = Some(to);
    let to_pgd = crate::process::current_pgd_for_ktcb(to);
    // SAFETY: `to` came from the runnable queue, so it is a live KTCB with
    // a previously saved context; `to_pgd` is looked up from its owning
    // process, which outlives the KTCB.
    unsafe {
        context_switch::switch(Some(from), to, to_pgd);
    }
}

/// Switch away from `me`, which has already parked itself on some other
/// wait structure (a mutex's or condvar's own queue) and must NOT be
/// re-added to the runnable queue here; the eventual waker does that.
/// Picks the next runnable KTCB (or idle) and switches to it, updating
/// `running` along the way. Used by [`crate::sync::mutex`] and
/// [`crate::sync::condvar`].
pub fn switch_away_parked(me: KtcbId) {
    let to_run = next();
    STATE.lock().running = Some(to_run);
    let to_pgd = crate::process::current_pgd_for_ktcb(to_run);
    // SAFETY: `to_run` came from `next()`, always a live KTCB.
    unsafe {
        context_switch::switch(Some(me), to_run, to_pgd);
    }
}

/// The targeted-yield priority chain: if `tid` is not directly runnable,
/// walk the chain of mutex holders blocking it until an unblocked holder
/// is found, and switch to that KTCB instead. Read-only with respect to
/// the chain; bounded by the number of live KTCBs so a corrupt chain
/// cannot loop forever.
pub fn yield_to(tid: Option<u32>) -> KernelResult<()> {
    regs::without_interrupts(|| {
        let current = STATE.lock().running.expect("yield called with no running thread");

        let target = match tid {
            Some(tid) => {
                if let Some(direct) = try_runnable_to_running(tid) {
                    Some(direct)
                } else if is_waiting(tid) {
                    return Err(KernelError::InvalidState {
                        expected: "runnable or blocked-on-mutex",
                        actual: "already waiting",
                    });
                } else {
                    Some(walk_mutex_chain(tid)?)
                }
            }
            None => None,
        };

        let to_run = match target {
            Some(id) => id,
            None => {
                let mut s = STATE.lock();
                match s.runnable.pop_front() {
                    Some(id) => id,
                    None => return Ok(()),
                }
            }
        };

        running_to_runnable(current);
        let to_pgd = crate::process::current_pgd_for_ktcb(to_run);
        STATE.lock().running = Some(to_run);
        // SAFETY: `to_run` was just taken off a live queue/chain walk.
        unsafe {
            context_switch::switch(Some(current), to_run, to_pgd);
        }
        Ok(())
    })
}

fn try_runnable_to_running(tid: u32) -> Option<KtcbId> {
    let id = ktcb::find_by_tid(tid)?;
    let mut s = STATE.lock();
    let pos = s.runnable.iter().position(|&k| k == id)?;
    s.runnable.remove(pos);
    Some(id)
}

fn walk_mutex_chain(tid: u32) -> KernelResult<KtcbId> {
    let mut holder_id = ktcb::find_by_tid(tid).ok_or(KernelError::ThreadNotFound { tid })?;
    let bound = ktcb::TABLE_BOUND;
    for _ in 0..bound {
        let blocked = ktcb::with(holder_id, |k| k.blocked_mutex)?;
        match blocked {
            None => return Ok(holder_id),
            Some(mutex_id) => {
                let next_holder = crate::sync::mutex::holder_of(mutex_id)
                    .ok_or(KernelError::InvalidState {
                        expected: "blocked mutex has a holder",
                        actual: "mutex has no holder",
                    })?;
                holder_id = next_holder;
            }
        }
    }
    Err(KernelError::InvalidState {
        expected: "mutex chain terminates",
        actual: "chain exceeded live KTCB bound",
    })
}

// --- process table -------------------------------------------------------

static PROCESSES: Mutex<BTreeMap<Pid, alloc::sync::Arc<crate::process::pcb::Process>>> =
    Mutex::new(BTreeMap::new());

pub fn add_process(pid: Pid, pcb: alloc::sync::Arc<crate::process::pcb::Process>) {
    PROCESSES.lock().insert(pid, pcb);
}

pub fn remove_process(pid: Pid) {
    PROCESSES.lock().remove(&pid);
}

pub fn find_process(pid: Pid) -> Option<alloc::sync::Arc<crate::process::pcb::Process>> {
    PROCESSES.lock().get(&pid).cloned()
}
