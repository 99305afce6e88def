//! Kernel-internal mutex used to guard the handful of structures the
//! scheduler itself can't take a `spin::Mutex` on without deadlocking a
//! blocked thread against the timer interrupt (the runnable queue, wait
//! queues, and so on have their own lock-free or spinlock protocols
//! instead). This is the queue-based blocking lock user-visible
//! concurrency primitives in `syscall::mutex_*` are built on: a locked
//! mutex parks the caller's KTCB on a FIFO wait queue and context-switches
//! away, rather than spinning.

use alloc::collections::{BTreeMap, VecDeque};

use spin::Mutex as SpinMutex;

use crate::arch::x86::regs;
use crate::error::{KernelError, KernelResult};
use crate::sched::ktcb::KtcbId;
use crate::sched::scheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MutexId(pub u32);

struct MutexState {
    holder: Option<KtcbId>,
    waiters: VecDeque<KtcbId>,
}

static NEXT_ID: SpinMutex<u32> = SpinMutex::new(1);
static TABLE: SpinMutex<BTreeMap<MutexId, MutexState>> = SpinMutex::new(BTreeMap::new());

pub fn create() -> MutexId {
    let mut next = NEXT_ID.lock();
    let id = MutexId(*next);
    *next += 1;
    TABLE.lock().insert(
        id,
        MutexState {
            holder: None,
            waiters: VecDeque::new(),
        },
    );
    id
}

pub fn destroy(id: MutexId) -> KernelResult<()> {
    let mut table = TABLE.lock();
    let state = table
        .get(&id)
        .ok_or(KernelError::NotFound { resource: "mutex", id: id.0 })?;
    if state.holder.is_some() || !state.waiters.is_empty() {
        return Err(KernelError::InvalidState {
            expected: "unlocked mutex with no waiters",
            actual: "mutex is held or has waiters",
        });
    }
    table.remove(&id);
    Ok(())
}

/// Who currently holds `id`, read by the targeted-yield priority chain.
pub fn holder_of(id: MutexId) -> Option<KtcbId> {
    TABLE.lock().get(&id)?.holder
}

/// Acquire `id`, blocking the calling KTCB if it is already held.
/// Mirrors `mutex_lock`: enqueue onto the mutex's own wait queue and
/// switch away, rather than the generic scheduler sleep list, since a
/// targeted unlock wakes exactly one waiter by identity.
pub fn lock(id: MutexId, me: KtcbId) -> KernelResult<()> {
    regs::without_interrupts(|| {
        let became_holder = {
            let mut table = TABLE.lock();
            let state = table
                .get_mut(&id)
                .ok_or(KernelError::NotFound { resource: "mutex", id: id.0 })?;
            if state.holder.is_none() {
                state.holder = Some(me);
                true
            } else {
                state.waiters.push_back(me);
                let _ = crate::sched::ktcb::with_mut(me, |k| k.blocked_mutex = Some(id));
                false
            }
        };

        if !became_holder {
            scheduler::switch_away_parked(me);
            let _ = crate::sched::ktcb::with_mut(me, |k| k.blocked_mutex = None);
        }
        Ok(())
    })
}

/// Release `id`. If a waiter is queued, ownership transfers directly to
/// it (`mutex_unlock`'s handoff) instead of going through the generic
/// runnable queue, so the next lock attempt never races a third thread.
pub fn unlock(id: MutexId, me: KtcbId) -> KernelResult<()> {
    regs::without_interrupts(|| {
        let next_holder = {
            let mut table = TABLE.lock();
            let state = table
                .get_mut(&id)
                .ok_or(KernelError::NotFound { resource: "mutex", id: id.0 })?;
            if state.holder != Some(me) {
                return Err(KernelError::PermissionDenied { operation: "mutex_unlock" });
            }
            let woken = state.waiters.pop_front();
            state.holder = woken;
            woken
        };

        if let Some(to_run) = next_holder {
            let _ = crate::sched::ktcb::with_mut(to_run, |k| k.blocked_mutex = None);
            scheduler::running_to_runnable(to_run);
        }
        Ok(())
    })
}

/// Atomically release `id` and park `me` without making it runnable
/// again — the caller (`condvar::wait`) has already enqueued `me` on the
/// condition variable's own wait queue and will be the one to requeue it.
/// Mirrors `mutex_cond_unlock`.
pub fn cond_unlock(id: MutexId, me: KtcbId) -> KernelResult<()> {
    regs::without_interrupts(|| {
        let next_holder = {
            let mut table = TABLE.lock();
            let state = table
                .get_mut(&id)
                .ok_or(KernelError::NotFound { resource: "mutex", id: id.0 })?;
            if state.holder != Some(me) {
                return Err(KernelError::PermissionDenied { operation: "mutex_cond_unlock" });
            }
            let woken = state.waiters.pop_front();
            state.holder = woken;
            woken
        };
        if let Some(to_run) = next_holder {
            let _ = crate::sched::ktcb::with_mut(to_run, |k| k.blocked_mutex = None);
            scheduler::running_to_runnable(to_run);
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_destroy_round_trips() {
        let id = create();
        assert!(destroy(id).is_ok());
    }

    #[test]
    fn destroy_held_mutex_fails() {
        let id = create();
        TABLE.lock().get_mut(&id).unwrap().holder = Some(KtcbId(1));
        assert!(destroy(id).is_err());
        TABLE.lock().remove(&id);
    }
}
