//! Condition variables, layered on [`crate::sync::mutex`]. `wait` parks
//! the calling thread on the condvar's own FIFO and atomically releases
//! the associated mutex via [`mutex::cond_unlock`]; `signal`/`broadcast`
//! wake waiters by moving them back onto the runnable queue.

use alloc::collections::{BTreeMap, VecDeque};

use spin::Mutex as SpinMutex;

use crate::arch::x86::regs;
use crate::error::{KernelError, KernelResult};
use crate::sched::ktcb::KtcbId;
use crate::sched::scheduler;
use crate::sync::mutex::{self, MutexId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CondId(pub u32);

static NEXT_ID: SpinMutex<u32> = SpinMutex::new(1);
static TABLE: SpinMutex<BTreeMap<CondId, VecDeque<KtcbId>>> = SpinMutex::new(BTreeMap::new());

pub fn create() -> CondId {
    let mut next = NEXT_ID.lock();
    let id = CondId(*next);
    *next += 1;
    TABLE.lock().insert(id, VecDeque::new());
    id
}

pub fn destroy(id: CondId) -> KernelResult<()> {
    let mut table = TABLE.lock();
    let waiters = table
        .get(&id)
        .ok_or(KernelError::NotFound { resource: "condvar", id: id.0 })?;
    if !waiters.is_empty() {
        return Err(KernelError::InvalidState {
            expected: "no threads waiting on this condition",
            actual: "condition variable has waiters",
        });
    }
    table.remove(&id);
    Ok(())
}

/// Atomically release `mutex_id` and block `me` on `id`, re-acquiring
/// the mutex before returning. Mirrors `cond_wait`: the enqueue onto the
/// condvar's wait list and the mutex release happen with interrupts
/// disabled so a concurrent `signal` can't slip in between.
pub fn wait(id: CondId, mutex_id: MutexId, me: KtcbId) -> KernelResult<()> {
    regs::without_interrupts(|| {
        {
            let mut table = TABLE.lock();
            let waiters = table
                .get_mut(&id)
                .ok_or(KernelError::NotFound { resource: "condvar", id: id.0 })?;
            waiters.push_back(me);
        }
        mutex::cond_unlock(mutex_id, me)?;
        scheduler::switch_away_parked(me);
        Ok::<(), KernelError>(())
    })?;

    mutex::lock(mutex_id, me)
}

/// Wake one waiter, if any, moving it straight to runnable.
pub fn signal(id: CondId) -> KernelResult<()> {
    regs::without_interrupts(|| {
        let woken = {
            let mut table = TABLE.lock();
            let waiters = table
                .get_mut(&id)
                .ok_or(KernelError::NotFound { resource: "condvar", id: id.0 })?;
            waiters.pop_front()
        };
        if let Some(to_run) = woken {
            scheduler::running_to_runnable(to_run);
        }
        Ok(())
    })
}

/// Wake every waiter, moving each to runnable in FIFO order.
pub fn broadcast(id: CondId) -> KernelResult<()> {
    regs::without_interrupts(|| {
        let mut table = TABLE.lock();
        let waiters = table
            .get_mut(&id)
            .ok_or(KernelError::NotFound { resource: "condvar", id: id.0 })?;
        while let Some(to_run) = waiters.pop_front() {
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
    fn signal_on_empty_condvar_is_a_noop() {
        let id = create();
        assert!(signal(id).is_ok());
        assert!(destroy(id).is_ok());
    }

    #[test]
    fn destroy_with_waiters_fails() {
        let id = create();
        TABLE.lock().get_mut(&id).unwrap().push_back(KtcbId(1));
        assert!(destroy(id).is_err());
        TABLE.lock().get_mut(&id).unwrap().clear();
        TABLE.lock().remove(&id);
    }
}
