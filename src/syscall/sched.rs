//! `yield`/`deschedule`/`make_runnable`/`sleep`/`get_ticks`: the
//! cooperative-suspension and timing syscalls, layered directly on
//! [`crate::sched::scheduler`].

use alloc::sync::Arc;

use crate::arch::x86::{pit, regs};
use crate::error::{KernelError, KernelResult};
use crate::mm::vas;
use crate::process::pcb::Process;
use crate::sched::ktcb::KtcbId;
use crate::sched::scheduler;

pub fn sys_yield(target_tid: Option<u32>) -> KernelResult<()> {
    scheduler::yield_to(target_tid)
}

/// `deschedule(&flag)`: block the caller unless `*flag != 0` at the
/// moment it's checked. The read-and-park has to happen with interrupts
/// disabled so a `make_runnable` from another thread (or the timer IRQ)
/// can't slip in between the check and the park.
pub fn sys_deschedule(process: &Arc<Process>, me: KtcbId, caller_tid: u32, flag_ptr: u32) -> KernelResult<()> {
    let regions = process.regions();
    {
        let dir = process.dir.lock();
        vas::check_region(&dir, &regions, flag_ptr, 4, false)?;
    }
    regs::without_interrupts(|| {
        // SAFETY: validated readable just above.
        if unsafe { core::ptr::read(flag_ptr as *const u32) } != 0 {
            return Ok(());
        }
        scheduler::deschedule(me, caller_tid);
        scheduler::switch_away_parked(me);
        Ok(())
    })
}

pub fn sys_make_runnable(tid: u32) -> KernelResult<()> {
    scheduler::make_runnable(tid).map(|_| ())
}

pub fn sys_sleep(me: KtcbId, ticks: i32) -> KernelResult<()> {
    if ticks < 0 {
        return Err(KernelError::InvalidArgument { name: "ticks", value: "must be >= 0" });
    }
    if ticks == 0 {
        return Ok(());
    }
    let wake_tick = pit::get_ticks().wrapping_add(ticks as u32);
    regs::without_interrupts(|| {
        scheduler::sleep_until(me, wake_tick);
        scheduler::switch_away_parked(me);
    });
    Ok(())
}

pub fn sys_get_ticks() -> u32 {
    pit::get_ticks()
}
