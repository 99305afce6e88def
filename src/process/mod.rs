//! Process and thread lifecycle: PCBs/TCBs, `fork`/`thread_fork`,
//! `exec`, `wait`, and `vanish`.

pub mod exec;
pub mod exit;
pub mod fork;
pub mod loader;
pub mod pcb;
pub mod thread;
pub mod wait;

use alloc::collections::BTreeMap;
use alloc::sync::Arc;

use spin::Mutex;

use crate::sched::ktcb::KtcbId;

static OWNERS: Mutex<BTreeMap<KtcbId, Arc<pcb::Process>>> = Mutex::new(BTreeMap::new());
static KERNEL_PGD: Mutex<Option<u32>> = Mutex::new(None);

/// Record the kernel template page directory's physical address, used
/// as the CR3 value whenever a KTCB with no bound process runs (the
/// idle/reaper thread, and any KTCB between `vanish` and reap).
pub fn set_kernel_pgd(phys: u32) {
    *KERNEL_PGD.lock() = Some(phys);
}

/// The kernel template directory's physical address, installed as CR3
/// whenever a process is tearing down its own (about to be freed)
/// directory — `vanish` switches here first, exactly as the original
/// switches to `kern_pgd` before calling `pgd_process_cleanup`.
pub fn kernel_pgd() -> u32 {
    KERNEL_PGD.lock().expect("kernel pgd recorded during boot")
}

/// Bind a KTCB to the process whose address space it should run under.
/// Every thread's dedicated KTCB is bound to its own process for the
/// KTCB's lifetime; rebinding (e.g. after `exec`) just overwrites the
/// entry.
pub fn bind_ktcb_to_process(ktcb: KtcbId, process: Arc<pcb::Process>) {
    OWNERS.lock().insert(ktcb, process);
}

pub fn unbind_ktcb(ktcb: KtcbId) {
    OWNERS.lock().remove(&ktcb);
}

pub fn owning_process(ktcb: KtcbId) -> Option<Arc<pcb::Process>> {
    OWNERS.lock().get(&ktcb).cloned()
}

/// The physical page-directory address the context switch should load
/// when resuming `ktcb`: its owning process's directory, or the kernel
/// template for unbound (idle/reaper) KTCBs.
pub fn current_pgd_for_ktcb(ktcb: KtcbId) -> u32 {
    if let Some(process) = owning_process(ktcb) {
        return process.dir.lock().phys_addr();
    }
    KERNEL_PGD.lock().expect("kernel pgd recorded during boot")
}
