//! Kernel-thread pool: each KTCB bundles a dedicated kernel stack and the
//! handful of callee-saved registers a context switch needs to resume it.
//!
//! Unlike the fixed-size free-list pool this is modeled on, KTCBs here are
//! heap-allocated on demand and dropped on `vanish`/reap — the global table
//! itself (a [`spin::Mutex`]-guarded [`BTreeMap`]) plays the role of the
//! pool, the same arena pattern used for processes and threads.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;

use spin::Mutex;

use crate::error::{KernelError, KernelResult};

/// Bytes per kernel stack. One page is enough for syscall handlers and
/// fault delivery; nothing here recurses deeply.
pub const KERNEL_STACK_SIZE: usize = 4096;

/// Unique id for a kernel thread, identical to the owning user thread's
/// tid whenever one is bound (root threads are also KTCBs before any TCB
/// exists, during the early boot sequence).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct KtcbId(pub u32);

/// The callee-saved register set a context switch swaps, plus the two
/// stack-segment values the TSS needs on the next trap from user mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct SavedContext {
    pub esp: u32,
    pub ebp: u32,
    pub ebx: u32,
    pub esi: u32,
    pub edi: u32,
    /// Top of this KTCB's kernel stack, reloaded into the TSS's esp0 on
    /// every switch so the next trap lands here.
    pub esp0: u32,
}

pub struct Ktcb {
    pub id: KtcbId,
    pub context: SavedContext,
    /// The user thread this kernel thread is currently bound to, if any;
    /// `None` for the scheduler's own idle/reaper thread.
    pub tid: Option<u32>,
    /// The mutex this KTCB is blocked on, read by the targeted-yield
    /// priority-chain walk in [`crate::sched::scheduler::yield_to`].
    pub blocked_mutex: Option<crate::sync::mutex::MutexId>,
    stack: Box<[u8; KERNEL_STACK_SIZE]>,
}

impl Ktcb {
    pub fn stack_top(&self) -> u32 {
        // SAFETY-relevant only in that this address must stay valid for
        // the KTCB's lifetime; `stack` is boxed so it won't move.
        self.stack.as_ptr() as u32 + KERNEL_STACK_SIZE as u32
    }
}

static NEXT_ID: Mutex<u32> = Mutex::new(1);
// Boxed so a KTCB's address (and in particular `context.esp`'s address)
// stays stable across inserts/removes of *other* entries — `raw_switch`
// takes a raw pointer into a parked KTCB's context that must outlive any
// BTreeMap node rebalancing that happens while it's parked.
static TABLE: Mutex<BTreeMap<KtcbId, Box<Ktcb>>> = Mutex::new(BTreeMap::new());

/// Upper bound on live KTCBs a chain walk may visit before concluding the
/// chain is corrupt, rather than looping forever on a cycle.
pub const TABLE_BOUND: usize = 4096;

fn next_id() -> KtcbId {
    let mut guard = NEXT_ID.lock();
    let id = *guard;
    *guard += 1;
    KtcbId(id)
}

/// Allocate a fresh KTCB with an empty kernel stack, ready for a new
/// thread's initial register frame to be pushed onto it.
pub fn alloc() -> KernelResult<KtcbId> {
    let id = next_id();
    let stack = Box::new([0u8; KERNEL_STACK_SIZE]);
    let esp0 = stack.as_ptr() as u32 + KERNEL_STACK_SIZE as u32;
    let ktcb = Ktcb {
        id,
        context: SavedContext {
            esp0,
            esp: esp0,
            ..Default::default()
        },
        tid: None,
        blocked_mutex: None,
        stack,
    };
    TABLE.lock().insert(id, Box::new(ktcb));
    Ok(id)
}

/// Release a KTCB's resources. Called from `vanish` once the thread has
/// transitioned to EXITED and will never be switched to again.
pub fn free(id: KtcbId) {
    TABLE.lock().remove(&id);
}

pub fn with<R>(id: KtcbId, f: impl FnOnce(&Ktcb) -> R) -> KernelResult<R> {
    let table = TABLE.lock();
    let ktcb = table.get(&id).ok_or(KernelError::ThreadNotFound { tid: id.0 })?;
    Ok(f(ktcb))
}

pub fn with_mut<R>(id: KtcbId, f: impl FnOnce(&mut Ktcb) -> R) -> KernelResult<R> {
    let mut table = TABLE.lock();
    let ktcb = table.get_mut(&id).ok_or(KernelError::ThreadNotFound { tid: id.0 })?;
    Ok(f(ktcb))
}

pub fn find_by_tid(tid: u32) -> Option<KtcbId> {
    TABLE.lock().iter().find(|(_, k)| k.tid == Some(tid)).map(|(id, _)| *id)
}

/// Bind `id` to the user thread id it now carries. Called once a KTCB is
/// handed to a freshly created [`crate::process::thread::Thread`], so
/// `find_by_tid` and the syscall dispatcher's "which tid is this" lookup
/// both see it.
pub fn bind_tid(id: KtcbId, tid: u32) -> KernelResult<()> {
    with_mut(id, |k| k.tid = Some(tid))
}

/// Seed a freshly allocated KTCB to resume directly in a niladic,
/// never-returning `extern "C"` function the first time it's switched
/// to. Used only for the kernel's own idle/reaper thread and the very
/// first process's bootstrap, which run (briefly, for the latter) in
/// ring 0 and so skip `seed_user_entry`'s user-mode trampoline.
pub fn seed_kernel_entry(id: KtcbId, entry: unsafe extern "C" fn() -> !) -> KernelResult<()> {
    with_mut(id, |k| {
        let frame_top = k.context.esp0 - 24;
        // SAFETY: `frame_top` is within this KTCB's own freshly
        // allocated, untouched stack.
        unsafe {
            let slot = frame_top as *mut u32;
            slot.add(0).write(0); // ebp
            slot.add(1).write(0); // edi
            slot.add(2).write(0); // esi
            slot.add(3).write(0); // ebx
            slot.add(4).write(0x202); // eflags, IF set
            slot.add(5).write(entry as usize as u32); // return address
        }
        k.context.esp = frame_top;
    })
}

/// Raw pointer to a live KTCB's `context.esp` field, for `raw_switch` to
/// store the outgoing `esp` into without any Rust code running after the
/// stack has been swapped. Valid as long as the KTCB is not freed; safe
/// to take because the table boxes each KTCB (see `TABLE`'s doc comment).
pub fn context_esp_slot(id: KtcbId) -> KernelResult<*mut u32> {
    let mut table = TABLE.lock();
    let ktcb = table.get_mut(&id).ok_or(KernelError::ThreadNotFound { tid: id.0 })?;
    Ok(&mut ktcb.context.esp as *mut u32)
}

/// Seed a freshly allocated KTCB's context so that its first switch-in
/// lands in [`crate::arch::x86::usermode::new_thread_trampoline`] with
/// `ebx`/`esi`/`edi` preloaded — the trampoline reads them as
/// entry/user_esp/initial_eax and `iretd`s straight into user mode.
/// Used by `fork` (child), `thread_fork` (peer thread), and process
/// bootstrap; `exec` instead calls
/// [`crate::arch::x86::usermode::enter_usermode`] directly since it
/// replaces the calling thread's own image rather than switching to a
/// new one.
pub fn seed_user_entry(id: KtcbId, entry: u32, user_esp: u32, initial_eax: u32) -> KernelResult<()> {
    with_mut(id, |k| {
        let trampoline = crate::arch::x86::usermode::new_thread_trampoline as usize as u32;
        // Layout matches context_switch::raw_switch's pop order exactly:
        // pop ebp, edi, esi, ebx, popf, then `ret` into the return
        // address sitting just above them.
        let frame_top = k.context.esp0 - 24;
        // SAFETY: `frame_top` is within this KTCB's own freshly
        // allocated, untouched stack.
        unsafe {
            let slot = frame_top as *mut u32;
            slot.add(0).write(0); // ebp
            slot.add(1).write(initial_eax); // edi
            slot.add(2).write(user_esp); // esi
            slot.add(3).write(entry); // ebx
            slot.add(4).write(0x202); // eflags, IF set
            slot.add(5).write(trampoline); // return address
        }
        k.context.esp = frame_top;
    })
}
