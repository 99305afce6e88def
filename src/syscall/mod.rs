//! System call dispatch: the single `int 0x80` gate (`idt.rs` installs one
//! DPL3 trap gate, not one per call, a deliberate break from the classic
//! one-gate-per-number scheme) hands every call to [`dispatch`], which reads
//! the call number from `frame.eax` and a single scalar/pointer argument
//! from `frame.ebx`. Calls that take more than one argument pack them as a
//! contiguous array of `u32` words in user memory and pass a pointer to the
//! block in `ebx`; [`read_packed`] validates and copies that block.
//!
//! Handlers are split by concern the way `examples/doublegate-VeridianOS`
//! splits its own syscall table: [`lifecycle`] (process/thread birth and
//! death), [`sched`] (scheduling and timing), [`mem`] (the page-granularity
//! allocator), [`io`] (console and file I/O), and [`exception`] (`swexn`).

mod exception;
mod io;
mod lifecycle;
mod mem;
mod sched;

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::arch::x86::interrupts::TrapFrame;
use crate::error::{KernelError, KernelResult};
use crate::mm::vas;
use crate::process::pcb::Process;
use crate::process::thread::Thread;
use crate::sched::ktcb::{self, KtcbId};
use crate::sched::scheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
enum SyscallNumber {
    Fork = 0,
    ThreadFork = 1,
    Exec = 2,
    Wait = 3,
    Vanish = 4,
    SetStatus = 5,
    Yield = 6,
    Deschedule = 7,
    MakeRunnable = 8,
    Sleep = 9,
    GetTicks = 10,
    NewPages = 11,
    RemovePages = 12,
    GetTid = 13,
    Print = 14,
    Readline = 15,
    GetChar = 16,
    ReadFile = 17,
    Swexn = 18,
    SetTermColor = 19,
    SetCursorPos = 20,
    GetCursorPos = 21,
    Halt = 22,
    TaskVanish = 23,
}

impl SyscallNumber {
    fn from_u32(n: u32) -> Option<Self> {
        Some(match n {
            0 => Self::Fork,
            1 => Self::ThreadFork,
            2 => Self::Exec,
            3 => Self::Wait,
            4 => Self::Vanish,
            5 => Self::SetStatus,
            6 => Self::Yield,
            7 => Self::Deschedule,
            8 => Self::MakeRunnable,
            9 => Self::Sleep,
            10 => Self::GetTicks,
            11 => Self::NewPages,
            12 => Self::RemovePages,
            13 => Self::GetTid,
            14 => Self::Print,
            15 => Self::Readline,
            16 => Self::GetChar,
            17 => Self::ReadFile,
            18 => Self::Swexn,
            19 => Self::SetTermColor,
            20 => Self::SetCursorPos,
            21 => Self::GetCursorPos,
            22 => Self::Halt,
            23 => Self::TaskVanish,
            _ => return None,
        })
    }
}

struct Context {
    me: KtcbId,
    tid: u32,
    process: Arc<Process>,
    thread: Arc<Thread>,
}

fn current_context() -> Option<Context> {
    let me = scheduler::current()?;
    let tid = ktcb::with(me, |k| k.tid).ok()??;
    let process = crate::process::owning_process(me)?;
    let thread = process.find_thread(tid)?;
    Some(Context { me, tid, process, thread })
}

const ERRNO_FAIL: u32 = -1i32 as u32;

/// Entry point called by `common_handler` for `VEC_SYSCALL`. Writes the
/// call's return value (or `-1` on any failure) back into `frame.eax`; the
/// three calls that never return here (`vanish`, `task_vanish`, `halt`)
/// divert control flow before this ever happens.
pub fn dispatch(frame: &mut TrapFrame) {
    let Some(number) = SyscallNumber::from_u32(frame.eax) else {
        log::debug!("unknown syscall number {}", frame.eax);
        frame.eax = ERRNO_FAIL;
        return;
    };

    let Some(ctx) = current_context() else {
        log::debug!("syscall {number:?} dispatched with no resolvable calling thread");
        frame.eax = ERRNO_FAIL;
        return;
    };

    match number {
        SyscallNumber::Vanish => lifecycle::sys_vanish(&ctx.process, ctx.me, ctx.tid),
        SyscallNumber::TaskVanish => lifecycle::sys_task_vanish(&ctx.process, ctx.me, ctx.tid, frame.ebx as i32),
        SyscallNumber::Halt => lifecycle::sys_halt(),
        _ => {
            let result = run(number, frame, &ctx);
            frame.eax = match result {
                Ok(value) => value,
                Err(e) => {
                    log::debug!("syscall {number:?} failed: {e}");
                    ERRNO_FAIL
                }
            };
        }
    }
}

fn run(number: SyscallNumber, frame: &mut TrapFrame, ctx: &Context) -> KernelResult<u32> {
    let arg = frame.ebx;

    match number {
        SyscallNumber::Fork => lifecycle::sys_fork(&ctx.process, ctx.me, ctx.tid, frame).map(|pid| pid.0),
        SyscallNumber::ThreadFork => lifecycle::sys_thread_fork(&ctx.process, frame),
        SyscallNumber::Exec => {
            let packed: [u32; 2] = read_packed(&ctx.process, arg)?;
            lifecycle::sys_exec(&ctx.process, packed[0], packed[1]).map(|()| 0)
        }
        SyscallNumber::Wait => {
            let status_ptr = if arg == 0 { None } else { Some(arg) };
            lifecycle::sys_wait(&ctx.process, ctx.me, status_ptr).map(|pid| pid.0)
        }
        SyscallNumber::SetStatus => lifecycle::sys_set_status(&ctx.process, arg as i32).map(|()| 0),
        SyscallNumber::Yield => {
            let target = if arg == u32::MAX { None } else { Some(arg) };
            sched::sys_yield(target).map(|()| 0)
        }
        SyscallNumber::Deschedule => sched::sys_deschedule(&ctx.process, ctx.me, ctx.tid, arg).map(|()| 0),
        SyscallNumber::MakeRunnable => sched::sys_make_runnable(arg).map(|()| 0),
        SyscallNumber::Sleep => sched::sys_sleep(ctx.me, arg as i32).map(|()| 0),
        SyscallNumber::GetTicks => Ok(sched::sys_get_ticks()),
        SyscallNumber::NewPages => {
            let packed: [u32; 2] = read_packed(&ctx.process, arg)?;
            mem::new_pages(&ctx.process, packed[0], packed[1]).map(|()| 0)
        }
        SyscallNumber::RemovePages => mem::remove_pages(&ctx.process, arg).map(|()| 0),
        SyscallNumber::GetTid => Ok(ctx.tid),
        SyscallNumber::Print => {
            let packed: [u32; 2] = read_packed(&ctx.process, arg)?;
            io::sys_print(&ctx.process, packed[1], packed[0]).map(|()| 0)
        }
        SyscallNumber::Readline => {
            let packed: [u32; 2] = read_packed(&ctx.process, arg)?;
            io::sys_readline(&ctx.process, ctx.me, packed[1], packed[0]).map(|n| n as u32)
        }
        SyscallNumber::GetChar => io::sys_getchar().map(|b| b as u32),
        SyscallNumber::ReadFile => {
            let packed: [u32; 4] = read_packed(&ctx.process, arg)?;
            io::sys_readfile(&ctx.process, packed[0], packed[1], packed[2], packed[3]).map(|n| n as u32)
        }
        SyscallNumber::Swexn => {
            let packed: [u32; 4] = read_packed(&ctx.process, arg)?;
            exception::sys_swexn(&ctx.process, &ctx.thread, frame, packed[0], packed[1], packed[2], packed[3])
                .map(|()| 0)
        }
        SyscallNumber::SetTermColor => io::sys_set_term_color(arg & 0xF, (arg >> 4) & 0xF).map(|()| 0),
        SyscallNumber::SetCursorPos => {
            let packed: [u32; 2] = read_packed(&ctx.process, arg)?;
            io::sys_set_cursor_pos(packed[0], packed[1]).map(|()| 0)
        }
        SyscallNumber::GetCursorPos => {
            let packed: [u32; 2] = read_packed(&ctx.process, arg)?;
            io::sys_write_cursor_pos_out(&ctx.process, packed[0], packed[1]).map(|()| 0)
        }
        SyscallNumber::Vanish | SyscallNumber::TaskVanish | SyscallNumber::Halt => {
            unreachable!("diverging calls are handled directly in dispatch")
        }
    }
}

/// Validate and copy `N` contiguous `u32` words of `process`'s own address
/// space starting at `ptr`, the packed-argument-block convention every
/// multi-argument call above uses.
fn read_packed<const N: usize>(process: &Arc<Process>, ptr: u32) -> KernelResult<[u32; N]> {
    let regions = process.regions();
    let dir = process.dir.lock();
    vas::check_region(&dir, &regions, ptr, (N * 4) as u32, false)?;
    let mut out = [0u32; N];
    // SAFETY: `check_region` just proved `N * 4` bytes starting at `ptr`
    // are mapped and readable.
    unsafe {
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = core::ptr::read((ptr + (i as u32) * 4) as *const u32);
        }
    }
    Ok(out)
}

/// Read a NUL-terminated string out of `process`'s address space, failing
/// rather than reading past `max_len` bytes.
fn read_c_string(process: &Arc<Process>, ptr: u32, max_len: usize) -> KernelResult<String> {
    let regions = process.regions();
    let dir = process.dir.lock();
    let mut bytes = Vec::new();
    let mut addr = ptr;
    loop {
        vas::check_region(&dir, &regions, addr, 1, false)?;
        // SAFETY: just validated readable above.
        let byte = unsafe { core::ptr::read(addr as *const u8) };
        if byte == 0 {
            break;
        }
        bytes.push(byte);
        addr += 1;
        if bytes.len() >= max_len {
            return Err(KernelError::InvalidArgument { name: "string", value: "exceeds max length" });
        }
    }
    String::from_utf8(bytes).map_err(|_| KernelError::InvalidArgument { name: "string", value: "not valid utf8" })
}
