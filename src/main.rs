//! Bare-metal entry point: a multiboot v1 header, a `_start` boot stub
//! that identity-maps the low 16 MiB with 4 MiB pages and enables
//! paging, and `kernel_main`, which hands off to
//! [`pebble_kernel::boot`], installs the real kernel page directory,
//! seeds the idle/reaper thread and the dedicated reaper process, loads
//! the first process if one is bundled, and switches into it.

#![no_std]
#![no_main]

extern crate alloc;

use alloc::string::String;
use alloc::sync::Arc;
use core::arch::naked_asm;

use pebble_kernel::arch::x86::regs;
use pebble_kernel::mm::page_table::PageDirectory;
use pebble_kernel::mm::vas::ReadOnlyRegion;
use pebble_kernel::process;
use pebble_kernel::process::exit::{self, INIT_PID};
use pebble_kernel::process::fork;
use pebble_kernel::process::loader;
use pebble_kernel::process::pcb::Process;
use pebble_kernel::process::thread::{self, Thread};
use pebble_kernel::sched::{context_switch, ktcb, scheduler};

/// Physical memory assumed to be installed. The bootloader passes a
/// memory map in `ebx` per the multiboot spec; parsing it is out of
/// scope here, so the boot stub assumes a fixed, conservative amount
/// instead (see `DESIGN.md`).
const ASSUMED_PHYS_BYTES: u32 = 64 * 1024 * 1024;

const MULTIBOOT_MAGIC: u32 = 0x1BAD_B002;
const MULTIBOOT_FLAGS: u32 = 0;

#[repr(C)]
struct MultibootHeader {
    magic: u32,
    flags: u32,
    checksum: u32,
}

#[used]
#[unsafe(link_section = ".multiboot_header")]
static MULTIBOOT_HEADER: MultibootHeader = MultibootHeader {
    magic: MULTIBOOT_MAGIC,
    flags: MULTIBOOT_FLAGS,
    checksum: 0u32.wrapping_sub(MULTIBOOT_MAGIC).wrapping_sub(MULTIBOOT_FLAGS),
};

const BOOT_STACK_SIZE: usize = 64 * 1024;

#[repr(align(16))]
struct BootStack([u8; BOOT_STACK_SIZE]);

static mut BOOT_STACK: BootStack = BootStack([0; BOOT_STACK_SIZE]);

const TEMP_PGD_ENTRIES: usize = 1024;
const IDENTITY_MAP_MIB: u32 = 16;
const FOUR_MIB: u32 = 4 * 1024 * 1024;
const PDE_PRESENT: u32 = 1 << 0;
const PDE_WRITABLE: u32 = 1 << 1;
const PDE_PAGE_SIZE_4M: u32 = 1 << 7;
const CR4_PSE: u32 = 1 << 4;
const CR0_PG: u32 = 1 << 31;

#[repr(C, align(4096))]
struct TempPageDirectory([u32; TEMP_PGD_ENTRIES]);

static mut TEMP_PGD: TempPageDirectory = TempPageDirectory([0; TEMP_PGD_ENTRIES]);

/// Fill in the low `IDENTITY_MAP_MIB / 4` entries of [`TEMP_PGD`] as
/// present, writable, 4 MiB (PSE) pages mapping physical == linear —
/// just enough to keep the kernel image, boot stack, and heap range
/// resident once `_start` flips `CR0.PG`. Replaced wholesale by the
/// real, page-granular directory `mm::init` builds, once `kernel_main`
/// installs it as CR3.
///
/// # Safety
///
/// Must run exactly once, before paging is enabled, with no other
/// access to `TEMP_PGD` in flight (true at the point `_start` calls
/// this: single CPU, interrupts not yet live).
unsafe extern "C" fn fill_temp_pgd() {
    let entries = (IDENTITY_MAP_MIB * 1024 * 1024) / FOUR_MIB;
    // SAFETY: delegated to caller.
    unsafe {
        for i in 0..entries {
            TEMP_PGD.0[i as usize] = (i * FOUR_MIB) | PDE_PRESENT | PDE_WRITABLE | PDE_PAGE_SIZE_4M;
        }
    }
}

/// Entry point named by `link.ld`'s `ENTRY(_start)`. The bootloader
/// hands control here with paging disabled and no stack guaranteed;
/// this sets up both, builds a temporary identity map covering the
/// kernel image and boot structures, enables paging, and calls into
/// `kernel_main` on a normal Rust stack.
#[unsafe(no_mangle)]
#[unsafe(naked)]
unsafe extern "C" fn _start() -> ! {
    naked_asm!(
        "lea esp, [{stack} + {stack_size}]",
        "call {fill_pgd}",
        "lea eax, [{pgd}]",
        "mov cr3, eax",
        "mov eax, cr4",
        "or eax, {pse}",
        "mov cr4, eax",
        "mov eax, cr0",
        "or eax, {pg}",
        "mov cr0, eax",
        "jmp 2f",
        "2:",
        "call {kmain}",
        "3:",
        "hlt",
        "jmp 3b",
        stack = sym BOOT_STACK,
        stack_size = const BOOT_STACK_SIZE,
        fill_pgd = sym fill_temp_pgd,
        pgd = sym TEMP_PGD,
        pse = const CR4_PSE,
        pg = const CR0_PG,
        kmain = sym kernel_main,
    )
}

const INIT_PROGRAM_NAME: &str = "init";

/// Build the dedicated reaper process (`process::exit::INIT_PID`,
/// `Pid(1)`) that the idle KTCB's [`process::exit::reaper_loop`] collects
/// orphaned, fully-exited processes on behalf of. It owns no code of its
/// own — just a page directory and an empty children map — and is never
/// scheduled as a runnable thread; only its children/condvar bookkeeping
/// is used.
fn create_reaper_process(kernel_template: &PageDirectory) -> Arc<Process> {
    let dir = PageDirectory::new(kernel_template).expect("alloc reaper directory");
    let empty = ReadOnlyRegion { base: 0, len: 0 };
    let reaper = Arc::new(Process::new(INIT_PID, None, dir, empty, empty));
    scheduler::add_process(INIT_PID, reaper.clone());
    reaper
}

/// Build the first loaded user process from the compiled-in file table,
/// if a program named `"init"` is present. Its pid is drawn from the same
/// counter `fork` uses (`Pid(1)` is reserved for the dedicated reaper
/// process built by [`create_reaper_process`]). Returns its seeded KTCB
/// and page directory's physical address, ready to switch into directly.
fn boot_first_process(
    kernel_template: &PageDirectory,
) -> Option<(ktcb::KtcbId, u32)> {
    if pebble_kernel::fs::find(INIT_PROGRAM_NAME).is_err() {
        return None;
    }

    let mut dir = PageDirectory::new(kernel_template).expect("alloc process directory");
    let dir_phys = dir.phys_addr();

    // SAFETY: `dir_phys` was just built with the kernel's shared entries
    // copied in; installing it now lets `loader::load` write segment
    // contents through the new directory's own virtual addresses,
    // exactly as `process::exec` does before calling it.
    unsafe {
        regs::set_cr3(dir_phys);
    }

    let image = loader::load(&mut dir, INIT_PROGRAM_NAME, &[String::from(INIT_PROGRAM_NAME)])
        .expect("load init program");

    let pid = fork::generate_pid();
    let tid = thread::generate_tid();
    let ktcb_id = ktcb::alloc().expect("init process ktcb alloc");
    let proc = Arc::new(Process::new(pid, None, dir, image.txt, image.rodata));
    let first_thread = Arc::new(Thread::new(tid, pid, ktcb_id));
    proc.insert_thread(first_thread);
    process::bind_ktcb_to_process(ktcb_id, proc.clone());
    ktcb::bind_tid(ktcb_id, tid).expect("bind init process tid");
    ktcb::seed_user_entry(ktcb_id, image.entry, image.initial_esp, 0).expect("seed init process entry");

    scheduler::add_process(pid, proc);
    Some((ktcb_id, dir_phys))
}

/// Runs forever on the idle KTCB whenever no user thread is runnable:
/// the kernel's reaper loop (see [`process::exit::reaper_loop`]).
unsafe extern "C" fn idle_loop() -> ! {
    let me = scheduler::idle_id().expect("idle ktcb id set before first switch into it");
    exit::reaper_loop(me)
}

/// Called by `_start` once paging is live on the temporary identity map.
/// Brings the kernel proper up via `pebble_kernel::boot`, replaces the
/// temporary mapping with the real kernel directory, seeds the idle/reaper
/// thread, creates the dedicated reaper process, loads the first user
/// process if one is bundled, and switches into whichever of the two
/// should run first. Never returns.
unsafe extern "C" fn kernel_main() -> ! {
    // SAFETY: called exactly once, immediately after `_start` enables
    // paging; interrupts are still disabled.
    let kernel_dir = unsafe { pebble_kernel::boot(ASSUMED_PHYS_BYTES) };
    let kernel_pgd_phys = kernel_dir.phys_addr();

    // SAFETY: `kernel_pgd_phys` is the real, fully populated directory
    // `mm::init` just built; it supersedes the boot stub's temporary
    // 16 MiB PSE mapping, which covered only a prefix of it.
    unsafe {
        regs::set_cr3(kernel_pgd_phys);
    }

    let idle = ktcb::alloc().expect("idle ktcb alloc");
    scheduler::set_idle(idle);
    ktcb::seed_kernel_entry(idle, idle_loop).expect("seed idle ktcb");

    create_reaper_process(&kernel_dir);

    let first = boot_first_process(&kernel_dir);
    // The template's own root table must outlive every process (its
    // physical address is `process::kernel_pgd()`'s CR3 target for as
    // long as the kernel runs); never drop it.
    core::mem::forget(kernel_dir);

    match first {
        Some((first_ktcb, first_pgd)) => {
            log::info!("switching into init process");
            // SAFETY: `first_ktcb` was just seeded above and bound to
            // its own freshly built directory; there is no outgoing
            // kernel thread to save.
            unsafe {
                context_switch::switch(None, first_ktcb, first_pgd);
            }
        }
        None => {
            log::warn!("no \"init\" program in the compiled-in file table; idling");
            // SAFETY: `idle` was just seeded above; no outgoing thread.
            unsafe {
                context_switch::switch(None, idle, kernel_pgd_phys);
            }
        }
    }

    regs::halt_loop()
}
