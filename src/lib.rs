//! Pebble kernel: a preemptive, single-CPU, 32-bit protected-mode x86
//! kernel. This crate is the kernel proper — everything reachable from
//! [`boot`] — while `src/main.rs` supplies the bare-metal entry point
//! (multiboot header, temporary boot-time paging, `kernel_main`) that
//! calls into it.
//!
//! Built `no_std` for the real target; compiled against host `std` under
//! `cargo test` so the scheduler/process/memory unit tests in each
//! module can run without a custom test harness.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[cfg(not(test))]
mod allocator;

pub mod arch;
pub mod console;
pub mod elf;
pub mod error;
pub mod exception;
pub mod fault;
pub mod fs;
pub mod logger;
pub mod mm;
pub mod print;
pub mod process;
pub mod sched;
pub mod serial;
pub mod sync;
pub mod syscall;

/// Bring up logging, the heap, memory management, and architecture
/// support, in the order each depends on the last one. Returns the
/// kernel template page directory; the caller installs it as CR3 once
/// the boot stub's own temporary mapping is no longer needed, and must
/// keep the returned value alive forever (its physical page is also the
/// CR3 every unbound KTCB switches to — see
/// [`process::set_kernel_pgd`]).
///
/// # Safety
///
/// Must run exactly once, very early in boot, single-threaded, with
/// `total_phys_bytes` no larger than the machine's installed physical
/// memory and interrupts still disabled.
#[cfg(not(test))]
pub unsafe fn boot(total_phys_bytes: u32) -> mm::page_table::PageDirectory {
    logger::init(log::LevelFilter::Info);
    log::info!(
        "pebble-kernel {} booting, {} MiB physical memory assumed",
        env!("CARGO_PKG_VERSION"),
        total_phys_bytes / (1024 * 1024)
    );

    // SAFETY: delegated to caller — runs once, before any allocation.
    unsafe {
        allocator::init();
    }

    // SAFETY: delegated to caller — runs once, before any frame/page
    // directory operation.
    let kernel_dir = unsafe { mm::init(total_phys_bytes).expect("mm::init") };
    process::set_kernel_pgd(kernel_dir.phys_addr());
    log::info!("memory management initialized");

    // SAFETY: delegated to caller — runs once, before interrupts are
    // enabled and before any segment-relative state is touched.
    unsafe {
        arch::x86::init();
    }
    log::info!("gdt/idt/pic/pit initialized");

    kernel_dir
}

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    log::error!("kernel panic: {info}");
    arch::x86::regs::halt_loop();
}
