//! Process/thread/synchronization integration tests: KTCB stack seeding,
//! mutex/condvar lifecycle, and process/thread bookkeeping. As with the
//! other integration suites, boots the kernel for a real heap and frame
//! pool, then runs assertion-based checks over serial.

#![no_std]
#![no_main]

extern crate alloc;

use alloc::sync::Arc;

use pebble_kernel::mm::page_table::PageDirectory;
use pebble_kernel::mm::vas::ReadOnlyRegion;
use pebble_kernel::process::pcb::{Pid, Process};
use pebble_kernel::process::thread::{self, Thread};
use pebble_kernel::sched::ktcb;
use pebble_kernel::serial_println;
use pebble_kernel::sync::{condvar, mutex};

const TEST_PHYS_BYTES: u32 = 32 * 1024 * 1024;

fn check(name: &str, ok: bool) {
    if ok {
        serial_println!("[ok] {name}");
    } else {
        serial_println!("[FAIL] {name}");
        panic!("process_tests: {name} failed");
    }
}

unsafe extern "C" fn dummy_entry() -> ! {
    loop {
        pebble_kernel::arch::x86::regs::hlt();
    }
}

fn test_seed_kernel_entry_writes_resumable_frame() {
    let id = ktcb::alloc().unwrap();
    ktcb::seed_kernel_entry(id, dummy_entry).unwrap();

    let esp = ktcb::with(id, |k| k.context.esp).unwrap();
    let esp0 = ktcb::with(id, |k| k.context.esp0).unwrap();
    check("seeded esp sits 24 bytes below esp0", esp == esp0 - 24);

    // SAFETY: reading back the exact words `seed_kernel_entry` wrote,
    // before anything switches into this KTCB.
    let (ebp, edi, esi, ebx, eflags, ret) = unsafe {
        let slot = esp as *const u32;
        (
            slot.add(0).read(),
            slot.add(1).read(),
            slot.add(2).read(),
            slot.add(3).read(),
            slot.add(4).read(),
            slot.add(5).read(),
        )
    };
    check("ebp starts zeroed", ebp == 0);
    check("edi starts zeroed", edi == 0);
    check("esi starts zeroed", esi == 0);
    check("ebx starts zeroed", ebx == 0);
    check("eflags has IF set", eflags == 0x202);
    check("return address is the entry function", ret == dummy_entry as usize as u32);
}

fn test_seed_user_entry_carries_eax_through() {
    let id = ktcb::alloc().unwrap();
    ktcb::seed_user_entry(id, 0x1000, 0x2000, 42).unwrap();

    let esp = ktcb::with(id, |k| k.context.esp).unwrap();
    let esp0 = ktcb::with(id, |k| k.context.esp0).unwrap();
    check("seed_user_entry also parks 24 bytes below esp0", esp == esp0 - 24);

    // SAFETY: reading back the exact words `seed_user_entry` wrote, before
    // anything switches into this KTCB.
    let (edi, esi, ebx) = unsafe {
        let slot = esp as *const u32;
        (slot.add(1).read(), slot.add(2).read(), slot.add(3).read())
    };
    check("edi carries the initial eax value", edi == 42);
    check("esi carries the user stack pointer", esi == 0x2000);
    check("ebx carries the entry point", ebx == 0x1000);
}

fn test_mutex_lifecycle() {
    let id = mutex::create();
    check("fresh mutex has no holder", mutex::holder_of(id).is_none());

    let me = ktcb::alloc().unwrap();
    mutex::lock(id, me).unwrap();
    check("lock with no contention succeeds immediately", mutex::holder_of(id) == Some(me));

    mutex::unlock(id, me).unwrap();
    check("unlock with no waiters clears the holder", mutex::holder_of(id).is_none());

    check("destroying an idle mutex succeeds", mutex::destroy(id).is_ok());
}

fn test_condvar_lifecycle() {
    let id = condvar::create();
    check("destroying a fresh condvar succeeds", condvar::destroy(id).is_ok());
    check("destroying an already-removed condvar fails", condvar::destroy(id).is_err());
}

fn test_process_and_thread_bookkeeping() {
    let template = PageDirectory::new_kernel_template().unwrap();
    let dir = PageDirectory::new(&template).unwrap();
    core::mem::forget(template);

    let region = ReadOnlyRegion { base: 0, len: 0 };
    let pid = Pid(9500);
    let proc = Arc::new(Process::new(pid, None, dir, region, region));
    check("a fresh process starts with no threads", proc.thread_count() == 0);

    let tid = thread::generate_tid();
    let ktcb_id = ktcb::alloc().unwrap();
    let t = Arc::new(Thread::new(tid, pid, ktcb_id));
    proc.insert_thread(t.clone());
    check("insert_thread is reflected in thread_count", proc.thread_count() == 1);
    check("find_thread locates it by tid", proc.find_thread(tid).is_some());

    t.mark_exited();
    check("all_threads_exited is true once the only thread exits", proc.all_threads_exited());
}

#[no_mangle]
pub extern "C" fn _start() -> ! {
    // SAFETY: the only code running on this CPU, before anything else
    // touches memory management or the scheduler.
    unsafe {
        core::mem::forget(pebble_kernel::boot(TEST_PHYS_BYTES));
    }

    serial_println!("=== process_tests ===");
    test_seed_kernel_entry_writes_resumable_frame();
    test_seed_user_entry_carries_eax_through();
    test_mutex_lifecycle();
    test_condvar_lifecycle();
    test_process_and_thread_bookkeeping();
    serial_println!("=== process_tests: all checks passed ===");

    pebble_kernel::arch::x86::regs::halt_loop();
}
