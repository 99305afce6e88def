//! Memory-management integration tests: frame allocation/reference
//! counting, and page-directory insert/lookup/delete/cow_clone. Never
//! exercises `resolve_cow` directly — that path copies through the
//! frame's own physical address, which only a booted, identity-mapped
//! kernel can dereference safely, so it's exercised end to end via the
//! real page-fault handler instead (see `src/fault.rs`'s own tests).

#![no_std]
#![no_main]

extern crate alloc;

use pebble_kernel::mm::frame;
use pebble_kernel::mm::page_table::{EntryFlags, PageDirectory};
use pebble_kernel::serial_println;

const TEST_PHYS_BYTES: u32 = 32 * 1024 * 1024;

fn check(name: &str, ok: bool) {
    if ok {
        serial_println!("[ok] {name}");
    } else {
        serial_println!("[FAIL] {name}");
        panic!("memory_tests: {name} failed");
    }
}

fn test_frame_alloc_tracks_ref_counts() {
    let before = frame::free_count();
    let f = frame::alloc().unwrap();
    check("ref count starts at 1", frame::ref_count(f) == 1);
    check("free count drops by one", frame::free_count() == before - 1);

    frame::inc_ref(f);
    check("inc_ref bumps the count", frame::ref_count(f) == 2);

    frame::dec_ref(f);
    check("dec_ref drops it back to 1", frame::ref_count(f) == 1);

    frame::dec_ref(f);
    check("dropping the last ref frees the frame", frame::ref_count(f) == 0);
    check("free count returns to its starting value", frame::free_count() == before);
}

fn test_insert_lookup_delete_round_trip() {
    let template = PageDirectory::new_kernel_template().unwrap();
    let mut dir = PageDirectory::new(&template).unwrap();
    core::mem::forget(template);

    let frame = frame::alloc().unwrap();
    let addr = frame::USER_MEM_START + 0x40_0000;
    dir.insert(addr, frame, EntryFlags::PRESENT | EntryFlags::WRITABLE | EntryFlags::USER)
        .unwrap();

    let (found, flags) = dir.lookup(addr).unwrap();
    check("lookup returns the inserted frame", found == frame);
    check("lookup returns the inserted flags", flags.contains(EntryFlags::WRITABLE));

    let removed = dir.delete(addr);
    check("delete returns the frame that was there", removed == Some(frame));
    check("the mapping is gone after delete", dir.lookup(addr).is_none());
}

fn test_cow_clone_shares_and_protects() {
    let template = PageDirectory::new_kernel_template().unwrap();
    let mut parent = PageDirectory::new(&template).unwrap();
    let mut child = PageDirectory::new(&template).unwrap();
    core::mem::forget(template);

    let frame = frame::alloc().unwrap();
    let addr = frame::USER_MEM_START + 0x50_0000;
    parent
        .insert(addr, frame, EntryFlags::PRESENT | EntryFlags::WRITABLE | EntryFlags::USER)
        .unwrap();
    parent.cow_clone(&mut child).unwrap();

    check("cow_clone bumps the shared frame's ref count", frame::ref_count(frame) == 2);
    let (_, parent_flags) = parent.lookup(addr).unwrap();
    let (_, child_flags) = child.lookup(addr).unwrap();
    check("parent's copy is forced read-only", !parent_flags.contains(EntryFlags::WRITABLE));
    check("child's copy is read-only too", !child_flags.contains(EntryFlags::WRITABLE));
}

#[no_mangle]
pub extern "C" fn _start() -> ! {
    // SAFETY: the only code running on this CPU, before anything else
    // touches memory management.
    unsafe {
        core::mem::forget(pebble_kernel::boot(TEST_PHYS_BYTES));
    }

    serial_println!("=== memory_tests ===");
    test_frame_alloc_tracks_ref_counts();
    test_insert_lookup_delete_round_trip();
    test_cow_clone_shares_and_protects();
    serial_println!("=== memory_tests: all checks passed ===");

    pebble_kernel::arch::x86::regs::halt_loop();
}
