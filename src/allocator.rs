//! Kernel heap: a fixed range carved out of low memory, handed to
//! `linked_list_allocator` as the `#[global_allocator]` backing every
//! `alloc::sync::Arc`/`Box`/collection the kernel uses. Not compiled
//! under `cargo test`, where host `std` supplies its own allocator.

use linked_list_allocator::LockedHeap;

/// Start of the heap range. Chosen well clear of the kernel image (linked
/// at 1 MiB) and below [`crate::mm::frame::USER_MEM_START`], inside the
/// boot stub's temporary identity map of the low 16 MiB.
const HEAP_START: usize = 8 * 1024 * 1024;
const HEAP_SIZE: usize = 4 * 1024 * 1024;

#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// # Safety
///
/// Must be called exactly once, before any allocation, with
/// `[HEAP_START, HEAP_START + HEAP_SIZE)` unclaimed by anything else —
/// true at the point `boot` calls this, since the frame pool only hands
/// out frames at or above `USER_MEM_START`.
pub unsafe fn init() {
    // SAFETY: delegated to caller.
    unsafe {
        ALLOCATOR.lock().init(HEAP_START as *mut u8, HEAP_SIZE);
    }
}
