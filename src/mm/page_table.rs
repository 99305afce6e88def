//! Two-level x86-32 page directory/table engine.
//!
//! Every [`PageDirectory`] shares the same first [`KERNEL_PGD_ENTRIES`]
//! entries (the identity-mapped kernel image below [`frame::USER_MEM_START`])
//! and owns the remainder privately. Page tables are allocated lazily and
//! freed the moment their last entry is cleared.

use alloc::alloc::{alloc_zeroed, dealloc};
use core::alloc::Layout;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};

use bitflags::bitflags;

use crate::error::{KernelError, KernelResult};
use crate::mm::frame::{self, PhysAddr, PAGE_SIZE};

const ENTRIES_PER_TABLE: usize = 1024;
const PGD_SHIFT: u32 = 22;
const PT_SHIFT: u32 = 12;
const INDEX_MASK: u32 = 0x3FF;
const PGD_ENTRY_SPAN: u32 = 1 << PGD_SHIFT;

/// Number of low PGD entries every address space shares: the kernel
/// identity-maps the whole of installed physical RAM (not just the
/// pre-`USER_MEM_START` slice) so that code running in any process's
/// address space — the COW fault handler, the loader copying a blob into
/// a freshly allocated frame — can address a physical frame directly by
/// its own physical address, without a temporary mapping dance. User
/// binaries are loaded well above this range (conventionally starting
/// around 128 MiB), so the two never collide for any realistic RAM size.
/// Set once by [`PageDirectory::new_kernel_template`].
static KERNEL_PGD_ENTRIES: AtomicUsize = AtomicUsize::new((frame::USER_MEM_START >> PGD_SHIFT) as usize);

fn kernel_pgd_entries() -> usize {
    KERNEL_PGD_ENTRIES.load(Ordering::SeqCst)
}

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct EntryFlags: u32 {
        const PRESENT  = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER     = 1 << 2;
    }
}

#[repr(transparent)]
#[derive(Clone, Copy)]
struct Entry(u32);

const ADDR_MASK: u32 = 0xFFFF_F000;

impl Entry {
    const ABSENT: Entry = Entry(0);

    fn new(addr: u32, flags: EntryFlags) -> Self {
        Entry((addr & ADDR_MASK) | flags.bits())
    }

    fn is_present(self) -> bool {
        self.0 & EntryFlags::PRESENT.bits() != 0
    }

    fn addr(self) -> u32 {
        self.0 & ADDR_MASK
    }

    fn flags(self) -> EntryFlags {
        EntryFlags::from_bits_truncate(self.0 & !ADDR_MASK)
    }
}

#[repr(C, align(4096))]
struct Table([Entry; ENTRIES_PER_TABLE]);

fn alloc_table() -> KernelResult<NonNull<Table>> {
    let layout = Layout::new::<Table>();
    // SAFETY: layout is non-zero-sized and properly aligned for `Table`.
    let ptr = unsafe { alloc_zeroed(layout) };
    NonNull::new(ptr as *mut Table).ok_or(KernelError::OutOfMemory {
        requested: PAGE_SIZE,
        available: frame::free_count(),
    })
}

unsafe fn free_table(ptr: NonNull<Table>) {
    // SAFETY: `ptr` was produced by `alloc_table` with the same layout.
    unsafe {
        dealloc(ptr.as_ptr() as *mut u8, Layout::new::<Table>());
    }
}

/// A single address space's page directory.
pub struct PageDirectory {
    pgd: NonNull<Table>,
}

/// # Safety
///
/// Every `PageDirectory` is owned by exactly one `Process` at a time; the
/// pointer is never aliased across threads without going through the
/// process's own locking.
unsafe impl Send for PageDirectory {}

impl PageDirectory {
    /// Allocate an empty page directory and install the kernel's identity
    /// map in its low entries, shared by reference with every other
    /// directory's low entries (callers pass the already-built kernel PGD
    /// template to copy from).
    pub fn new(kernel_template: &PageDirectory) -> KernelResult<Self> {
        let pgd = alloc_table()?;
        let entries = kernel_pgd_entries();
        // SAFETY: `pgd` was just allocated and is not yet visible to
        // anyone else; `kernel_template` is a live, well-formed directory.
        unsafe {
            let dst = &mut (*pgd.as_ptr()).0;
            let src = &(*kernel_template.pgd.as_ptr()).0;
            dst[..entries].copy_from_slice(&src[..entries]);
        }
        Ok(Self { pgd })
    }

    /// Build the one true kernel template directory, identity-mapping all
    /// of installed physical RAM (see [`KERNEL_PGD_ENTRIES`]'s doc comment
    /// for why the whole range, not just the pre-`USER_MEM_START` slice).
    pub fn new_kernel_template() -> KernelResult<Self> {
        let pgd = alloc_table()?;
        let mut dir = Self { pgd };
        let flags = EntryFlags::PRESENT | EntryFlags::WRITABLE;
        let total = frame::total_bytes().max(frame::USER_MEM_START);
        let mut addr = PAGE_SIZE as u32;
        while addr < total {
            dir.raw_insert(addr, PhysAddr(addr), flags)?;
            addr += PAGE_SIZE as u32;
        }
        let entries = total.div_ceil(PGD_ENTRY_SPAN) as usize;
        KERNEL_PGD_ENTRIES.store(entries, Ordering::SeqCst);
        Ok(dir)
    }

    /// Physical address of this directory, for loading into CR3.
    pub fn phys_addr(&self) -> u32 {
        self.pgd.as_ptr() as u32
    }

    fn pgd_table(&self) -> &mut [Entry; ENTRIES_PER_TABLE] {
        // SAFETY: `self.pgd` is valid for the directory's whole lifetime
        // and access is serialized by the owning process's vas lock.
        unsafe { &mut (*self.pgd.as_ptr()).0 }
    }

    fn pt_table(pt_addr: u32) -> &'static mut [Entry; ENTRIES_PER_TABLE] {
        // SAFETY: `pt_addr` always comes from a present PGD entry this
        // module created via `alloc_table`, identity-mapped in kernel space.
        unsafe { &mut (*(pt_addr as *mut Table)).0 }
    }

    fn indices(linear_addr: u32) -> (usize, usize) {
        let pgd_idx = ((linear_addr >> PGD_SHIFT) & INDEX_MASK) as usize;
        let pt_idx = ((linear_addr >> PT_SHIFT) & INDEX_MASK) as usize;
        (pgd_idx, pt_idx)
    }

    /// Insert `frame` at `linear_addr`, allocating a page table if needed.
    pub fn insert(&mut self, linear_addr: u32, frame: PhysAddr, flags: EntryFlags) -> KernelResult<()> {
        self.raw_insert(linear_addr, frame, flags)
    }

    fn raw_insert(&mut self, linear_addr: u32, frame: PhysAddr, flags: EntryFlags) -> KernelResult<()> {
        let (pgd_idx, pt_idx) = Self::indices(linear_addr);
        let pgd = self.pgd_table();
        if !pgd[pgd_idx].is_present() {
            let pt = alloc_table()?;
            pgd[pgd_idx] = Entry::new(
                pt.as_ptr() as u32,
                EntryFlags::PRESENT | EntryFlags::WRITABLE | EntryFlags::USER,
            );
        }
        let pt = Self::pt_table(pgd[pgd_idx].addr());
        pt[pt_idx] = Entry::new(frame.as_u32(), flags | EntryFlags::PRESENT);
        Ok(())
    }

    /// Look up the frame and flags mapped at `linear_addr`, if any.
    pub fn lookup(&self, linear_addr: u32) -> Option<(PhysAddr, EntryFlags)> {
        let (pgd_idx, pt_idx) = Self::indices(linear_addr);
        let pgd = self.pgd_table();
        if !pgd[pgd_idx].is_present() {
            return None;
        }
        let pt = Self::pt_table(pgd[pgd_idx].addr());
        let entry = pt[pt_idx];
        entry.is_present().then(|| (PhysAddr(entry.addr()), entry.flags()))
    }

    /// Remove the mapping at `linear_addr`, returning the frame that was
    /// there. Frees the owning page table once its last entry clears,
    /// zeroing the PGD slot (the invariant the directory maintains).
    pub fn delete(&mut self, linear_addr: u32) -> Option<PhysAddr> {
        let (pgd_idx, pt_idx) = Self::indices(linear_addr);
        let pgd = self.pgd_table();
        if !pgd[pgd_idx].is_present() {
            return None;
        }
        let pt_addr = pgd[pgd_idx].addr();
        let pt = Self::pt_table(pt_addr);
        let entry = pt[pt_idx];
        if !entry.is_present() {
            return None;
        }
        pt[pt_idx] = Entry::ABSENT;

        if pt.iter().all(|e| !e.is_present()) {
            pgd[pgd_idx] = Entry::ABSENT;
            // SAFETY: `pt_addr` was allocated by this module via
            // `alloc_table` and no entry still references it.
            unsafe {
                free_table(NonNull::new_unchecked(pt_addr as *mut Table));
            }
        }
        Some(PhysAddr(entry.addr()))
    }

    /// Change the writable bit of an existing mapping in place (used by
    /// COW fault resolution when a frame's reference count has dropped to
    /// one, making the private copy step unnecessary).
    pub fn set_writable(&mut self, linear_addr: u32, writable: bool) {
        let (pgd_idx, pt_idx) = Self::indices(linear_addr);
        let pgd = self.pgd_table();
        if !pgd[pgd_idx].is_present() {
            return;
        }
        let pt = Self::pt_table(pgd[pgd_idx].addr());
        let mut flags = pt[pt_idx].flags();
        flags.set(EntryFlags::WRITABLE, writable);
        pt[pt_idx] = Entry::new(pt[pt_idx].addr(), flags);
    }

    /// Clone every present user-space mapping from `self` into `child`,
    /// bumping each frame's reference count and forcing both copies
    /// read-only so the next write takes a copy-on-write fault.
    pub fn cow_clone(&mut self, child: &mut PageDirectory) -> KernelResult<()> {
        for pgd_idx in kernel_pgd_entries()..ENTRIES_PER_TABLE {
            let src_entry = self.pgd_table()[pgd_idx];
            if !src_entry.is_present() {
                continue;
            }
            let src_pt = Self::pt_table(src_entry.addr());
            for pt_idx in 0..ENTRIES_PER_TABLE {
                let e = src_pt[pt_idx];
                if !e.is_present() {
                    continue;
                }
                let linear_addr = ((pgd_idx as u32) << PGD_SHIFT) | ((pt_idx as u32) << PT_SHIFT);
                let ro_flags = e.flags() & !EntryFlags::WRITABLE;
                src_pt[pt_idx] = Entry::new(e.addr(), ro_flags);
                child.raw_insert(linear_addr, PhysAddr(e.addr()), ro_flags)?;
                frame::inc_ref(PhysAddr(e.addr()));
            }
        }
        Ok(())
    }

    /// Tear down every user-space mapping, decrementing frame reference
    /// counts and freeing emptied page tables. Leaves the kernel's shared
    /// entries untouched. Called once per process, on the last thread's
    /// exit.
    pub fn teardown_user_mappings(&mut self) {
        for pgd_idx in kernel_pgd_entries()..ENTRIES_PER_TABLE {
            let entry = self.pgd_table()[pgd_idx];
            if !entry.is_present() {
                continue;
            }
            let pt = Self::pt_table(entry.addr());
            for e in pt.iter() {
                if e.is_present() {
                    frame::dec_ref(PhysAddr(e.addr()));
                }
            }
            self.pgd_table()[pgd_idx] = Entry::ABSENT;
            // SAFETY: no remaining entry references this table.
            unsafe {
                free_table(NonNull::new_unchecked(entry.addr() as *mut Table));
            }
        }
    }

    /// Resolve a write fault on a present, read-only user page: if the
    /// frame is uniquely owned, just flip it writable; if it's shared
    /// (COW), copy its contents into a fresh frame and remap that frame
    /// writable, dropping this address space's reference to the old one.
    pub fn resolve_cow(&mut self, linear_addr: u32) -> KernelResult<()> {
        let (frame, flags) = self.lookup(linear_addr).ok_or(KernelError::UnmappedMemory {
            addr: linear_addr as usize,
        })?;

        if frame::ref_count(frame) <= 1 {
            self.set_writable(linear_addr, true);
            return Ok(());
        }

        let new_frame = frame::alloc()?;
        let page_addr = linear_addr & !(PAGE_SIZE as u32 - 1);
        // SAFETY: both frames are identity-mapped kernel-visible user
        // memory; `page_addr` is present (just looked up above) and
        // `new_frame` was just allocated and is not yet mapped anywhere.
        unsafe {
            core::ptr::copy_nonoverlapping(
                page_addr as *const u8,
                new_frame.as_u32() as *mut u8,
                PAGE_SIZE,
            );
        }
        frame::dec_ref(frame);
        let new_flags = flags | EntryFlags::WRITABLE;
        self.raw_insert(page_addr, new_frame, new_flags)?;
        Ok(())
    }
}

impl Drop for PageDirectory {
    fn drop(&mut self) {
        // SAFETY: the directory's own allocation; callers must have
        // already run `teardown_user_mappings` to release child tables.
        unsafe {
            free_table(self.pgd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_pair() -> (PageDirectory, PageDirectory) {
        unsafe { frame::init(frame::USER_MEM_START + 64 * PAGE_SIZE as u32) };
        let template = PageDirectory::new_kernel_template().unwrap();
        let dir = PageDirectory::new(&template).unwrap();
        core::mem::forget(template);
        (dir, PageDirectory::new(&dir).unwrap())
    }

    #[test]
    fn insert_then_lookup_round_trips() {
        let (mut dir, _unused) = fresh_pair();
        let frame = frame::alloc().unwrap();
        let addr = frame::USER_MEM_START + 0x10_0000;
        dir.insert(addr, frame, EntryFlags::PRESENT | EntryFlags::WRITABLE | EntryFlags::USER)
            .unwrap();
        let (found, flags) = dir.lookup(addr).unwrap();
        assert_eq!(found, frame);
        assert!(flags.contains(EntryFlags::WRITABLE));
    }

    #[test]
    fn delete_frees_table_when_last_entry_clears() {
        let (mut dir, _unused) = fresh_pair();
        let frame = frame::alloc().unwrap();
        let addr = frame::USER_MEM_START + 0x20_0000;
        dir.insert(addr, frame, EntryFlags::PRESENT).unwrap();
        assert!(dir.delete(addr).is_some());
        assert!(dir.lookup(addr).is_none());
    }

    #[test]
    fn cow_clone_shares_frame_and_marks_both_read_only() {
        let (mut parent, mut child) = fresh_pair();
        let frame = frame::alloc().unwrap();
        let addr = frame::USER_MEM_START + 0x30_0000;
        parent
            .insert(addr, frame, EntryFlags::PRESENT | EntryFlags::WRITABLE | EntryFlags::USER)
            .unwrap();
        parent.cow_clone(&mut child).unwrap();

        assert_eq!(frame::ref_count(frame), 2);
        let (_, parent_flags) = parent.lookup(addr).unwrap();
        let (_, child_flags) = child.lookup(addr).unwrap();
        assert!(!parent_flags.contains(EntryFlags::WRITABLE));
        assert!(!child_flags.contains(EntryFlags::WRITABLE));
    }
}
