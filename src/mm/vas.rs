//! Address-space level operations that build on [`super::page_table`]:
//! bulk allocation/deletion for `new_pages`/`remove_pages`, and the
//! user-pointer access checks every system call runs before touching
//! caller-supplied memory.

use alloc::vec::Vec;

use crate::error::{KernelError, KernelResult};
use crate::mm::frame::{self, PAGE_SIZE};
use crate::mm::page_table::{EntryFlags, PageDirectory};

/// A `base, length` region the loader marked read-only (text or rodata).
#[derive(Debug, Clone, Copy)]
pub struct ReadOnlyRegion {
    pub base: u32,
    pub len: u32,
}

impl ReadOnlyRegion {
    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.base && addr < self.base + self.len
    }
}

fn is_page_aligned(addr: u32) -> bool {
    addr % PAGE_SIZE as u32 == 0
}

/// Allocate and zero `len` bytes of fresh, writable pages starting at
/// `base`, failing atomically (undoing any partial work) if any page in
/// the range is already mapped or memory runs out.
pub fn bulk_allocate(dir: &mut PageDirectory, base: u32, len: u32) -> KernelResult<()> {
    if !is_page_aligned(base) || !is_page_aligned(len) || len == 0 {
        return Err(KernelError::InvalidArgument {
            name: "new_pages",
            value: "base/len must be page-aligned and non-zero",
        });
    }

    let page_count = (len / PAGE_SIZE as u32) as usize;
    let mut touched = Vec::with_capacity(page_count);

    for i in 0..page_count {
        let addr = base + (i as u32) * PAGE_SIZE as u32;
        if dir.lookup(addr).is_some() {
            rollback(dir, &touched);
            return Err(KernelError::AlreadyExists {
                resource: "page",
                id: addr,
            });
        }
        match frame::alloc() {
            Ok(frame) => {
                dir.insert(addr, frame, EntryFlags::PRESENT | EntryFlags::WRITABLE | EntryFlags::USER)?;
                zero_page(addr);
                touched.push(addr);
            }
            Err(e) => {
                rollback(dir, &touched);
                return Err(e);
            }
        }
    }
    Ok(())
}

fn rollback(dir: &mut PageDirectory, touched: &[u32]) {
    for &addr in touched {
        if let Some(frame) = dir.delete(addr) {
            frame::dec_ref(frame);
        }
    }
}

fn zero_page(addr: u32) {
    // SAFETY: `addr` was just mapped writable by the caller in the active
    // directory.
    unsafe {
        core::ptr::write_bytes(addr as *mut u8, 0, PAGE_SIZE);
    }
}

/// Release a region previously reserved by [`bulk_allocate`]. `len` must
/// match the original reservation exactly (the caller tracks this via the
/// process's new-pages tracker).
pub fn bulk_delete(dir: &mut PageDirectory, base: u32, len: u32) -> KernelResult<()> {
    let page_count = (len / PAGE_SIZE as u32) as usize;
    for i in 0..page_count {
        let addr = base + (i as u32) * PAGE_SIZE as u32;
        match dir.delete(addr) {
            Some(frame) => frame::dec_ref(frame),
            None => {
                return Err(KernelError::UnmappedMemory { addr: addr as usize });
            }
        }
    }
    Ok(())
}

/// Access rights found by a region check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

/// Validate that `[start, start+len)` is entirely mapped, and — if
/// `write` is requested — entirely outside any read-only region and not
/// mapped read-only at the page-table level.
pub fn check_region(
    dir: &PageDirectory,
    text_rodata: &[ReadOnlyRegion],
    start: u32,
    len: u32,
    write: bool,
) -> KernelResult<Access> {
    if len == 0 {
        return Ok(Access::ReadOnly);
    }
    let first_page = start & !(PAGE_SIZE as u32 - 1);
    let last_page = (start + len - 1) & !(PAGE_SIZE as u32 - 1);

    let mut writable = true;
    let mut page = first_page;
    loop {
        let (_, flags) = dir.lookup(page).ok_or(KernelError::AccessDenied {
            addr: start as usize,
        })?;
        let page_is_ro = !flags.contains(EntryFlags::WRITABLE)
            || text_rodata.iter().any(|r| r.contains(page));
        if page_is_ro {
            writable = false;
            if write {
                return Err(KernelError::AccessDenied { addr: start as usize });
            }
        }
        if page == last_page {
            break;
        }
        page += PAGE_SIZE as u32;
    }
    Ok(if writable { Access::ReadWrite } else { Access::ReadOnly })
}

/// Check a NUL-terminated array of pointer-sized elements starting at
/// `start`, stopping at the first zero element. Used to validate argv
/// arrays passed to `exec`.
pub fn check_null_terminated_array(
    dir: &PageDirectory,
    text_rodata: &[ReadOnlyRegion],
    start: u32,
) -> KernelResult<usize> {
    const ELEM_SIZE: u32 = 4;
    let mut addr = start;
    let mut count = 0usize;
    loop {
        check_region(dir, text_rodata, addr, ELEM_SIZE, false)?;
        // SAFETY: `check_region` just proved `addr` is mapped and readable.
        let value = unsafe { core::ptr::read(addr as *const u32) };
        if value == 0 {
            return Ok(count);
        }
        count += 1;
        addr += ELEM_SIZE;
    }
}
