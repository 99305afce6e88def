//! Builds a fresh address space from a compiled-in ELF blob: identity
//! kernel mappings, a two-page user stack pre-seeded with the
//! argc/argv/stack-hi/stack-lo quadruple `_main` expects, and the
//! text/rodata/data/bss segments copied in with the appropriate
//! permissions.

use alloc::string::String;
use alloc::vec::Vec;

use crate::elf::Segment;
use crate::error::{KernelError, KernelResult};
use crate::fs;
use crate::mm::frame::PAGE_SIZE;
use crate::mm::page_table::{EntryFlags, PageDirectory};
use crate::mm::vas::ReadOnlyRegion;

/// Below this address, two pages are mapped for the initial user stack;
/// matches the conventional 410 `USER_STACK_BASE` (the high end of a
/// process's address space).
pub const USER_STACK_BASE: u32 = 0xC000_0000;

pub struct LoadedImage {
    pub entry: u32,
    pub initial_esp: u32,
    pub txt: ReadOnlyRegion,
    pub rodata: ReadOnlyRegion,
}

fn map_segment(dir: &mut PageDirectory, seg: &Segment, bytes: &[u8], writable: bool) -> KernelResult<()> {
    if seg.mem_size == 0 {
        return Ok(());
    }
    let start = seg.vaddr & !(PAGE_SIZE as u32 - 1);
    let end = (seg.vaddr + seg.mem_size + PAGE_SIZE as u32 - 1) & !(PAGE_SIZE as u32 - 1);
    let mut addr = start;
    let mut flags = EntryFlags::PRESENT | EntryFlags::USER;
    if writable {
        flags |= EntryFlags::WRITABLE;
    }
    while addr < end {
        let frame = crate::mm::frame::alloc()?;
        // SAFETY: `frame` was just allocated and is identity-mapped in
        // every address space's low entries (see page_table's kernel
        // template), so it's directly writable by physical address
        // before the new directory is even switched to.
        unsafe {
            core::ptr::write_bytes(frame.as_u32() as *mut u8, 0, PAGE_SIZE);
        }
        dir.insert(addr, frame, flags | EntryFlags::WRITABLE)?;
        addr += PAGE_SIZE as u32;
    }

    if !bytes.is_empty() {
        let file_start = seg.file_offset as usize;
        let file_end = file_start + seg.file_size as usize;
        let src = bytes
            .get(file_start..file_end)
            .ok_or(KernelError::InvalidArgument { name: "elf", value: "segment out of range" })?;
        // SAFETY: every page of `[start, end)` was just mapped above and
        // is writable via its identity-mapped physical address.
        unsafe {
            core::ptr::copy_nonoverlapping(src.as_ptr(), seg.vaddr as *mut u8, src.len());
        }
    }

    if !writable {
        let mut addr = start;
        while addr < end {
            dir.set_writable(addr, false);
            addr += PAGE_SIZE as u32;
        }
    }
    Ok(())
}

/// Lay out argc/argv and the stack-hi/stack-lo bounds at
/// `USER_STACK_BASE`, per the original loader's fixed offsets: argc at
/// +4, argv at +8, stack_hi at +12, stack_lo at +16, the argv string
/// pointer array starting at +20.
fn write_argv(argv: &[String]) -> KernelResult<()> {
    let base = USER_STACK_BASE;
    let argc = argv.len() as i32;

    let array_start = (base + 20) as *mut u32;
    let mut content_offset = 20 + (argv.len() as u32 + 1) * 4;

    let mut pointers = Vec::with_capacity(argv.len());
    for arg in argv {
        let dst = (base + content_offset) as *mut u8;
        // SAFETY: both pages below `base` were mapped writable by the
        // caller before this function runs.
        unsafe {
            core::ptr::copy_nonoverlapping(arg.as_bytes().as_ptr(), dst, arg.len());
            *dst.add(arg.len()) = 0;
        }
        pointers.push(base + content_offset);
        content_offset += arg.len() as u32 + 1;
    }

    // SAFETY: `array_start` and the quadruple below are within the
    // freshly mapped two-page stack.
    unsafe {
        for (i, ptr) in pointers.iter().enumerate() {
            *array_start.add(i) = *ptr;
        }
        *array_start.add(pointers.len()) = 0;

        *(base as *mut i32).add(1) = argc;
        *((base as *mut u32).add(2)) = base + 20;
        *((base as *mut u32).add(3)) = base + PAGE_SIZE as u32;
        *((base as *mut u32).add(4)) = base - PAGE_SIZE as u32;
    }
    Ok(())
}

/// Build a complete address space for `filename`, mapping the kernel
/// template, the two-page initial stack, and the ELF segments, and
/// writing the argv block. Returns the entry point and initial `esp`
/// for the crafted kernel stack to resume into.
///
/// Segment contents and the argv block are written through the
/// segments' own (non-identity) virtual addresses, so CR3 must already
/// point at `dir` when this is called — `exec`/`fork`'s loader path
/// switches to the new directory first, exactly as the original's
/// `load_prog` does before copying anything in.
pub fn load(dir: &mut PageDirectory, filename: &str, argv: &[String]) -> KernelResult<LoadedImage> {
    let file = fs::find(filename)?;
    let image = crate::elf::image_from_elf(file.bytes)?;

    let stack_low = USER_STACK_BASE - PAGE_SIZE as u32;
    let mut addr = stack_low;
    while addr < USER_STACK_BASE + PAGE_SIZE as u32 {
        let frame = crate::mm::frame::alloc()?;
        dir.insert(
            addr,
            frame,
            EntryFlags::PRESENT | EntryFlags::WRITABLE | EntryFlags::USER,
        )?;
        addr += PAGE_SIZE as u32;
    }

    map_segment(dir, &image.text, file.bytes, false)?;
    map_segment(dir, &image.rodata, file.bytes, false)?;
    map_segment(dir, &image.data, file.bytes, true)?;
    map_segment(dir, &image.bss, &[], true)?;

    write_argv(argv)?;

    Ok(LoadedImage {
        entry: image.entry,
        initial_esp: USER_STACK_BASE,
        txt: ReadOnlyRegion { base: image.text.vaddr, len: image.text.mem_size },
        rodata: ReadOnlyRegion { base: image.rodata.vaddr, len: image.rodata.mem_size },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_not_found() {
        assert!(matches!(fs::find("does-not-exist"), Err(KernelError::NotFound { .. })));
    }
}
