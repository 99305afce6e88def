//! `new_pages`/`remove_pages`: page-aligned bulk reservation backed by
//! [`crate::mm::vas`], tracked per-process so `remove_pages` can validate
//! its argument is exactly a prior allocation's base.

use alloc::sync::Arc;

use crate::error::KernelResult;
use crate::mm::vas;
use crate::process::pcb::Process;

pub fn new_pages(process: &Arc<Process>, base: u32, len: u32) -> KernelResult<()> {
    vas::bulk_allocate(&mut process.dir.lock(), base, len)?;
    process.track_pages_allocated(base, len)?;
    Ok(())
}

pub fn remove_pages(process: &Arc<Process>, base: u32) -> KernelResult<()> {
    let range = process.untrack_pages_allocated(base)?;
    vas::bulk_delete(&mut process.dir.lock(), range.base, range.len)
}
