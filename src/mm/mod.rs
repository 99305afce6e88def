//! Virtual and physical memory management: the frame pool, the two-level
//! page-table engine, and address-space-level bulk operations.

pub mod frame;
pub mod page_table;
pub mod vas;

use crate::error::KernelResult;
use crate::mm::page_table::PageDirectory;

/// Build the shared kernel template directory every process's page
/// directory is cloned from, then initialize the frame pool above it.
///
/// # Safety
///
/// Must run once at boot, after the bootloader-reported physical memory
/// size is known, before any process is created.
pub unsafe fn init(total_phys_bytes: u32) -> KernelResult<PageDirectory> {
    // SAFETY: boot-time, single-threaded.
    unsafe {
        frame::init(total_phys_bytes);
    }
    PageDirectory::new_kernel_template()
}
