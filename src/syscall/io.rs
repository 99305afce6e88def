//! Console and file I/O syscalls: `print`, `readline`, `getchar`,
//! `readfile`, `set_term_color`, `set_cursor_pos`, `get_cursor_pos`.

use alloc::sync::Arc;

use crate::console::{self, keyboard};
use crate::error::{KernelError, KernelResult};
use crate::fs;
use crate::mm::vas;
use crate::process::pcb::Process;
use crate::sched::ktcb::KtcbId;

pub fn sys_print(process: &Arc<Process>, buf_ptr: u32, len: u32) -> KernelResult<()> {
    let regions = process.regions();
    let dir = process.dir.lock();
    vas::check_region(&dir, &regions, buf_ptr, len, false)?;
    // SAFETY: `check_region` just proved `len` bytes at `buf_ptr` are
    // mapped and readable.
    let bytes = unsafe { core::slice::from_raw_parts(buf_ptr as *const u8, len as usize) };
    let text =
        core::str::from_utf8(bytes).map_err(|_| KernelError::InvalidArgument { name: "print", value: "not valid utf8" })?;
    crate::print!("{text}");
    Ok(())
}

pub fn sys_readline(process: &Arc<Process>, me: KtcbId, buf_ptr: u32, len: u32) -> KernelResult<usize> {
    let regions = process.regions();
    {
        let dir = process.dir.lock();
        vas::check_region(&dir, &regions, buf_ptr, len, true)?;
    }
    // SAFETY: validated writable above; nothing unmaps a running thread's
    // own buffer while it waits for a line.
    let out = unsafe { core::slice::from_raw_parts_mut(buf_ptr as *mut u8, len as usize) };
    keyboard::readline(me, out)
}

pub fn sys_getchar() -> KernelResult<u8> {
    keyboard::getchar()
}

pub fn sys_readfile(process: &Arc<Process>, filename_ptr: u32, offset: u32, buf_ptr: u32, len: u32) -> KernelResult<usize> {
    let filename = super::read_c_string(process, filename_ptr, 64)?;
    let regions = process.regions();
    {
        let dir = process.dir.lock();
        vas::check_region(&dir, &regions, buf_ptr, len, true)?;
    }
    // SAFETY: validated writable above.
    let out = unsafe { core::slice::from_raw_parts_mut(buf_ptr as *mut u8, len as usize) };
    fs::read_bytes(&filename, offset as usize, out)
}

pub fn sys_set_term_color(fg: u32, bg: u32) -> KernelResult<()> {
    console::set_term_color(fg as u8, bg as u8)
}

pub fn sys_set_cursor_pos(row: u32, col: u32) -> KernelResult<()> {
    console::set_cursor_pos(row as usize, col as usize)
}

pub fn sys_write_cursor_pos_out(process: &Arc<Process>, row_ptr: u32, col_ptr: u32) -> KernelResult<()> {
    let regions = process.regions();
    {
        let dir = process.dir.lock();
        vas::check_region(&dir, &regions, row_ptr, 4, true)?;
        vas::check_region(&dir, &regions, col_ptr, 4, true)?;
    }
    let (row, col) = console::cursor_pos();
    // SAFETY: both pointers were validated writable above.
    unsafe {
        core::ptr::write(row_ptr as *mut u32, row as u32);
        core::ptr::write(col_ptr as *mut u32, col as u32);
    }
    Ok(())
}
