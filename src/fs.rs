//! Compiled-in read-only file table: the kernel's only notion of a
//! filesystem is a linker-provided table of named blobs (user program
//! images), looked up by `exec` and the `readfile` syscall.

use crate::error::{KernelError, KernelResult};

pub struct FileEntry {
    pub name: &'static str,
    pub bytes: &'static [u8],
}

/// Populated at build time from the bundled user binaries. Empty until
/// real blobs are linked in; lookups simply fail with `NotFound` until
/// then, matching `getbytes`'s "name not in table of contents" path.
pub static TABLE: &[FileEntry] = &[];

pub fn find(name: &str) -> KernelResult<&'static FileEntry> {
    TABLE
        .iter()
        .find(|e| e.name == name)
        .ok_or(KernelError::NotFound { resource: "file", id: 0 })
}

/// Copy up to `buf.len()` bytes starting at `offset` from the named
/// file into `buf`. Mirrors `getbytes`: returns the number of bytes
/// actually copied, which may be less than `buf.len()` near EOF.
pub fn read_bytes(name: &str, offset: usize, buf: &mut [u8]) -> KernelResult<usize> {
    let entry = find(name)?;
    if offset > entry.bytes.len() {
        return Ok(0);
    }
    let available = &entry.bytes[offset..];
    let n = available.len().min(buf.len());
    buf[..n].copy_from_slice(&available[..n]);
    Ok(n)
}
