//! Minimal ELF32 parsing: validates the header, then walks the program
//! header table to recover the four loadable segments (text, rodata,
//! data, bss) the loader maps into a fresh address space. No relocation,
//! no dynamic linking — every user binary here is a statically linked,
//! non-PIE executable with one `PT_LOAD` segment per permission class.

use crate::error::{KernelError, KernelResult};

const EI_MAG: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const ELFCLASS32: u8 = 1;
const ET_EXEC: u16 = 2;

const PT_LOAD: u32 = 1;
const PF_X: u32 = 1;
const PF_W: u32 = 2;

const EHDR_SIZE: usize = 52;
const PHDR_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, Default)]
pub struct Segment {
    pub vaddr: u32,
    pub file_offset: u32,
    pub file_size: u32,
    pub mem_size: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ElfImage {
    pub entry: u32,
    pub text: Segment,
    pub rodata: Segment,
    pub data: Segment,
    pub bss: Segment,
}

fn read_u16(bytes: &[u8], off: usize) -> KernelResult<u16> {
    let slice: [u8; 2] = bytes
        .get(off..off + 2)
        .and_then(|s| s.try_into().ok())
        .ok_or(KernelError::InvalidArgument { name: "elf", value: "truncated header" })?;
    Ok(u16::from_le_bytes(slice))
}

fn read_u32(bytes: &[u8], off: usize) -> KernelResult<u32> {
    let slice: [u8; 4] = bytes
        .get(off..off + 4)
        .and_then(|s| s.try_into().ok())
        .ok_or(KernelError::InvalidArgument { name: "elf", value: "truncated header" })?;
    Ok(u32::from_le_bytes(slice))
}

/// Validate the ELF32 header and recover the entry point. Mirrors
/// `elf_load_helper`'s own sanity checks before it hands back a
/// `simple_elf_t`.
fn parse_header(bytes: &[u8]) -> KernelResult<u32> {
    if bytes.len() < EHDR_SIZE || bytes[0..4] != EI_MAG {
        return Err(KernelError::InvalidArgument { name: "elf", value: "bad magic" });
    }
    if bytes[4] != ELFCLASS32 {
        return Err(KernelError::InvalidArgument { name: "elf", value: "not 32-bit" });
    }
    let e_type = read_u16(bytes, 16)?;
    if e_type != ET_EXEC {
        return Err(KernelError::InvalidArgument { name: "elf", value: "not an executable" });
    }
    read_u32(bytes, 24)
}

/// Parse the ELF32 header and walk its program header table, classifying
/// each `PT_LOAD` entry by its permission flags into the text (`PF_X`),
/// data (`PF_W`) or rodata (neither) slot. A `PT_LOAD` segment whose
/// `p_memsz` exceeds its `p_filesz` carries its own zero-filled tail
/// (the loader's `map_segment` already zeros the full mapped range before
/// copying file bytes in), so no separate bss `PT_LOAD` entry is needed
/// for the common case of bss appended to the data segment; `bss` is
/// only populated when a distinct zero-file-size `PT_LOAD` segment is
/// found (matching the original's separately tracked `e_bssstart`).
pub fn image_from_elf(bytes: &[u8]) -> KernelResult<ElfImage> {
    let entry = parse_header(bytes)?;

    let phoff = read_u32(bytes, 28)? as usize;
    let phentsize = read_u16(bytes, 42)? as usize;
    let phnum = read_u16(bytes, 44)? as usize;

    let mut image = ElfImage { entry, ..ElfImage::default() };

    for i in 0..phnum {
        let off = phoff + i * phentsize.max(PHDR_SIZE);
        let p_type = read_u32(bytes, off)?;
        if p_type != PT_LOAD {
            continue;
        }
        let seg = Segment {
            file_offset: read_u32(bytes, off + 4)?,
            vaddr: read_u32(bytes, off + 8)?,
            file_size: read_u32(bytes, off + 16)?,
            mem_size: read_u32(bytes, off + 20)?,
        };
        let flags = read_u32(bytes, off + 24)?;

        if seg.file_size == 0 && seg.mem_size > 0 {
            image.bss = seg;
        } else if flags & PF_X != 0 {
            image.text = seg;
        } else if flags & PF_W != 0 {
            image.data = seg;
        } else {
            image.rodata = seg;
        }
    }

    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_header(class: u8, e_type: u16, entry: u32, phoff: u32, phentsize: u16, phnum: u16) -> [u8; 52] {
        let mut h = [0u8; 52];
        h[0..4].copy_from_slice(&EI_MAG);
        h[4] = class;
        h[16..18].copy_from_slice(&e_type.to_le_bytes());
        h[24..28].copy_from_slice(&entry.to_le_bytes());
        h[28..32].copy_from_slice(&phoff.to_le_bytes());
        h[42..44].copy_from_slice(&phentsize.to_le_bytes());
        h[44..46].copy_from_slice(&phnum.to_le_bytes());
        h
    }

    fn write_phdr(buf: &mut Vec<u8>, off: usize, p_type: u32, p_offset: u32, p_vaddr: u32, filesz: u32, memsz: u32, flags: u32) {
        buf.resize(buf.len().max(off + PHDR_SIZE), 0);
        buf[off..off + 4].copy_from_slice(&p_type.to_le_bytes());
        buf[off + 4..off + 8].copy_from_slice(&p_offset.to_le_bytes());
        buf[off + 8..off + 12].copy_from_slice(&p_vaddr.to_le_bytes());
        buf[off + 16..off + 20].copy_from_slice(&filesz.to_le_bytes());
        buf[off + 20..off + 24].copy_from_slice(&memsz.to_le_bytes());
        buf[off + 24..off + 28].copy_from_slice(&flags.to_le_bytes());
    }

    #[test]
    fn valid_header_returns_entry() {
        let h = make_header(ELFCLASS32, ET_EXEC, 0x0804_8000, 52, PHDR_SIZE as u16, 0);
        assert_eq!(parse_header(&h).unwrap(), 0x0804_8000);
    }

    #[test]
    fn wrong_magic_rejected() {
        let mut h = make_header(ELFCLASS32, ET_EXEC, 0x1000, 52, PHDR_SIZE as u16, 0);
        h[0] = 0;
        assert!(parse_header(&h).is_err());
    }

    #[test]
    fn non_executable_type_rejected() {
        let h = make_header(ELFCLASS32, 1, 0x1000, 52, PHDR_SIZE as u16, 0);
        assert!(parse_header(&h).is_err());
    }

    #[test]
    fn truncated_header_rejected() {
        assert!(parse_header(&[0x7f, b'E', b'L', b'F']).is_err());
    }

    #[test]
    fn program_headers_classify_by_flags() {
        let phoff = EHDR_SIZE;
        let mut bytes = make_header(ELFCLASS32, ET_EXEC, 0x1000, phoff as u32, PHDR_SIZE as u16, 3).to_vec();
        write_phdr(&mut bytes, phoff, PT_LOAD, 0x1000, 0x1000, 0x500, 0x500, PF_X);
        write_phdr(&mut bytes, phoff + PHDR_SIZE, PT_LOAD, 0x1500, 0x2000, 0x200, 0x200, 0);
        write_phdr(&mut bytes, phoff + 2 * PHDR_SIZE, PT_LOAD, 0x1700, 0x3000, 0x100, 0x400, PF_W);

        let image = image_from_elf(&bytes).unwrap();
        assert_eq!(image.entry, 0x1000);
        assert_eq!(image.text.vaddr, 0x1000);
        assert_eq!(image.text.file_size, 0x500);
        assert_eq!(image.rodata.vaddr, 0x2000);
        assert_eq!(image.data.vaddr, 0x3000);
        assert_eq!(image.data.mem_size, 0x400);
        assert_eq!(image.bss.mem_size, 0);
    }

    #[test]
    fn zero_file_size_segment_is_bss() {
        let phoff = EHDR_SIZE;
        let mut bytes = make_header(ELFCLASS32, ET_EXEC, 0x1000, phoff as u32, PHDR_SIZE as u16, 1).to_vec();
        write_phdr(&mut bytes, phoff, PT_LOAD, 0, 0x4000, 0, 0x1000, PF_W);

        let image = image_from_elf(&bytes).unwrap();
        assert_eq!(image.bss.vaddr, 0x4000);
        assert_eq!(image.bss.mem_size, 0x1000);
    }
}
