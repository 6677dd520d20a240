//! Guest image loaders: Verilog-style hex dumps and ELF executables.

use goblin::elf::program_header::PT_LOAD;
use goblin::elf::Elf;
use log::debug;
use thiserror::Error;

use crate::memory::Memory;

/// What an ELF loader run produced.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LoadedImage {
    /// The ELF entry point.
    pub entry_point: u64,
    /// End of the highest loaded segment.
    pub exit_point: u64,
    /// Address of the `tohost` symbol, when the image defines one.
    pub to_host: Option<u64>,
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("malformed ELF image: {0}")]
    Elf(#[from] goblin::error::Error),
    #[error("ELF image has no loadable segments")]
    NoLoadableSegments,
    #[error("segment file range is out of bounds")]
    MalformedSegment,
    #[error("segment at {address:#x} does not fit in guest memory")]
    SegmentOutOfRange { address: u64 },
    #[error("hex file line {line}: malformed token `{token}`")]
    HexSyntax { line: usize, token: String },
    #[error("hex file line {line}: address {address:#x} out of range")]
    HexOutOfRange { line: usize, address: u64 },
}

/// Loads an ELF executable: every PT_LOAD segment is copied to its physical
/// address, with any p_memsz tail beyond p_filesz zero-filled.
///
/// Returns the entry point, the end of the highest loaded segment, and the
/// address of the `tohost` symbol if the image has one.
pub fn load_elf(memory: &mut Memory, image: &[u8]) -> Result<LoadedImage, LoadError> {
    let elf = Elf::parse(image)?;

    let mut exit_point = 0u64;
    let mut loaded_any = false;
    for header in elf.program_headers.iter().filter(|h| h.p_type == PT_LOAD) {
        debug!(
            "loading segment: file range [{:#010x}..{:#010x}] to memory range [{:#010x}..{:#010x}]",
            header.p_offset,
            header.p_offset + header.p_filesz,
            header.p_paddr,
            header.p_paddr + header.p_memsz,
        );
        let data = image
            .get(header.file_range())
            .ok_or(LoadError::MalformedSegment)?;
        let out_of_range = |_| LoadError::SegmentOutOfRange {
            address: header.p_paddr,
        };
        memory.load_image(header.p_paddr, data).map_err(out_of_range)?;
        if header.p_memsz > header.p_filesz {
            // Zero-fill the BSS-style tail of the segment.
            let tail = (header.p_memsz - header.p_filesz) as usize;
            memory
                .load_image(header.p_paddr + header.p_filesz, &vec![0u8; tail])
                .map_err(out_of_range)?;
        }
        exit_point = exit_point.max(header.p_paddr + header.p_memsz);
        loaded_any = true;
    }
    if !loaded_any {
        return Err(LoadError::NoLoadableSegments);
    }

    let to_host = elf
        .syms
        .iter()
        .find(|sym| elf.strtab.get_at(sym.st_name) == Some("tohost"))
        .map(|sym| sym.st_value);

    Ok(LoadedImage {
        entry_point: elf.entry,
        exit_point,
        to_host,
    })
}

/// Loads a line-oriented hex dump.
///
/// A token starting with `@` followed by hexadecimal digits sets the
/// current load address. Any other token must be exactly two hexadecimal
/// digits and is stored at the current address, which then auto-increments.
/// `#` starts a comment that runs to the end of the line; blank lines are
/// skipped. Malformed input fails the load, leaving whatever was stored so
/// far in place.
pub fn load_hex(memory: &mut Memory, text: &str) -> Result<(), LoadError> {
    let mut address = 0u64;
    for (index, raw_line) in text.lines().enumerate() {
        let line_number = index + 1;
        let line = match raw_line.split_once('#') {
            Some((before_comment, _)) => before_comment,
            None => raw_line,
        };
        for token in line.split_whitespace() {
            if let Some(address_text) = token.strip_prefix('@') {
                address = u64::from_str_radix(address_text, 16).map_err(|_| {
                    LoadError::HexSyntax {
                        line: line_number,
                        token: token.to_string(),
                    }
                })?;
                continue;
            }
            if token.len() != 2 {
                return Err(LoadError::HexSyntax {
                    line: line_number,
                    token: token.to_string(),
                });
            }
            let byte = u8::from_str_radix(token, 16).map_err(|_| LoadError::HexSyntax {
                line: line_number,
                token: token.to_string(),
            })?;
            memory
                .write_u8(address, byte)
                .map_err(|_| LoadError::HexOutOfRange {
                    line: line_number,
                    address,
                })?;
            address = address.wrapping_add(1);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_hex() {
        let mut memory = Memory::new(64);
        let text = "\
# boot stub
@10 13 00 00 00
aa bb

@20
cc dd # trailing comment
";
        load_hex(&mut memory, text).unwrap();
        assert_eq!(Some(0x13), memory.read_u8(0x10).ok());
        assert_eq!(Some(0xAA), memory.read_u8(0x14).ok());
        assert_eq!(Some(0xBB), memory.read_u8(0x15).ok());
        assert_eq!(Some(0xCC), memory.read_u8(0x20).ok());
        assert_eq!(Some(0xDD), memory.read_u8(0x21).ok());
    }

    #[test]
    fn test_load_hex_rejects_malformed_input() {
        let mut memory = Memory::new(64);
        assert!(matches!(
            load_hex(&mut memory, "zz"),
            Err(LoadError::HexSyntax { line: 1, .. })
        ));
        assert!(matches!(
            load_hex(&mut memory, "abc"),
            Err(LoadError::HexSyntax { line: 1, .. })
        ));
        assert!(matches!(
            load_hex(&mut memory, "@q0"),
            Err(LoadError::HexSyntax { line: 1, .. })
        ));
        assert!(matches!(
            load_hex(&mut memory, "@40\n00"),
            Err(LoadError::HexOutOfRange { line: 2, .. })
        ));
    }

    /// Builds a minimal 32-bit little-endian RISC-V ELF with one PT_LOAD
    /// segment: 4 bytes of file data at 0x100 and a 4-byte zeroed tail.
    fn minimal_elf() -> Vec<u8> {
        let mut image = Vec::new();
        // e_ident
        image.extend_from_slice(&[0x7F, b'E', b'L', b'F', 1, 1, 1, 0]);
        image.extend_from_slice(&[0; 8]);
        image.extend_from_slice(&2u16.to_le_bytes()); // e_type = EXEC
        image.extend_from_slice(&0xF3u16.to_le_bytes()); // e_machine = RISC-V
        image.extend_from_slice(&1u32.to_le_bytes()); // e_version
        image.extend_from_slice(&0x100u32.to_le_bytes()); // e_entry
        image.extend_from_slice(&52u32.to_le_bytes()); // e_phoff
        image.extend_from_slice(&0u32.to_le_bytes()); // e_shoff
        image.extend_from_slice(&0u32.to_le_bytes()); // e_flags
        image.extend_from_slice(&52u16.to_le_bytes()); // e_ehsize
        image.extend_from_slice(&32u16.to_le_bytes()); // e_phentsize
        image.extend_from_slice(&1u16.to_le_bytes()); // e_phnum
        image.extend_from_slice(&0u16.to_le_bytes()); // e_shentsize
        image.extend_from_slice(&0u16.to_le_bytes()); // e_shnum
        image.extend_from_slice(&0u16.to_le_bytes()); // e_shstrndx
        assert_eq!(52, image.len());
        // Program header
        image.extend_from_slice(&1u32.to_le_bytes()); // p_type = PT_LOAD
        image.extend_from_slice(&84u32.to_le_bytes()); // p_offset
        image.extend_from_slice(&0x100u32.to_le_bytes()); // p_vaddr
        image.extend_from_slice(&0x100u32.to_le_bytes()); // p_paddr
        image.extend_from_slice(&4u32.to_le_bytes()); // p_filesz
        image.extend_from_slice(&8u32.to_le_bytes()); // p_memsz
        image.extend_from_slice(&5u32.to_le_bytes()); // p_flags = R+X
        image.extend_from_slice(&4u32.to_le_bytes()); // p_align
        assert_eq!(84, image.len());
        // Segment data: a single nop (addi x0, x0, 0).
        image.extend_from_slice(&0x0000_0013u32.to_le_bytes());
        image
    }

    #[test]
    fn test_load_elf() {
        let mut memory = Memory::new(1024);
        // Pre-dirty the BSS tail to check it gets zeroed.
        memory.write_u32(0x104, 0xFFFF_FFFF).unwrap();
        let loaded = load_elf(&mut memory, &minimal_elf()).unwrap();
        assert_eq!(0x100, loaded.entry_point);
        assert_eq!(0x108, loaded.exit_point);
        assert_eq!(None, loaded.to_host);
        assert_eq!(Some(0x0000_0013), memory.read_u32(0x100).ok());
        assert_eq!(Some(0), memory.read_u32(0x104).ok());
    }

    #[test]
    fn test_load_elf_too_large_for_memory() {
        let mut memory = Memory::new(0x20);
        assert!(matches!(
            load_elf(&mut memory, &minimal_elf()),
            Err(LoadError::SegmentOutOfRange { address: 0x100 })
        ));
    }

    #[test]
    fn test_load_elf_rejects_garbage() {
        let mut memory = Memory::new(64);
        assert!(matches!(
            load_elf(&mut memory, b"not an elf"),
            Err(LoadError::Elf(_))
        ));
    }
}
