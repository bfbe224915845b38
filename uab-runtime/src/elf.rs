//! Minimal ELF64 section-table reader.
//!
//! The original walks the section headers with `libelf`/`gelf`; we don't
//! carry that dependency (absent from the whole workspace), so this reads
//! the header, the section header table and the section-name string table
//! directly. Only `(offset, size)` per named section is needed — no symbol
//! table, no relocations, no program headers.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use linglong_common::{Error, Result};

const EI_NIDENT: usize = 16;
const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const ELFCLASS64: u8 = 2;

/// `(offset, size)` of a section within the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionRange {
    pub offset: u64,
    pub size: u64,
}

struct Elf64Header {
    e_shoff: u64,
    e_shentsize: u16,
    e_shnum: u16,
    e_shstrndx: u16,
}

struct Elf64SectionHeader {
    sh_name: u32,
    sh_offset: u64,
    sh_size: u64,
}

fn read_at(file: &mut File, offset: u64, buf: &mut [u8]) -> Result<()> {
    file.seek(SeekFrom::Start(offset))
        .map_err(|e| Error::syscall(format!("seek to {offset} failed: {e}")))?;
    file.read_exact(buf)
        .map_err(|e| Error::malformed(format!("short read at {offset}: {e}")))
}

fn parse_header(file: &mut File) -> Result<Elf64Header> {
    let mut ident = [0u8; EI_NIDENT];
    read_at(file, 0, &mut ident)?;
    if ident[0..4] != ELF_MAGIC {
        return Err(Error::malformed("not an ELF file"));
    }
    if ident[4] != ELFCLASS64 {
        return Err(Error::malformed("only 64-bit ELF is supported"));
    }

    // e_shoff at offset 0x28, e_shentsize at 0x3a, e_shnum at 0x3c,
    // e_shstrndx at 0x3e in the 64-bit ELF header.
    let mut rest = [0u8; 0x40 - EI_NIDENT];
    read_at(file, EI_NIDENT as u64, &mut rest)?;

    let e_shoff = u64::from_le_bytes(rest[0x28 - EI_NIDENT..0x30 - EI_NIDENT].try_into().unwrap());
    let e_shentsize =
        u16::from_le_bytes(rest[0x3a - EI_NIDENT..0x3c - EI_NIDENT].try_into().unwrap());
    let e_shnum = u16::from_le_bytes(rest[0x3c - EI_NIDENT..0x3e - EI_NIDENT].try_into().unwrap());
    let e_shstrndx =
        u16::from_le_bytes(rest[0x3e - EI_NIDENT..0x40 - EI_NIDENT].try_into().unwrap());

    Ok(Elf64Header { e_shoff, e_shentsize, e_shnum, e_shstrndx })
}

fn parse_section_header(buf: &[u8]) -> Elf64SectionHeader {
    Elf64SectionHeader {
        sh_name: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
        sh_offset: u64::from_le_bytes(buf[24..32].try_into().unwrap()),
        sh_size: u64::from_le_bytes(buf[32..40].try_into().unwrap()),
    }
}

fn section_name<'a>(strtab: &'a [u8], sh_name: u32) -> &'a str {
    let start = sh_name as usize;
    if start >= strtab.len() {
        return "";
    }
    let end = strtab[start..].iter().position(|&b| b == 0).map_or(strtab.len(), |p| start + p);
    std::str::from_utf8(&strtab[start..end]).unwrap_or("")
}

/// Opens `path` and returns the `(offset, size)` of every section named in
/// `wanted`, looked up by exact name match against the section-header string
/// table. Absence of any requested section is an error.
pub fn find_sections(path: &std::path::Path, wanted: &[&str]) -> Result<Vec<Option<SectionRange>>> {
    let mut file = File::open(path)
        .map_err(|e| Error::syscall(format!("open {} failed: {e}", path.display())))?;
    let header = parse_header(&mut file)?;

    if header.e_shnum == 0 || header.e_shstrndx >= header.e_shnum {
        return Err(Error::malformed("no section header string table"));
    }

    let mut raw_headers = vec![0u8; header.e_shentsize as usize * header.e_shnum as usize];
    read_at(&mut file, header.e_shoff, &mut raw_headers)?;

    let headers: Vec<Elf64SectionHeader> = (0..header.e_shnum as usize)
        .map(|i| {
            let start = i * header.e_shentsize as usize;
            parse_section_header(&raw_headers[start..start + header.e_shentsize as usize])
        })
        .collect();

    let strtab_hdr = &headers[header.e_shstrndx as usize];
    let mut strtab = vec![0u8; strtab_hdr.sh_size as usize];
    read_at(&mut file, strtab_hdr.sh_offset, &mut strtab)?;

    let mut results = vec![None; wanted.len()];
    for section in &headers {
        let name = section_name(&strtab, section.sh_name);
        for (i, &want) in wanted.iter().enumerate() {
            if name == want {
                results[i] = Some(SectionRange { offset: section.sh_offset, size: section.sh_size });
            }
        }
    }

    Ok(results)
}

/// Looks up a single section by name; returns a malformed error (matching
/// §4.1.2's "absence is a terminal error") rather than `None` when missing.
pub fn require_section(path: &std::path::Path, name: &str) -> Result<SectionRange> {
    find_sections(path, &[name])?
        .into_iter()
        .next()
        .flatten()
        .ok_or_else(|| Error::malformed(format!("missing ELF section {name}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Hand-builds a trivial ELF64 file with two named sections (plus the
    /// obligatory null section and shstrtab) to exercise the walker without
    /// depending on any real toolchain output.
    fn build_test_elf(sections: &[(&str, &[u8])]) -> (tempfile::NamedTempFile, Vec<SectionRange>) {
        let mut shstrtab = vec![0u8]; // index 0 is always the empty name
        let mut name_offsets = Vec::new();
        for (name, _) in sections {
            name_offsets.push(shstrtab.len() as u32);
            shstrtab.extend_from_slice(name.as_bytes());
            shstrtab.push(0);
        }
        let shstrtab_name_offset = shstrtab.len() as u32;
        shstrtab.extend_from_slice(b".shstrtab");
        shstrtab.push(0);

        let mut data = vec![0u8; 0x40];
        data[0..4].copy_from_slice(&ELF_MAGIC);
        data[4] = ELFCLASS64;

        let mut ranges = Vec::new();
        for (_, bytes) in sections {
            let offset = data.len() as u64;
            data.extend_from_slice(bytes);
            ranges.push(SectionRange { offset, size: bytes.len() as u64 });
        }

        let strtab_offset = data.len() as u64;
        data.extend_from_slice(&shstrtab);

        // section headers: null, one per requested section, shstrtab.
        let shoff = data.len() as u64;
        let shentsize = 64u64;
        let shnum = sections.len() as u16 + 2;
        let shstrndx = shnum - 1;

        let mut write_header = |name: u32, offset: u64, size: u64| {
            let mut hdr = vec![0u8; shentsize as usize];
            hdr[0..4].copy_from_slice(&name.to_le_bytes());
            hdr[24..32].copy_from_slice(&offset.to_le_bytes());
            hdr[32..40].copy_from_slice(&size.to_le_bytes());
            data.extend_from_slice(&hdr);
        };

        write_header(0, 0, 0);
        for (i, range) in ranges.iter().enumerate() {
            write_header(name_offsets[i], range.offset, range.size);
        }
        write_header(shstrtab_name_offset, strtab_offset, shstrtab.len() as u64);

        data[0x28..0x30].copy_from_slice(&shoff.to_le_bytes());
        data[0x3a..0x3c].copy_from_slice(&(shentsize as u16).to_le_bytes());
        data[0x3c..0x3e].copy_from_slice(&shnum.to_le_bytes());
        data[0x3e..0x40].copy_from_slice(&shstrndx.to_le_bytes());

        let mut file = tempfile::NamedTempFile::new().expect("tmp file");
        file.write_all(&data).expect("write elf");
        (file, ranges)
    }

    #[test]
    fn finds_named_sections() {
        let (file, ranges) =
            build_test_elf(&[("linglong.meta", b"{\"uuid\":\"abc\"}"), ("linglong.bundle", b"erofsdata")]);

        let found = find_sections(file.path(), &["linglong.meta", "linglong.bundle"]).unwrap();
        assert_eq!(found[0], Some(ranges[0]));
        assert_eq!(found[1], Some(ranges[1]));
    }

    #[test]
    fn missing_section_is_malformed_error() {
        let (file, _ranges) = build_test_elf(&[("linglong.meta", b"{}")]);
        let err = require_section(file.path(), "linglong.bundle").unwrap_err();
        assert_eq!(err.kind(), linglong_common::ErrorKind::Malformed);
    }
}
