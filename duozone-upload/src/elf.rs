// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Duozone Developers

//! Image extraction from a linked application ELF.
//!
//! Loadable segments inside the OTA flash window become the payload, laid
//! out at their offset from the window start. Segments inside the OTA SRAM
//! window are appended after them and recorded as load descriptors, so the
//! boot resolver copies them to their run address. The entry function is
//! named by a marker symbol `__ota_entrypoint_<name>`.

use anyhow::{anyhow, bail, ensure, Context, Result};
use xmas_elf::program::Type;
use xmas_elf::sections::SectionData;
use xmas_elf::symbol_table::Entry;
use xmas_elf::ElfFile;

use duozone_common::layout::OTA_ZONE_SIZE;
use duozone_common::{LoadDescriptor, OTA_FLASH_BASE};

use crate::image::Manifest;

/// Prefix of the symbol whose suffix names the entry function.
pub const ENTRYPOINT_MARKER: &str = "__ota_entrypoint_";

/// Address windows the application is linked into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractOptions {
    pub flash_addr: u32,
    pub flash_len: u32,
    pub sram_addr: u32,
    pub sram_len: u32,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            flash_addr: OTA_FLASH_BASE,
            flash_len: OTA_ZONE_SIZE,
            sram_addr: 0x2000_0000,
            sram_len: 0x1000,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    vaddr: u32,
    mem_size: u32,
    file_offset: usize,
    file_size: usize,
    in_flash: bool,
}

fn window_contains(start: u32, len: u32, addr: u64, size: u64) -> bool {
    let end = u64::from(start) + u64::from(len);
    addr >= u64::from(start) && addr.checked_add(size).is_some_and(|last| last <= end)
}

/// Build a manifest from the bytes of an ELF file.
pub fn extract(bytes: &[u8], opts: &ExtractOptions) -> Result<Manifest> {
    let elf = ElfFile::new(bytes).map_err(|e| anyhow!("not an ELF file: {e}"))?;

    let mut segments = Vec::new();
    for ph in elf.program_iter() {
        if !matches!(ph.get_type(), Ok(Type::Load)) || ph.mem_size() == 0 {
            continue;
        }
        let (vaddr, mem_size) = (ph.virtual_addr(), ph.mem_size());
        let in_flash = window_contains(opts.flash_addr, opts.flash_len, vaddr, mem_size);
        if !in_flash && !window_contains(opts.sram_addr, opts.sram_len, vaddr, mem_size) {
            continue;
        }
        ensure!(
            ph.file_size() <= mem_size,
            "segment at 0x{vaddr:x} has more file bytes than memory bytes"
        );

        let file_offset = usize::try_from(ph.offset())?;
        let file_size = usize::try_from(ph.file_size())?;
        ensure!(
            file_offset
                .checked_add(file_size)
                .is_some_and(|end| end <= bytes.len()),
            "segment at 0x{vaddr:x} lies outside the file"
        );
        segments.push(Segment {
            vaddr: u32::try_from(vaddr)?,
            mem_size: u32::try_from(mem_size)?,
            file_offset,
            file_size,
            in_flash,
        });
    }
    ensure!(!segments.is_empty(), "no loadable segment inside the OTA windows");
    segments.sort_by_key(|seg| seg.vaddr);

    let mut data = Vec::new();
    let mut loads = Vec::new();
    for seg in &segments {
        let body = &bytes[seg.file_offset..seg.file_offset + seg.file_size];
        if seg.in_flash {
            let at = (seg.vaddr - opts.flash_addr) as usize;
            ensure!(
                at >= data.len(),
                "flash segment at 0x{:08x} overlaps the previous one",
                seg.vaddr
            );
            data.resize(at, 0);
            data.extend_from_slice(body);
        } else {
            loads.push(LoadDescriptor {
                dest: seg.vaddr,
                offset: u32::try_from(data.len())?,
                len: seg.mem_size,
            });
            data.extend_from_slice(body);
            data.resize(data.len() + (seg.mem_size as usize - seg.file_size), 0);
        }
    }

    let entry = find_entrypoint(&elf)?;
    ensure!(
        window_contains(opts.flash_addr, opts.flash_len, entry, 1),
        "entry symbol at 0x{entry:x} is outside the OTA flash window"
    );
    let entrypoint = u32::try_from(entry)? - opts.flash_addr;

    Ok(Manifest {
        size: Some(u32::try_from(data.len())?),
        loads,
        entrypoint,
        data: hex::encode(&data),
    })
}

/// Value of the symbol named by the `__ota_entrypoint_` marker.
fn find_entrypoint(elf: &ElfFile) -> Result<u64> {
    let symtab = elf
        .find_section_by_name(".symtab")
        .context("no .symtab section")?;
    let symbols = match symtab.get_data(elf).map_err(|e| anyhow!(e))? {
        SectionData::SymbolTable32(entries) => named_symbols(elf, entries),
        SectionData::SymbolTable64(entries) => named_symbols(elf, entries),
        _ => bail!(".symtab is not a symbol table"),
    };

    let target = symbols
        .iter()
        .filter_map(|(name, _)| name.strip_prefix(ENTRYPOINT_MARKER))
        .last()
        .with_context(|| format!("no {ENTRYPOINT_MARKER}* symbol"))?;
    symbols
        .iter()
        .find(|(name, _)| *name == target)
        .map(|(_, value)| *value)
        .with_context(|| format!("entry symbol '{target}' not found"))
}

fn named_symbols<'a, E: Entry>(elf: &ElfFile<'a>, entries: &'a [E]) -> Vec<(&'a str, u64)> {
    entries
        .iter()
        .filter_map(|entry| entry.get_name(elf).ok().map(|name| (name, entry.value())))
        .collect()
}
