// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Duozone Developers

//! The two-zone store.
//!
//! Each zone is a payload area followed by a 52-byte metadata trailer:
//!
//! | offset | field        |
//! |--------|--------------|
//! | 0      | `generation` |
//! | 4      | `entrypoint` |
//! | 8      | `size`       |
//! | 12     | `loads[3]`   |
//! | 48     | `done`       |
//!
//! `done` is the only proof that a zone is complete.

use heapless::Vec;
use serde::{Deserialize, Serialize};

use crate::flash::{FlashController, FlashPrimitives, Quiesce};
use crate::layout::{
    ZoneLayout, DONE_MAGIC, INVALID_GENERATION, LOAD_DESCRIPTOR_LEN, MAX_LOADS, METADATA_LEN,
    META_DONE_OFFSET, META_ENTRYPOINT_OFFSET, META_GENERATION_OFFSET, META_LOADS_LEN,
    META_LOADS_OFFSET, META_SIZE_OFFSET,
};

/// Physical zone index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Slot {
    Zero = 0,
    One = 1,
}

impl Slot {
    pub const ALL: [Slot; 2] = [Slot::Zero, Slot::One];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn other(self) -> Self {
        match self {
            Slot::Zero => Slot::One,
            Slot::One => Slot::Zero,
        }
    }

    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Slot::Zero),
            1 => Some(Slot::One),
            _ => None,
        }
    }
}

/// One relocation step: copy `len` bytes from `payload + offset` to `dest`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LoadDescriptor {
    pub dest: u32,
    pub offset: u32,
    pub len: u32,
}

impl LoadDescriptor {
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Source range inside the first `limit` payload bytes, destination
    /// range below the top of the address space.
    pub fn fits(&self, limit: u32) -> bool {
        let source = self.offset.checked_add(self.len).is_some_and(|end| end <= limit);
        source && self.dest.checked_add(self.len).is_some()
    }
}

/// Bounded load table. Only non-empty descriptors are stored; the length is
/// the load count.
pub type Loads = Vec<LoadDescriptor, MAX_LOADS>;

/// Keep the non-empty descriptors of a fixed-capacity table.
pub fn compact_loads(raw: &[LoadDescriptor]) -> Loads {
    raw.iter()
        .filter(|load| !load.is_empty())
        .take(MAX_LOADS)
        .copied()
        .collect()
}

/// Encode a load table into its fixed 36-byte trailer form, padding with
/// zeroed (empty) slots.
pub fn encode_loads(loads: &Loads) -> [u8; META_LOADS_LEN] {
    let mut out = [0u8; META_LOADS_LEN];
    for (chunk, load) in out.chunks_exact_mut(LOAD_DESCRIPTOR_LEN).zip(loads.iter()) {
        chunk[0..4].copy_from_slice(&load.dest.to_le_bytes());
        chunk[4..8].copy_from_slice(&load.offset.to_le_bytes());
        chunk[8..12].copy_from_slice(&load.len.to_le_bytes());
    }
    out
}

fn le_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Snapshot of a zone's trailer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneMetadata {
    pub generation: u32,
    pub entrypoint: u32,
    pub size: u32,
    pub loads: Loads,
    pub done: u32,
}

impl ZoneMetadata {
    /// Trailer of a freshly erased zone.
    pub fn erased() -> Self {
        Self::decode(&[0xFF; METADATA_LEN])
    }

    pub fn decode(raw: &[u8; METADATA_LEN]) -> Self {
        let table = &raw[META_LOADS_OFFSET as usize..META_DONE_OFFSET as usize];
        let mut descriptors = [LoadDescriptor::default(); MAX_LOADS];
        for (slot, chunk) in descriptors
            .iter_mut()
            .zip(table.chunks_exact(LOAD_DESCRIPTOR_LEN))
        {
            *slot = LoadDescriptor {
                dest: le_u32(chunk, 0),
                offset: le_u32(chunk, 4),
                len: le_u32(chunk, 8),
            };
        }

        Self {
            generation: le_u32(raw, META_GENERATION_OFFSET as usize),
            entrypoint: le_u32(raw, META_ENTRYPOINT_OFFSET as usize),
            size: le_u32(raw, META_SIZE_OFFSET as usize),
            loads: compact_loads(&descriptors),
            done: le_u32(raw, META_DONE_OFFSET as usize),
        }
    }

    /// A zone counts only when `done` holds the magic and its generation is
    /// not the sentinel.
    pub fn is_valid(&self) -> bool {
        self.done == DONE_MAGIC && self.generation != INVALID_GENERATION
    }

    /// Generation of a valid zone.
    pub fn valid_generation(&self) -> Option<u32> {
        self.is_valid().then_some(self.generation)
    }
}

/// Read-only view of one zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneView {
    pub slot: Slot,
    /// Absolute address of the zone, which is also its payload base.
    pub addr: u32,
    pub metadata: ZoneMetadata,
}

impl ZoneView {
    pub fn is_valid(&self) -> bool {
        self.metadata.is_valid()
    }

    /// Executable address: the stored offset resolved against where this
    /// zone is mapped.
    pub fn entry_address(&self) -> u32 {
        self.addr.wrapping_add(self.metadata.entrypoint)
    }
}

/// Owner of the OTA region. Writes go through [`FlashPrimitives`]; reads are
/// direct.
pub struct ZoneStore<C, Q> {
    flash: FlashPrimitives<C, Q>,
    layout: ZoneLayout,
}

impl<C: FlashController, Q: Quiesce> ZoneStore<C, Q> {
    pub fn new(flash: FlashPrimitives<C, Q>, layout: ZoneLayout) -> Self {
        Self { flash, layout }
    }

    pub fn layout(&self) -> &ZoneLayout {
        &self.layout
    }

    pub fn flash(&self) -> &FlashPrimitives<C, Q> {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut FlashPrimitives<C, Q> {
        &mut self.flash
    }

    pub fn into_flash(self) -> FlashPrimitives<C, Q> {
        self.flash
    }

    pub fn metadata(&self, slot: Slot) -> ZoneMetadata {
        let mut raw = [0u8; METADATA_LEN];
        self.flash.read(self.layout.metadata_addr(slot), &mut raw);
        ZoneMetadata::decode(&raw)
    }

    pub fn zone(&self, slot: Slot) -> ZoneView {
        ZoneView {
            slot,
            addr: self.layout.zone_addr(slot),
            metadata: self.metadata(slot),
        }
    }

    /// Read payload bytes of a zone starting at `offset`.
    pub fn read_payload(&self, slot: Slot, offset: u32, buf: &mut [u8]) {
        self.flash.read(self.layout.zone_addr(slot) + offset, buf);
    }

    /// The valid zone with the highest generation, if any.
    pub fn find_authoritative(&self) -> Option<Slot> {
        let mut best: Option<(Slot, u32)> = None;

        for slot in Slot::ALL {
            let Some(generation) = self.metadata(slot).valid_generation() else {
                continue;
            };
            if best.map_or(true, |(_, max)| generation > max) {
                best = Some((slot, generation));
            }
        }

        best.map(|(slot, _)| slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trailer(generation: u32, done: u32, loads: &[LoadDescriptor]) -> [u8; METADATA_LEN] {
        let mut raw = [0xFFu8; METADATA_LEN];
        raw[0..4].copy_from_slice(&generation.to_le_bytes());
        raw[4..8].copy_from_slice(&0x41u32.to_le_bytes());
        raw[8..12].copy_from_slice(&128u32.to_le_bytes());
        let table = encode_loads(&compact_loads(loads));
        raw[12..48].copy_from_slice(&table);
        raw[48..52].copy_from_slice(&done.to_le_bytes());
        raw
    }

    #[test]
    fn erased_trailer_is_invalid() {
        let meta = ZoneMetadata::erased();
        assert!(!meta.is_valid());
        assert_eq!(meta.generation, INVALID_GENERATION);
        assert_eq!(meta.loads.len(), MAX_LOADS, "erased slots read as 0xFFFF_FFFF lengths");
    }

    #[test]
    fn decode_drops_empty_load_slots() {
        let load = LoadDescriptor {
            dest: 0x2000_0000,
            offset: 0x100,
            len: 0x40,
        };
        let meta = ZoneMetadata::decode(&trailer(7, DONE_MAGIC, &[load]));

        assert!(meta.is_valid());
        assert_eq!(meta.generation, 7);
        assert_eq!(meta.entrypoint, 0x41);
        assert_eq!(meta.size, 128);
        assert_eq!(meta.loads.as_slice(), &[load]);
    }

    #[test]
    fn done_magic_is_the_sole_validity_marker() {
        assert!(!ZoneMetadata::decode(&trailer(3, DONE_MAGIC ^ 1, &[])).is_valid());
        assert!(!ZoneMetadata::decode(&trailer(INVALID_GENERATION, DONE_MAGIC, &[])).is_valid());
    }

    #[test]
    fn load_fits_checks_source_and_destination() {
        let load = LoadDescriptor {
            dest: 0x2000_0000,
            offset: 0x40,
            len: 0x40,
        };
        assert!(load.fits(0x80));
        assert!(!load.fits(0x7F));

        let wrapping = LoadDescriptor {
            dest: 0xFFFF_FFF0,
            offset: 0,
            len: 0x40,
        };
        assert!(!wrapping.fits(0x1000));

        let huge = LoadDescriptor {
            dest: 0,
            offset: u32::MAX,
            len: 2,
        };
        assert!(!huge.fits(u32::MAX));
    }

    #[test]
    fn slot_other_flips() {
        assert_eq!(Slot::Zero.other(), Slot::One);
        assert_eq!(Slot::One.other(), Slot::Zero);
        assert_eq!(Slot::from_index(2), None);
    }
}
