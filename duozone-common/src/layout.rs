// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Duozone Developers

//! Flash layout constants and the two-zone geometry.

use crate::zone::Slot;

// --- OTA region layout ---

/// Absolute flash address of the OTA region.
pub const OTA_FLASH_BASE: u32 = 0x0001_8000;
/// Size of the whole OTA region (both zones).
pub const OTA_FLASH_SIZE: u32 = 0x8000;
pub const NR_ZONES: u32 = 2;
pub const OTA_ZONE_SIZE: u32 = OTA_FLASH_SIZE / NR_ZONES;

/// Value of `done` in a fully committed zone.
pub const DONE_MAGIC: u32 = 0x2351_3DCE;
/// Generation of a zone that was never committed (also the erased value).
pub const INVALID_GENERATION: u32 = u32::MAX;

/// Capacity of the load table in the image header and in the zone trailer.
pub const MAX_LOADS: usize = 3;

// --- Metadata trailer (repr(C) order, little-endian, 52 bytes) ---

pub const META_GENERATION_OFFSET: u32 = 0;
pub const META_ENTRYPOINT_OFFSET: u32 = 4;
pub const META_SIZE_OFFSET: u32 = 8;
pub const META_LOADS_OFFSET: u32 = 12;
pub const LOAD_DESCRIPTOR_LEN: usize = 12;
pub const META_LOADS_LEN: usize = MAX_LOADS * LOAD_DESCRIPTOR_LEN;
pub const META_DONE_OFFSET: u32 = META_LOADS_OFFSET + META_LOADS_LEN as u32;
pub const METADATA_LEN: usize = META_DONE_OFFSET as usize + 4;

const _: () = assert!(METADATA_LEN == 52);

/// Block size used when streaming payload bytes zone-to-zone or flash-to-RAM.
pub const TRANSFER_BLOCK_SIZE: usize = 256;

/// Geometry of the two zones: a contiguous region split in two equal halves,
/// each a payload area followed by the metadata trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ZoneLayout {
    pub base: u32,
    pub zone_size: u32,
}

impl ZoneLayout {
    /// Layout of the production OTA region.
    pub const fn device() -> Self {
        Self {
            base: OTA_FLASH_BASE,
            zone_size: OTA_ZONE_SIZE,
        }
    }

    pub const fn new(base: u32, zone_size: u32) -> Self {
        Self { base, zone_size }
    }

    /// Total bytes spanned by both zones.
    pub const fn region_size(&self) -> u32 {
        self.zone_size * NR_ZONES
    }

    /// Absolute address of a zone (which is also its payload base).
    pub const fn zone_addr(&self, slot: Slot) -> u32 {
        self.base + self.zone_size * slot.index() as u32
    }

    /// Bytes of payload a zone can hold in front of its trailer.
    pub const fn payload_capacity(&self) -> u32 {
        self.zone_size - METADATA_LEN as u32
    }

    /// Absolute address of a zone's metadata trailer.
    pub const fn metadata_addr(&self, slot: Slot) -> u32 {
        self.zone_addr(slot) + self.payload_capacity()
    }

    /// Whether `[addr, addr + len)` lies inside the region.
    pub fn contains(&self, addr: u32, len: u32) -> bool {
        let end = self.base as u64 + self.region_size() as u64;
        addr >= self.base && addr as u64 + len as u64 <= end
    }
}

impl Default for ZoneLayout {
    fn default() -> Self {
        Self::device()
    }
}
