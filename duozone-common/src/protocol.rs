// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Duozone Developers

//! Chunk envelope and image header wire formats.
//!
//! Both are packed little-endian structures with no padding, and both are
//! usable from `no_std` (device) and `std` (host packer).
//!
//! Envelope (12 bytes), followed by `chunk_len` payload bytes:
//!
//! | offset | field         |
//! |--------|---------------|
//! | 0      | `magic: u32`  |
//! | 4      | `total_size: u16` |
//! | 6      | `chunk_index: u8` |
//! | 7      | `chunk_count: u8` |
//! | 8      | `checksum: u16` |
//! | 10     | `chunk_len: u16` |
//!
//! The first chunk's payload starts with the 28-byte image header.

use crc::{Crc, CRC_16_IBM_3740};

use crate::layout::MAX_LOADS;
use crate::zone::{compact_loads, LoadDescriptor, Loads};

/// Distinguishes OTA writes from other writes to the same characteristic.
pub const BLOB_MAGIC: u32 = 0xDABA_D000;
/// Largest transfer (image header included) accepted by the device.
pub const MAX_BLOB_SIZE: u16 = 400;
/// Largest payload carried by one envelope.
pub const CHUNK_MTU: u16 = 80;

pub const ENVELOPE_LEN: usize = 12;
/// Wire size of one image-header load entry (`dest:u32, offset:u16, len:u16`).
pub const WIRE_LOAD_LEN: usize = 8;
pub const IMAGE_HEADER_LEN: usize = 4 + MAX_LOADS * WIRE_LOAD_LEN;

const _: () = assert!(IMAGE_HEADER_LEN == 28);

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Checksum carried in the envelope: CRC-16/IBM-3740 over the chunk payload.
pub fn chunk_checksum(payload: &[u8]) -> u16 {
    CRC16.checksum(payload)
}

/// Fixed header of every chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EnvelopeHeader {
    pub magic: u32,
    pub total_size: u16,
    pub chunk_index: u8,
    pub chunk_count: u8,
    pub checksum: u16,
    pub chunk_len: u16,
}

impl EnvelopeHeader {
    /// Header of chunk `chunk_index` carrying `payload`, checksum filled in.
    pub fn for_payload(total_size: u16, chunk_index: u8, chunk_count: u8, payload: &[u8]) -> Self {
        Self {
            magic: BLOB_MAGIC,
            total_size,
            chunk_index,
            chunk_count,
            checksum: chunk_checksum(payload),
            chunk_len: payload.len() as u16,
        }
    }

    /// Decode the leading 12 bytes; `None` when the buffer is shorter.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let raw: &[u8; ENVELOPE_LEN] = bytes.get(..ENVELOPE_LEN)?.try_into().ok()?;
        Some(Self {
            magic: u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
            total_size: u16::from_le_bytes([raw[4], raw[5]]),
            chunk_index: raw[6],
            chunk_count: raw[7],
            checksum: u16::from_le_bytes([raw[8], raw[9]]),
            chunk_len: u16::from_le_bytes([raw[10], raw[11]]),
        })
    }

    pub fn encode(&self) -> [u8; ENVELOPE_LEN] {
        let mut out = [0u8; ENVELOPE_LEN];
        out[0..4].copy_from_slice(&self.magic.to_le_bytes());
        out[4..6].copy_from_slice(&self.total_size.to_le_bytes());
        out[6] = self.chunk_index;
        out[7] = self.chunk_count;
        out[8..10].copy_from_slice(&self.checksum.to_le_bytes());
        out[10..12].copy_from_slice(&self.chunk_len.to_le_bytes());
        out
    }

    pub fn is_last(&self) -> bool {
        self.chunk_index as u16 + 1 == self.chunk_count as u16
    }
}

/// Prefix of the first chunk's payload; seeds the download session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImageHeader {
    /// Entry offset relative to the zone base.
    pub entrypoint: u16,
    /// Image payload bytes following the header.
    pub size: u16,
    pub loads: Loads,
}

impl ImageHeader {
    /// Decode the leading 28 bytes; `None` when the buffer is shorter.
    /// Zero-length load slots are dropped.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let raw = bytes.get(..IMAGE_HEADER_LEN)?;
        let mut descriptors = [LoadDescriptor::default(); MAX_LOADS];
        for (slot, entry) in descriptors
            .iter_mut()
            .zip(raw[4..].chunks_exact(WIRE_LOAD_LEN))
        {
            *slot = LoadDescriptor {
                dest: u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]),
                offset: u16::from_le_bytes([entry[4], entry[5]]) as u32,
                len: u16::from_le_bytes([entry[6], entry[7]]) as u32,
            };
        }

        Some(Self {
            entrypoint: u16::from_le_bytes([raw[0], raw[1]]),
            size: u16::from_le_bytes([raw[2], raw[3]]),
            loads: compact_loads(&descriptors),
        })
    }

    /// Encode, padding the load table with empty slots. Offsets and lengths
    /// are truncated to their 16-bit wire width; callers validate first.
    pub fn encode(&self) -> [u8; IMAGE_HEADER_LEN] {
        let mut out = [0u8; IMAGE_HEADER_LEN];
        out[0..2].copy_from_slice(&self.entrypoint.to_le_bytes());
        out[2..4].copy_from_slice(&self.size.to_le_bytes());
        for (entry, load) in out[4..].chunks_exact_mut(WIRE_LOAD_LEN).zip(self.loads.iter()) {
            entry[0..4].copy_from_slice(&load.dest.to_le_bytes());
            entry[4..6].copy_from_slice(&(load.offset as u16).to_le_bytes());
            entry[6..8].copy_from_slice(&(load.len as u16).to_le_bytes());
        }
        out
    }
}
