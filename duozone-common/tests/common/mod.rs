// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Duozone Developers

//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use duozone_common::layout::ZoneLayout;
use duozone_common::protocol::{EnvelopeHeader, ImageHeader};
use duozone_common::sim::{blank_store, SimFlash, SimQuiesce, SIM_SECTOR_SIZE};
use duozone_common::{LoadDescriptor, Loads, ZoneStore};

pub type SimStore = ZoneStore<SimFlash, SimQuiesce>;

pub fn device_store() -> SimStore {
    blank_store(ZoneLayout::device(), SIM_SECTOR_SIZE)
}

/// Deterministic, non-erased-looking payload.
pub fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(7).wrapping_add(seed) & 0x7F)
        .collect()
}

pub fn loads(descriptors: &[LoadDescriptor]) -> Loads {
    descriptors.iter().copied().collect()
}

/// Image header + data split into envelopes of at most `mtu` payload bytes.
pub fn envelopes(header: &ImageHeader, data: &[u8], mtu: usize) -> Vec<Vec<u8>> {
    let mut blob = header.encode().to_vec();
    blob.extend_from_slice(data);

    let pieces: Vec<&[u8]> = blob.chunks(mtu).collect();
    let count = pieces.len() as u8;
    pieces
        .iter()
        .enumerate()
        .map(|(index, piece)| {
            let env = EnvelopeHeader::for_payload(blob.len() as u16, index as u8, count, piece);
            let mut out = env.encode().to_vec();
            out.extend_from_slice(piece);
            out
        })
        .collect()
}

/// Envelopes for a plain image with no load table.
pub fn image_envelopes(entrypoint: u16, data: &[u8], mtu: usize) -> Vec<Vec<u8>> {
    let header = ImageHeader {
        entrypoint,
        size: data.len() as u16,
        loads: Loads::new(),
    };
    envelopes(&header, data, mtu)
}
