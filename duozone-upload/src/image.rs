// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Duozone Developers

//! OTA images and their chunked wire form.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, ensure, Context, Result};
use serde::{Deserialize, Serialize};

use duozone_common::protocol::{EnvelopeHeader, ImageHeader, ENVELOPE_LEN, IMAGE_HEADER_LEN};
use duozone_common::{LoadDescriptor, Loads, MAX_LOADS};

/// Prefix of chunk files written by `pack`.
pub const CHUNK_FILE_PREFIX: &str = "ota.chunk.";

/// Image description produced by the ELF extraction step.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Payload bytes; checked against `data` when present.
    #[serde(default)]
    pub size: Option<u32>,
    #[serde(default)]
    pub loads: Vec<LoadDescriptor>,
    /// Entry offset relative to the zone base.
    pub entrypoint: u32,
    /// Payload as a hex string.
    pub data: String,
}

/// An image ready to be framed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub header: ImageHeader,
    pub data: Vec<u8>,
}

impl Image {
    /// Validate and build an image from its parts.
    pub fn new(entrypoint: u32, loads: &[LoadDescriptor], data: Vec<u8>) -> Result<Self> {
        let size = u16::try_from(data.len())
            .with_context(|| format!("image of {} bytes does not fit the header", data.len()))?;
        let entrypoint = u16::try_from(entrypoint)
            .with_context(|| format!("entrypoint 0x{entrypoint:x} does not fit 16 bits"))?;
        ensure!(
            loads.len() <= MAX_LOADS,
            "{} load descriptors given, at most {} supported",
            loads.len(),
            MAX_LOADS
        );

        ensure!(
            (entrypoint as usize) < data.len(),
            "entrypoint 0x{entrypoint:x} lies outside the {}-byte image",
            data.len()
        );
        for (index, load) in loads.iter().enumerate() {
            ensure!(
                load.offset <= u16::MAX as u32 && load.len <= u16::MAX as u32,
                "load {index}: offset and length must fit 16 bits"
            );
            ensure!(
                load.fits(data.len() as u32),
                "load {index}: {} bytes from +0x{:x} to 0x{:08x} do not fit the {}-byte image",
                load.len,
                load.offset,
                load.dest,
                data.len()
            );
        }
        let table: Loads = loads.iter().copied().filter(|load| !load.is_empty()).collect();

        Ok(Self {
            header: ImageHeader {
                entrypoint,
                size,
                loads: table,
            },
            data,
        })
    }

    pub fn from_manifest(manifest: &Manifest) -> Result<Self> {
        let data = hex::decode(manifest.data.trim()).context("manifest data is not valid hex")?;
        if let Some(size) = manifest.size {
            ensure!(
                size as usize == data.len(),
                "manifest declares {size} bytes but carries {}",
                data.len()
            );
        }
        Self::new(manifest.entrypoint, &manifest.loads, data)
    }

    pub fn load_manifest(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let manifest: Manifest = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse manifest {}", path.display()))?;
        Self::from_manifest(&manifest)
    }

    /// Image header followed by the payload.
    pub fn blob(&self) -> Vec<u8> {
        let mut blob = Vec::with_capacity(IMAGE_HEADER_LEN + self.data.len());
        blob.extend_from_slice(&self.header.encode());
        blob.extend_from_slice(&self.data);
        blob
    }

    /// Split into envelopes of at most `mtu` payload bytes each.
    pub fn envelopes(&self, mtu: u16, max_blob: u16, checksums: bool) -> Result<Vec<Vec<u8>>> {
        ensure!(mtu > 0, "MTU must be at least 1 byte");
        let blob = self.blob();
        ensure!(
            blob.len() <= max_blob as usize,
            "transfer of {} bytes exceeds the {max_blob}-byte limit",
            blob.len()
        );

        let pieces: Vec<&[u8]> = blob.chunks(mtu as usize).collect();
        let count = u8::try_from(pieces.len())
            .with_context(|| format!("{} chunks exceed the 255-chunk limit", pieces.len()))?;

        Ok(pieces
            .iter()
            .enumerate()
            .map(|(index, piece)| {
                let mut header =
                    EnvelopeHeader::for_payload(blob.len() as u16, index as u8, count, piece);
                if !checksums {
                    header.checksum = 0;
                }
                let mut envelope = header.encode().to_vec();
                envelope.extend_from_slice(piece);
                envelope
            })
            .collect())
    }
}

/// Parse `dest:offset:len` (each decimal or 0x-hex).
pub fn parse_load(s: &str) -> Result<LoadDescriptor, String> {
    let parts: Vec<&str> = s.split(':').collect();
    let [dest, offset, len] = parts.as_slice() else {
        return Err(format!("expected dest:offset:len, got '{s}'"));
    };
    Ok(LoadDescriptor {
        dest: parse_u32(dest)?,
        offset: parse_u32(offset)?,
        len: parse_u32(len)?,
    })
}

/// Parse a decimal or 0x-prefixed hex number.
pub fn parse_u32(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number '{s}': {e}"))
}

/// Split a concatenated envelope stream.
pub fn split_stream(bytes: &[u8]) -> Result<Vec<Vec<u8>>> {
    let mut envelopes = Vec::new();
    let mut rest = bytes;
    while !rest.is_empty() {
        let header = EnvelopeHeader::parse(rest)
            .with_context(|| format!("truncated envelope header at byte {}", bytes.len() - rest.len()))?;
        let len = ENVELOPE_LEN + header.chunk_len as usize;
        ensure!(
            rest.len() >= len,
            "envelope {} is truncated",
            header.chunk_index
        );
        envelopes.push(rest[..len].to_vec());
        rest = &rest[len..];
    }
    Ok(envelopes)
}

/// Read envelopes from chunk files, chunk directories or binary streams.
pub fn read_envelopes(inputs: &[PathBuf]) -> Result<Vec<Vec<u8>>> {
    let mut envelopes = Vec::new();
    for input in inputs {
        if input.is_dir() {
            for file in chunk_files(input)? {
                envelopes.push(read_chunk_file(&file)?);
            }
            continue;
        }

        let bytes = fs::read(input).with_context(|| format!("Failed to read {}", input.display()))?;
        match hex_text(&bytes) {
            Some(text) => envelopes.push(
                hex::decode(text).with_context(|| format!("{} is not valid hex", input.display()))?,
            ),
            None => envelopes.extend(
                split_stream(&bytes).with_context(|| format!("Failed to split {}", input.display()))?,
            ),
        }
    }
    Ok(envelopes)
}

/// `ota.chunk.N` files of a directory, ordered by `N`.
pub fn chunk_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))? {
        let path = entry?.path();
        let index = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.strip_prefix(CHUNK_FILE_PREFIX))
            .and_then(|n| n.parse::<u32>().ok());
        if let Some(index) = index {
            files.push((index, path));
        }
    }
    if files.is_empty() {
        bail!("no {}N files in {}", CHUNK_FILE_PREFIX, dir.display());
    }
    files.sort();
    Ok(files.into_iter().map(|(_, path)| path).collect())
}

fn read_chunk_file(path: &Path) -> Result<Vec<u8>> {
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    hex::decode(text.trim()).with_context(|| format!("{} is not valid hex", path.display()))
}

fn hex_text(bytes: &[u8]) -> Option<&str> {
    let text = std::str::from_utf8(bytes).ok()?.trim();
    (!text.is_empty() && text.bytes().all(|b| b.is_ascii_hexdigit())).then_some(text)
}
