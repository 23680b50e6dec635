// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Duozone Developers

//! OTA attribute service: the boundary the radio stack's write and read
//! callbacks call into.
//!
//! Writes to the transfer characteristic are chunk envelopes. A completed
//! transfer, or any fault, resets the device through the platform so the
//! boot resolver runs on a clean call stack.

use crate::boot::Reset;
use crate::flash::{FlashController, Quiesce};
use crate::protocol::{CHUNK_MTU, ENVELOPE_LEN};
use crate::receiver::{ChunkReceiver, Progress, ReceiverConfig};
use crate::zone::ZoneStore;

/// Writable characteristic carrying chunk envelopes.
pub const TRANSFER_CHAR_UUID: u16 = 0xFFF3;
/// Readable characteristic reporting received bytes (LE u32).
pub const PROGRESS_CHAR_UUID: u16 = 0xFFF4;
/// Longest value accepted on the transfer characteristic.
pub const TRANSFER_CHAR_LEN: usize = ENVELOPE_LEN + CHUNK_MTU as usize;

/// Status returned to the attribute stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AttributeStatus {
    Success,
    InvalidOffset,
    InvalidValueSize,
    AttributeNotFound,
    WriteNotPermitted,
    ReadNotPermitted,
    /// The value was rejected by the transfer protocol.
    InvalidValue,
}

/// Attribute service owning the zone store, the receiver and the platform.
pub struct OtaService<C, Q, P> {
    store: ZoneStore<C, Q>,
    receiver: ChunkReceiver,
    platform: P,
}

impl<C: FlashController, Q: Quiesce, P: Reset> OtaService<C, Q, P> {
    pub fn new(store: ZoneStore<C, Q>, config: ReceiverConfig, platform: P) -> Self {
        Self {
            store,
            receiver: ChunkReceiver::new(config),
            platform,
        }
    }

    /// Attribute write callback.
    pub fn write(&mut self, uuid: u16, offset: u16, value: &[u8]) -> AttributeStatus {
        match uuid {
            TRANSFER_CHAR_UUID => {}
            PROGRESS_CHAR_UUID => return AttributeStatus::WriteNotPermitted,
            _ => return AttributeStatus::AttributeNotFound,
        }
        if offset != 0 {
            return AttributeStatus::InvalidOffset;
        }
        if value.len() > TRANSFER_CHAR_LEN {
            return AttributeStatus::InvalidValueSize;
        }

        match self.receiver.receive(&mut self.store, value) {
            Ok(Progress::Accepted { .. }) => AttributeStatus::Success,
            Ok(Progress::Complete { committed, .. }) => {
                info!("service: transfer done (committed={}), resetting", committed);
                self.platform.reset();
                AttributeStatus::Success
            }
            Err(err) => {
                error!("service: {}, resetting", err);
                self.platform.reset();
                AttributeStatus::InvalidValue
            }
        }
    }

    /// Attribute read callback. Fills `out` and returns the value length.
    pub fn read(&self, uuid: u16, offset: u16, out: &mut [u8]) -> Result<usize, AttributeStatus> {
        match uuid {
            PROGRESS_CHAR_UUID => {}
            TRANSFER_CHAR_UUID => return Err(AttributeStatus::ReadNotPermitted),
            _ => return Err(AttributeStatus::AttributeNotFound),
        }

        let value = self.receiver.bytes_received().to_le_bytes();
        let rest = value
            .get(offset as usize..)
            .ok_or(AttributeStatus::InvalidOffset)?;
        let dst = out
            .get_mut(..rest.len())
            .ok_or(AttributeStatus::InvalidValueSize)?;
        dst.copy_from_slice(rest);
        Ok(rest.len())
    }

    pub fn receiver(&self) -> &ChunkReceiver {
        &self.receiver
    }

    pub fn store(&self) -> &ZoneStore<C, Q> {
        &self.store
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn into_parts(self) -> (ZoneStore<C, Q>, ChunkReceiver, P) {
        (self.store, self.receiver, self.platform)
    }
}
