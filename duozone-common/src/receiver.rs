// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Duozone Developers

//! Chunk reassembly: drive a download session from a strictly ordered
//! sequence of envelopes.
//!
//! Any framing violation is fatal. The receiver latches `Faulted`, touches
//! flash no more, and reports the fault; the transport boundary is expected
//! to reset the device.

use crate::flash::{FlashController, Quiesce};
use crate::protocol::{
    chunk_checksum, EnvelopeHeader, ImageHeader, BLOB_MAGIC, CHUNK_MTU, ENVELOPE_LEN,
    IMAGE_HEADER_LEN, MAX_BLOB_SIZE,
};
use crate::session::{DownloadParams, DownloadSession, OtaError};
use crate::zone::ZoneStore;

/// Whether envelope checksums are verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChecksumPolicy {
    /// Reject chunks whose checksum does not match the payload.
    Enforce,
    /// Accept any checksum (legacy senders always send 0).
    Ignore,
}

/// Limits applied to every transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ReceiverConfig {
    pub max_blob_size: u16,
    pub chunk_mtu: u16,
    pub checksum: ChecksumPolicy,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            max_blob_size: MAX_BLOB_SIZE,
            chunk_mtu: CHUNK_MTU,
            checksum: ChecksumPolicy::Enforce,
        }
    }
}

/// Fatal framing violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolFault {
    /// Write shorter than the envelope header.
    Truncated { len: usize },
    BadMagic { magic: u32 },
    BadTotalSize { total_size: u16 },
    BadChunkLength { chunk_len: u16 },
    /// Envelope does not cover its declared payload.
    ShortPayload { declared: u16, available: usize },
    /// Chunk index or count impossible for the transfer.
    BadChunkCount { chunk_index: u8, chunk_count: u8 },
    OutOfSequence { expected: u16, got: u8 },
    /// Cumulative bytes would exceed the maximum transfer size.
    TransferOverflow { received: u32, chunk_len: u16 },
    /// `total_size` or `chunk_count` changed mid-transfer.
    InconsistentTransfer,
    ChecksumMismatch { expected: u16, computed: u16 },
    /// First chunk too short to hold the image header.
    HeaderTruncated { available: usize },
    /// Image header declares more bytes than the transfer carries.
    SizeMismatch { image_size: u16, total_size: u16 },
    /// Chunk carries bytes past the declared image size.
    ImageOverrun { written: u32, declared: u32, len: usize },
}

/// Failure of one `receive` call. Every variant poisons the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReceiveError {
    Fault(ProtocolFault),
    Flash(OtaError),
    /// A previous error halted the receiver.
    Halted,
}

impl From<ProtocolFault> for ReceiveError {
    fn from(fault: ProtocolFault) -> Self {
        ReceiveError::Fault(fault)
    }
}

impl From<OtaError> for ReceiveError {
    fn from(err: OtaError) -> Self {
        ReceiveError::Flash(err)
    }
}

/// Result of an accepted envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Progress {
    /// More chunks expected.
    Accepted { received: u32 },
    /// Last chunk processed; the receiver is back to `New`. `committed`
    /// tells whether the zone trailer was written, `received` counts the
    /// envelope payload bytes of the whole transfer.
    Complete { committed: bool, received: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    New,
    Receiving(DownloadSession),
    Committed,
    Faulted,
}

/// Per-transfer reassembly state, owned by the transport boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkReceiver {
    config: ReceiverConfig,
    phase: Phase,
    /// Index the next envelope must carry.
    next_index: u16,
    received: u32,
    total_size: u16,
    chunk_count: u8,
    /// Image bytes declared by the first chunk's header.
    image_size: u32,
    fault: Option<ReceiveError>,
}

impl ChunkReceiver {
    pub fn new(config: ReceiverConfig) -> Self {
        Self {
            config,
            phase: Phase::New,
            next_index: 0,
            received: 0,
            total_size: 0,
            chunk_count: 0,
            image_size: 0,
            fault: None,
        }
    }

    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    /// Envelope payload bytes accepted in the current transfer.
    pub fn bytes_received(&self) -> u32 {
        self.received
    }

    pub fn is_idle(&self) -> bool {
        self.phase == Phase::New
    }

    pub fn is_faulted(&self) -> bool {
        self.phase == Phase::Faulted
    }

    /// The error that halted the receiver.
    pub fn fault(&self) -> Option<ReceiveError> {
        self.fault
    }

    /// Session of the transfer in progress.
    pub fn session(&self) -> Option<&DownloadSession> {
        match &self.phase {
            Phase::Receiving(session) => Some(session),
            _ => None,
        }
    }

    /// Process one envelope.
    pub fn receive<C: FlashController, Q: Quiesce>(
        &mut self,
        store: &mut ZoneStore<C, Q>,
        envelope: &[u8],
    ) -> Result<Progress, ReceiveError> {
        if self.is_faulted() {
            return Err(ReceiveError::Halted);
        }

        match self.step(store, envelope) {
            Ok(progress) => Ok(progress),
            Err(err) => {
                error!("receiver: halted on {}", err);
                self.phase = Phase::Faulted;
                self.fault = Some(err);
                Err(err)
            }
        }
    }

    fn step<C: FlashController, Q: Quiesce>(
        &mut self,
        store: &mut ZoneStore<C, Q>,
        envelope: &[u8],
    ) -> Result<Progress, ReceiveError> {
        let header = self.validate(envelope)?;
        let payload = &envelope[ENVELOPE_LEN..ENVELOPE_LEN + header.chunk_len as usize];

        let data = match core::mem::replace(&mut self.phase, Phase::New) {
            Phase::New => {
                let (session, data) = Self::open(store, &header, payload)?;
                self.total_size = header.total_size;
                self.chunk_count = header.chunk_count;
                self.image_size = session.declared_size();
                self.phase = Phase::Receiving(session);
                data
            }
            phase => {
                self.phase = phase;
                payload
            }
        };

        self.write(store, data)?;

        self.next_index += 1;
        self.received += header.chunk_len as u32;
        trace!(
            "receiver: chunk {}/{} accepted, {} bytes received",
            header.chunk_index,
            header.chunk_count,
            self.received
        );

        if header.is_last() {
            let committed = self.phase == Phase::Committed;
            let received = self.received;
            info!(
                "receiver: transfer complete, {} bytes, committed={}",
                received,
                committed
            );
            self.reset();
            return Ok(Progress::Complete {
                committed,
                received,
            });
        }

        Ok(Progress::Accepted {
            received: self.received,
        })
    }

    /// Framing checks, in the order the wire contract lists them. Nothing
    /// touches flash before all of them pass.
    fn validate(&self, envelope: &[u8]) -> Result<EnvelopeHeader, ProtocolFault> {
        let header = EnvelopeHeader::parse(envelope).ok_or(ProtocolFault::Truncated {
            len: envelope.len(),
        })?;

        if header.magic != BLOB_MAGIC {
            return Err(ProtocolFault::BadMagic {
                magic: header.magic,
            });
        }

        if header.total_size == 0 || header.total_size > self.config.max_blob_size {
            return Err(ProtocolFault::BadTotalSize {
                total_size: header.total_size,
            });
        }

        if header.chunk_len == 0 || header.chunk_len > self.config.chunk_mtu {
            return Err(ProtocolFault::BadChunkLength {
                chunk_len: header.chunk_len,
            });
        }

        let available = envelope.len() - ENVELOPE_LEN;
        if available < header.chunk_len as usize {
            return Err(ProtocolFault::ShortPayload {
                declared: header.chunk_len,
                available,
            });
        }

        if header.chunk_count == 0 || header.chunk_index >= header.chunk_count {
            return Err(ProtocolFault::BadChunkCount {
                chunk_index: header.chunk_index,
                chunk_count: header.chunk_count,
            });
        }

        if header.chunk_index as u16 != self.next_index {
            return Err(ProtocolFault::OutOfSequence {
                expected: self.next_index,
                got: header.chunk_index,
            });
        }

        if self.received + header.chunk_len as u32 > self.config.max_blob_size as u32 {
            return Err(ProtocolFault::TransferOverflow {
                received: self.received,
                chunk_len: header.chunk_len,
            });
        }

        if self.next_index > 0
            && (header.total_size != self.total_size || header.chunk_count != self.chunk_count)
        {
            return Err(ProtocolFault::InconsistentTransfer);
        }

        if self.config.checksum == ChecksumPolicy::Enforce {
            let payload = &envelope[ENVELOPE_LEN..ENVELOPE_LEN + header.chunk_len as usize];
            let computed = chunk_checksum(payload);
            if computed != header.checksum {
                return Err(ProtocolFault::ChecksumMismatch {
                    expected: header.checksum,
                    computed,
                });
            }
        }

        Ok(header)
    }

    /// First chunk: parse the image header, Init and Begin the session.
    /// Returns the session and the payload bytes after the header.
    fn open<'p, C: FlashController, Q: Quiesce>(
        store: &mut ZoneStore<C, Q>,
        header: &EnvelopeHeader,
        payload: &'p [u8],
    ) -> Result<(DownloadSession, &'p [u8]), ReceiveError> {
        let image = ImageHeader::parse(payload).ok_or(ProtocolFault::HeaderTruncated {
            available: payload.len(),
        })?;

        if image.size as usize + IMAGE_HEADER_LEN > header.total_size as usize {
            return Err(ProtocolFault::SizeMismatch {
                image_size: image.size,
                total_size: header.total_size,
            }
            .into());
        }

        info!(
            "receiver: new transfer, {} chunks, image {} bytes",
            header.chunk_count,
            image.size
        );

        let params = DownloadParams {
            size: image.size as u32,
            entrypoint: image.entrypoint as u32,
            loads: image.loads,
        };
        let session = DownloadSession::init(store, params)?;
        session.begin(store)?;

        Ok((session, &payload[IMAGE_HEADER_LEN..]))
    }

    /// Program data bytes; Finish once the declared size is reached.
    fn write<C: FlashController, Q: Quiesce>(
        &mut self,
        store: &mut ZoneStore<C, Q>,
        data: &[u8],
    ) -> Result<(), ReceiveError> {
        let session = match &mut self.phase {
            Phase::Receiving(session) => session,
            Phase::Committed if data.is_empty() => return Ok(()),
            Phase::Committed => {
                return Err(ProtocolFault::ImageOverrun {
                    written: self.image_size,
                    declared: self.image_size,
                    len: data.len(),
                }
                .into())
            }
            Phase::New | Phase::Faulted => return Err(ReceiveError::Halted),
        };

        if data.len() as u32 > session.remaining() {
            return Err(ProtocolFault::ImageOverrun {
                written: session.bytes_written(),
                declared: session.declared_size(),
                len: data.len(),
            }
            .into());
        }

        if !data.is_empty() {
            session.process(store, data)?;
        }

        if session.is_complete() {
            if let Phase::Receiving(session) = core::mem::replace(&mut self.phase, Phase::Committed)
            {
                session.finish(store)?;
            }
        }
        Ok(())
    }

    /// Back to `New` for the next transfer.
    fn reset(&mut self) {
        self.phase = Phase::New;
        self.next_index = 0;
        self.received = 0;
        self.total_size = 0;
        self.chunk_count = 0;
        self.image_size = 0;
    }
}

impl Default for ChunkReceiver {
    fn default() -> Self {
        Self::new(ReceiverConfig::default())
    }
}

impl core::fmt::Display for ProtocolFault {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ProtocolFault::Truncated { len } => write!(f, "write of {len} bytes is truncated"),
            ProtocolFault::BadMagic { magic } => write!(f, "bad magic 0x{magic:08x}"),
            ProtocolFault::BadTotalSize { total_size } => {
                write!(f, "bad total size {total_size}")
            }
            ProtocolFault::BadChunkLength { chunk_len } => {
                write!(f, "bad chunk length {chunk_len}")
            }
            ProtocolFault::ShortPayload {
                declared,
                available,
            } => write!(f, "chunk declares {declared} bytes, carries {available}"),
            ProtocolFault::BadChunkCount {
                chunk_index,
                chunk_count,
            } => write!(f, "chunk {chunk_index} of {chunk_count} is impossible"),
            ProtocolFault::OutOfSequence { expected, got } => {
                write!(f, "expected chunk {expected}, got {got}")
            }
            ProtocolFault::TransferOverflow {
                received,
                chunk_len,
            } => write!(f, "{chunk_len} more bytes after {received} exceed the transfer limit"),
            ProtocolFault::InconsistentTransfer => write!(f, "transfer parameters changed"),
            ProtocolFault::ChecksumMismatch { expected, computed } => {
                write!(f, "checksum 0x{expected:04x} does not match 0x{computed:04x}")
            }
            ProtocolFault::HeaderTruncated { available } => {
                write!(f, "first chunk holds {available} bytes, too short for the image header")
            }
            ProtocolFault::SizeMismatch {
                image_size,
                total_size,
            } => write!(f, "image of {image_size} bytes does not fit a {total_size}-byte transfer"),
            ProtocolFault::ImageOverrun {
                written,
                declared,
                len,
            } => write!(f, "{len} bytes after {written} overrun the {declared}-byte image"),
        }
    }
}

impl core::fmt::Display for ReceiveError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ReceiveError::Fault(fault) => write!(f, "protocol fault: {fault}"),
            ReceiveError::Flash(err) => write!(f, "flash error: {err}"),
            ReceiveError::Halted => write!(f, "receiver halted"),
        }
    }
}
