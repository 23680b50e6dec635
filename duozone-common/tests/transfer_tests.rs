// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Duozone Developers

//! Chunk reassembly tests: framing rules, ordering and the end-to-end commit.

mod common;

use common::{device_store, image_envelopes, payload, SimStore};
use duozone_common::layout::META_DONE_OFFSET;
use duozone_common::protocol::{EnvelopeHeader, BLOB_MAGIC};
use duozone_common::sim::{FlashOp, SimPlatform, SimRam};
use duozone_common::{
    resolve, BootOutcome, ChecksumPolicy, ChunkReceiver, ImageHeader, LoadDescriptor, OtaError,
    Progress, ProtocolFault, ReceiveError, ReceiverConfig, Slot,
};

fn envelope(header: EnvelopeHeader, payload: &[u8]) -> Vec<u8> {
    let mut out = header.encode().to_vec();
    out.extend_from_slice(payload);
    out
}

fn ops(store: &SimStore) -> usize {
    store.flash().controller().log().len()
}

fn done_writes(store: &SimStore, slot: Slot) -> usize {
    let done = store.layout().metadata_addr(slot) + META_DONE_OFFSET;
    store
        .flash()
        .controller()
        .log()
        .iter()
        .filter(|op| matches!(op, FlashOp::Program { addr, .. } if *addr == done))
        .count()
}

#[test]
fn test_400_byte_transfer_in_five_chunks() {
    let mut store = device_store();
    let mut receiver = ChunkReceiver::default();
    let data = payload(372, 20);
    let chunks = image_envelopes(0x11, &data, 80);
    assert_eq!(chunks.len(), 5);

    for (index, chunk) in chunks[..4].iter().enumerate() {
        assert_eq!(
            receiver.receive(&mut store, chunk),
            Ok(Progress::Accepted {
                received: 80 * (index as u32 + 1)
            })
        );
        assert_eq!(done_writes(&store, Slot::Zero), 0);
    }

    assert_eq!(
        receiver.receive(&mut store, &chunks[4]),
        Ok(Progress::Complete {
            committed: true,
            received: 400,
        })
    );
    assert_eq!(done_writes(&store, Slot::Zero), 1);
    assert!(receiver.is_idle());
    assert_eq!(receiver.bytes_received(), 0);

    let zone = store.zone(Slot::Zero);
    assert!(zone.is_valid());
    assert_eq!(zone.metadata.size, 372);
    assert_eq!(zone.metadata.entrypoint, 0x11);
    assert_eq!(store.flash().controller().bytes(zone.addr, 372), &data[..]);
}

#[test]
fn test_consecutive_transfers_alternate_zones() {
    let mut store = device_store();
    let mut receiver = ChunkReceiver::default();

    for (round, slot) in [Slot::Zero, Slot::One, Slot::Zero].into_iter().enumerate() {
        for chunk in image_envelopes(0, &payload(150, round as u8), 80) {
            receiver.receive(&mut store, &chunk).unwrap();
        }
        assert_eq!(store.find_authoritative(), Some(slot));
        assert_eq!(store.metadata(slot).generation, round as u32);
    }
}

#[test]
fn test_gap_in_sequence_is_fatal() {
    let mut store = device_store();
    let mut receiver = ChunkReceiver::default();
    let chunks = image_envelopes(0, &payload(300, 21), 80);

    receiver.receive(&mut store, &chunks[0]).unwrap();
    receiver.receive(&mut store, &chunks[1]).unwrap();
    let before = ops(&store);

    assert_eq!(
        receiver.receive(&mut store, &chunks[3]),
        Err(ReceiveError::Fault(ProtocolFault::OutOfSequence {
            expected: 2,
            got: 3,
        }))
    );
    assert_eq!(ops(&store), before);
    assert!(receiver.is_faulted());

    // Halted: even the expected chunk is refused.
    assert_eq!(
        receiver.receive(&mut store, &chunks[2]),
        Err(ReceiveError::Halted)
    );
    assert_eq!(ops(&store), before);
    assert!(!store.metadata(Slot::Zero).is_valid());
}

#[test]
fn test_duplicate_chunk_is_fatal() {
    let mut store = device_store();
    let mut receiver = ChunkReceiver::default();
    let chunks = image_envelopes(0, &payload(300, 22), 80);

    receiver.receive(&mut store, &chunks[0]).unwrap();
    receiver.receive(&mut store, &chunks[1]).unwrap();
    let before = ops(&store);

    assert_eq!(
        receiver.receive(&mut store, &chunks[1]),
        Err(ReceiveError::Fault(ProtocolFault::OutOfSequence {
            expected: 2,
            got: 1,
        }))
    );
    assert_eq!(ops(&store), before);
    assert_eq!(
        receiver.fault(),
        Some(ReceiveError::Fault(ProtocolFault::OutOfSequence {
            expected: 2,
            got: 1,
        }))
    );
}

#[test]
fn test_chunk_above_mtu_is_rejected_without_flash_access() {
    let mut store = device_store();
    let mut receiver = ChunkReceiver::default();
    let body = [0u8; 81];

    let err = receiver
        .receive(
            &mut store,
            &envelope(EnvelopeHeader::for_payload(400, 0, 5, &body), &body),
        )
        .unwrap_err();
    assert_eq!(
        err,
        ReceiveError::Fault(ProtocolFault::BadChunkLength { chunk_len: 81 })
    );
    assert_eq!(ops(&store), 0);
}

#[test]
fn test_transfer_limit_counts_every_chunk() {
    let mut store = device_store();
    let mut receiver = ChunkReceiver::default();
    let data = payload(372, 23);
    let mut blob = common::envelopes(
        &ImageHeader {
            entrypoint: 0,
            size: 372,
            loads: Default::default(),
        },
        &data,
        80,
    );
    // Re-frame the same five chunks as six, then append one more byte.
    for (index, chunk) in blob.iter_mut().enumerate() {
        let body = chunk[12..].to_vec();
        *chunk = envelope(EnvelopeHeader::for_payload(400, index as u8, 6, &body), &body);
    }
    for chunk in &blob {
        assert!(matches!(
            receiver.receive(&mut store, chunk),
            Ok(Progress::Accepted { .. })
        ));
    }
    assert!(store.metadata(Slot::Zero).is_valid());
    let before = ops(&store);

    let extra = envelope(EnvelopeHeader::for_payload(400, 5, 6, &[0]), &[0]);
    assert_eq!(
        receiver.receive(&mut store, &extra),
        Err(ReceiveError::Fault(ProtocolFault::TransferOverflow {
            received: 400,
            chunk_len: 1,
        }))
    );
    assert_eq!(ops(&store), before);
}

#[test]
fn test_framing_violations() {
    let body = [0u8; 40];
    let good = EnvelopeHeader::for_payload(100, 0, 3, &body);
    let cases: Vec<(Vec<u8>, ProtocolFault)> = vec![
        (vec![0; 11], ProtocolFault::Truncated { len: 11 }),
        (
            envelope(EnvelopeHeader { magic: 0x1234_5678, ..good }, &body),
            ProtocolFault::BadMagic { magic: 0x1234_5678 },
        ),
        (
            envelope(EnvelopeHeader { total_size: 0, ..good }, &body),
            ProtocolFault::BadTotalSize { total_size: 0 },
        ),
        (
            envelope(EnvelopeHeader { total_size: 401, ..good }, &body),
            ProtocolFault::BadTotalSize { total_size: 401 },
        ),
        (
            envelope(EnvelopeHeader { chunk_len: 0, ..good }, &body),
            ProtocolFault::BadChunkLength { chunk_len: 0 },
        ),
        (
            envelope(good, &body[..39]),
            ProtocolFault::ShortPayload {
                declared: 40,
                available: 39,
            },
        ),
        (
            envelope(EnvelopeHeader { chunk_index: 3, ..good }, &body),
            ProtocolFault::BadChunkCount {
                chunk_index: 3,
                chunk_count: 3,
            },
        ),
        (
            envelope(EnvelopeHeader { checksum: !good.checksum, ..good }, &body),
            ProtocolFault::ChecksumMismatch {
                expected: !good.checksum,
                computed: good.checksum,
            },
        ),
        (
            envelope(EnvelopeHeader::for_payload(100, 0, 3, &body[..20]), &body[..20]),
            ProtocolFault::HeaderTruncated { available: 20 },
        ),
    ];

    for (bytes, fault) in cases {
        let mut store = device_store();
        let mut receiver = ChunkReceiver::default();
        assert_eq!(
            receiver.receive(&mut store, &bytes),
            Err(ReceiveError::Fault(fault)),
            "{fault}"
        );
        assert_eq!(ops(&store), 0, "{fault}");
        assert!(store.flash().controller().probe().is_idle());
    }
}

#[test]
fn test_image_larger_than_transfer_is_rejected() {
    let mut store = device_store();
    let mut receiver = ChunkReceiver::default();
    let mut first = image_envelopes(0, &payload(52, 24), 80).remove(0);
    // image header `size` field
    first[12 + 2..12 + 4].copy_from_slice(&373u16.to_le_bytes());
    let body = first[12..].to_vec();
    let first = envelope(EnvelopeHeader::for_payload(400, 0, 5, &body), &body);

    assert_eq!(
        receiver.receive(&mut store, &first),
        Err(ReceiveError::Fault(ProtocolFault::SizeMismatch {
            image_size: 373,
            total_size: 400,
        }))
    );
    assert_eq!(ops(&store), 0);
}

#[test]
fn test_transfer_parameters_must_not_change() {
    let mut store = device_store();
    let mut receiver = ChunkReceiver::default();
    let chunks = image_envelopes(0, &payload(200, 25), 80);
    receiver.receive(&mut store, &chunks[0]).unwrap();

    let body = chunks[1][12..].to_vec();
    let changed = envelope(EnvelopeHeader::for_payload(229, 1, 3, &body), &body);
    assert_eq!(
        receiver.receive(&mut store, &changed),
        Err(ReceiveError::Fault(ProtocolFault::InconsistentTransfer))
    );
}

#[test]
fn test_checksum_can_be_ignored_for_legacy_senders() {
    let mut store = device_store();
    let mut receiver = ChunkReceiver::new(ReceiverConfig {
        checksum: ChecksumPolicy::Ignore,
        ..ReceiverConfig::default()
    });

    let chunks = image_envelopes(0, &payload(100, 26), 80);
    for chunk in chunks {
        let header = EnvelopeHeader::parse(&chunk).unwrap();
        let legacy = envelope(EnvelopeHeader { checksum: 0, ..header }, &chunk[12..]);
        receiver.receive(&mut store, &legacy).unwrap();
    }
    assert!(store.metadata(Slot::Zero).is_valid());
}

#[test]
fn test_last_chunk_before_image_is_complete_leaves_zone_invalid() {
    let mut store = device_store();
    let mut receiver = ChunkReceiver::default();
    let mut chunks = image_envelopes(0, &payload(372, 27), 80);
    chunks.truncate(2);
    let last = chunks[1][12..].to_vec();
    chunks[1] = envelope(EnvelopeHeader::for_payload(400, 1, 2, &last), &last);
    let body = chunks[0][12..].to_vec();
    chunks[0] = envelope(EnvelopeHeader::for_payload(400, 0, 2, &body), &body);

    receiver.receive(&mut store, &chunks[0]).unwrap();
    assert_eq!(
        receiver.receive(&mut store, &chunks[1]),
        Ok(Progress::Complete {
            committed: false,
            received: 160,
        })
    );
    assert!(!store.metadata(Slot::Zero).is_valid());
    assert!(receiver.is_idle());
}

#[test]
fn test_flash_failure_halts_receiver() {
    let mut store = device_store();
    let mut receiver = ChunkReceiver::default();
    let chunks = image_envelopes(0, &payload(300, 28), 80);
    receiver.receive(&mut store, &chunks[0]).unwrap();

    store
        .flash_mut()
        .controller_mut()
        .fail_after(0, duozone_common::FlashStatus::FSM_ERROR);
    assert_eq!(
        receiver.receive(&mut store, &chunks[1]),
        Err(ReceiveError::Flash(duozone_common::OtaError::Flash(
            duozone_common::FlashStatus::FSM_ERROR
        )))
    );
    assert!(receiver.is_faulted());
    assert!(store.flash().controller().probe().is_idle());
}

#[test]
fn test_unrunnable_image_is_refused_and_previous_image_still_boots() {
    let mut store = device_store();
    let mut receiver = ChunkReceiver::default();
    for seed in [29, 31] {
        for chunk in image_envelopes(0x11, &payload(200, seed), 80) {
            receiver.receive(&mut store, &chunk).unwrap();
        }
    }
    assert_eq!(store.find_authoritative(), Some(Slot::One));

    let cases = [
        (
            LoadDescriptor {
                dest: 0x2000_0000,
                offset: 0xFF00,
                len: 0x80,
            },
            0,
            OtaError::BadLoad { index: 0 },
        ),
        (
            LoadDescriptor {
                dest: 0xFFFF_FFF0,
                offset: 0,
                len: 0x40,
            },
            0,
            OtaError::BadLoad { index: 0 },
        ),
        (
            LoadDescriptor::default(),
            100,
            OtaError::BadEntry {
                entrypoint: 100,
                size: 100,
            },
        ),
    ];
    for (load, entrypoint, expected) in cases {
        let header = ImageHeader {
            entrypoint,
            size: 100,
            loads: [load].into_iter().filter(|l| !l.is_empty()).collect(),
        };
        let chunks = common::envelopes(&header, &payload(100, 30), 80);
        let before = ops(&store);
        let mut receiver = ChunkReceiver::default();

        assert_eq!(
            receiver.receive(&mut store, &chunks[0]),
            Err(ReceiveError::Flash(expected))
        );
        assert!(receiver.is_faulted());
        assert_eq!(ops(&store), before);
    }

    let mut ram = SimRam::new();
    let mut platform = SimPlatform::default();
    assert_eq!(
        resolve(&mut store, &mut ram, &mut platform),
        Ok(BootOutcome::Promoted { generation: 2 })
    );
    let entry = store.zone(Slot::Zero).entry_address();
    assert_eq!(
        resolve(&mut store, &mut ram, &mut platform),
        Ok(BootOutcome::Launched { entry })
    );
    assert_eq!(entry, 0x18011);
}

#[test]
fn test_magic_constant_matches_wire_bytes() {
    let body = [1u8; 4];
    let raw = envelope(EnvelopeHeader::for_payload(4, 0, 1, &body), &body);
    assert_eq!(&raw[..4], &[0x00, 0xD0, 0xBA, 0xDA]);
    assert_eq!(EnvelopeHeader::parse(&raw).unwrap().magic, BLOB_MAGIC);
}
