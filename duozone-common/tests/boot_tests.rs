// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Duozone Developers

//! Boot resolver tests: promotion, relocation and launch.

mod common;

use common::{device_store, loads, payload, SimStore};
use duozone_common::boot::relocate;
use duozone_common::layout::{META_DONE_OFFSET, META_LOADS_OFFSET};
use duozone_common::sim::{SimPlatform, SimRam};
use duozone_common::{
    resolve, BootOutcome, DownloadParams, DownloadSession, LoadDescriptor, OtaError, Role, Slot,
};

fn commit(store: &mut SimStore, slot: Slot, generation: u32, data: &[u8], params: DownloadParams) {
    let mut session = DownloadSession::init_into(store, slot, generation, params).unwrap();
    session.begin(store).unwrap();
    session.process(store, data).unwrap();
    session.finish(store).unwrap();
}

fn image_params(data: &[u8]) -> DownloadParams {
    DownloadParams {
        size: data.len() as u32,
        entrypoint: 0x21,
        loads: loads(&[
            LoadDescriptor {
                dest: 0x2000_0000,
                offset: 0,
                len: 32,
            },
            LoadDescriptor {
                dest: 0x2000_1000,
                offset: 600,
                len: 300,
            },
        ]),
    }
}

fn poke_load(store: &mut SimStore, slot: Slot, index: u32, load: LoadDescriptor) {
    let at = store.layout().metadata_addr(slot) + META_LOADS_OFFSET + index * 12;
    let mut raw = [0u8; 12];
    raw[0..4].copy_from_slice(&load.dest.to_le_bytes());
    raw[4..8].copy_from_slice(&load.offset.to_le_bytes());
    raw[8..12].copy_from_slice(&load.len.to_le_bytes());
    store.flash_mut().controller_mut().poke(at, &raw);
}

fn invalidate(store: &mut SimStore, slot: Slot) {
    let done = store.layout().metadata_addr(slot) + META_DONE_OFFSET;
    store.flash_mut().controller_mut().poke(done, &[0; 4]);
}

#[test]
fn test_blank_region_has_no_image() {
    let mut store = device_store();
    let mut ram = SimRam::new();
    let mut platform = SimPlatform::default();

    assert_eq!(
        resolve(&mut store, &mut ram, &mut platform),
        Ok(BootOutcome::NoImage)
    );
    assert_eq!(platform, SimPlatform::default());
    assert!(store.flash().controller().log().is_empty());
}

#[test]
fn test_staging_image_is_promoted_then_launched() {
    let mut store = device_store();
    let data = payload(1000, 9);
    let params = image_params(&data);
    commit(&mut store, Role::Staging.slot(), 0, &data, params.clone());

    let mut ram = SimRam::new();
    let mut platform = SimPlatform::default();
    assert_eq!(
        resolve(&mut store, &mut ram, &mut platform),
        Ok(BootOutcome::Promoted { generation: 1 })
    );
    assert_eq!(platform.resets, 1);
    assert!(platform.launches.is_empty());

    let active = store.zone(Role::Active.slot());
    assert!(active.is_valid());
    assert_eq!(active.metadata.generation, 1);
    assert_eq!(active.metadata.size, params.size);
    assert_eq!(active.metadata.entrypoint, params.entrypoint);
    assert_eq!(active.metadata.loads, params.loads);
    assert_eq!(store.flash().controller().bytes(active.addr, data.len()), &data[..]);

    // Next boot: active is newer, run it.
    assert_eq!(
        resolve(&mut store, &mut ram, &mut platform),
        Ok(BootOutcome::Launched { entry: 0x18021 })
    );
    assert_eq!(platform.resets, 1);
    assert_eq!(platform.launches, vec![0x18021]);
    assert_eq!(ram.read(0x2000_0000, 32), &data[..32]);
    assert_eq!(ram.read(0x2000_1000, 300), &data[600..900]);
}

#[test]
fn test_promotion_is_a_no_op_once_staging_is_invalid() {
    let mut store = device_store();
    let data = payload(1000, 10);
    commit(&mut store, Role::Staging.slot(), 0, &data, image_params(&data));

    let mut ram = SimRam::new();
    let mut platform = SimPlatform::default();
    resolve(&mut store, &mut ram, &mut platform).unwrap();
    invalidate(&mut store, Role::Staging.slot());
    store.flash_mut().controller_mut().clear_log();

    let outcome = resolve(&mut store, &mut ram, &mut platform).unwrap();
    assert!(matches!(outcome, BootOutcome::Launched { .. }));
    assert_eq!(platform.resets, 1);
    assert!(store.flash().controller().log().is_empty());
    assert_eq!(store.metadata(Role::Active.slot()).generation, 1);
}

#[test]
fn test_older_staging_image_is_ignored() {
    let mut store = device_store();
    let data = payload(1000, 11);
    commit(&mut store, Role::Active.slot(), 5, &data, image_params(&data));
    commit(&mut store, Role::Staging.slot(), 4, &payload(1000, 12), image_params(&data));
    store.flash_mut().controller_mut().clear_log();

    let mut ram = SimRam::new();
    let mut platform = SimPlatform::default();
    assert_eq!(
        resolve(&mut store, &mut ram, &mut platform),
        Ok(BootOutcome::Launched { entry: 0x18021 })
    );
    assert!(store.flash().controller().log().is_empty());
    assert_eq!(ram.read(0x2000_0000, 32), &data[..32]);
}

#[test]
fn test_interrupted_promotion_is_retried_on_next_boot() {
    let mut store = device_store();
    let data = payload(1000, 13);
    commit(&mut store, Role::Staging.slot(), 0, &data, image_params(&data));

    let mut ram = SimRam::new();
    let mut platform = SimPlatform::default();
    store.flash_mut().controller_mut().cut_power_after(6);
    assert!(resolve(&mut store, &mut ram, &mut platform).is_err());
    store.flash_mut().controller_mut().restore_power();
    assert!(!store.metadata(Role::Active.slot()).is_valid());
    assert_eq!(platform.resets, 0);

    assert_eq!(
        resolve(&mut store, &mut ram, &mut platform),
        Ok(BootOutcome::Promoted { generation: 1 })
    );
    assert_eq!(
        store.flash().controller().bytes(0x18000, data.len()),
        &data[..]
    );
    assert!(store.flash().controller().probe().is_idle());
}

#[test]
fn test_relocation_is_idempotent() {
    let mut store = device_store();
    let data = payload(1000, 14);
    commit(&mut store, Role::Active.slot(), 0, &data, image_params(&data));

    let mut ram = SimRam::new();
    relocate(&store, Role::Active.slot(), &mut ram).unwrap();
    let first = ram.clone();
    relocate(&store, Role::Active.slot(), &mut ram).unwrap();

    assert_eq!(ram.read(0x2000_0000, 32), first.read(0x2000_0000, 32));
    assert_eq!(ram.read(0x2000_1000, 300), first.read(0x2000_1000, 300));
    assert_eq!(ram.read(0x2000_1000, 300), &data[600..900]);
}

#[test]
fn test_out_of_bounds_load_is_rejected_before_copying() {
    let mut store = device_store();
    let data = payload(1000, 15);
    commit(&mut store, Role::Active.slot(), 0, &data, image_params(&data));
    let capacity = store.layout().payload_capacity();
    poke_load(
        &mut store,
        Role::Active.slot(),
        1,
        LoadDescriptor {
            dest: 0x2000_2000,
            offset: capacity - 8,
            len: 16,
        },
    );

    let mut ram = SimRam::new();
    let mut platform = SimPlatform::default();
    assert_eq!(
        resolve(&mut store, &mut ram, &mut platform),
        Err(OtaError::BadLoad { index: 1 })
    );
    assert_eq!(ram.write_count(), 0);
    assert!(platform.launches.is_empty());
}

#[test]
fn test_wrapping_load_destination_is_rejected() {
    let mut store = device_store();
    let data = payload(1000, 16);
    commit(&mut store, Role::Active.slot(), 0, &data, image_params(&data));
    poke_load(
        &mut store,
        Role::Active.slot(),
        0,
        LoadDescriptor {
            dest: 0xFFFF_FFF0,
            offset: 0,
            len: 0x40,
        },
    );

    let mut ram = SimRam::new();
    assert_eq!(
        relocate(&store, Role::Active.slot(), &mut ram),
        Err(OtaError::BadLoad { index: 0 })
    );
    assert_eq!(ram.write_count(), 0);
}

#[test]
fn test_malformed_staging_image_is_never_promoted() {
    let mut store = device_store();
    let good = payload(1000, 17);
    commit(&mut store, Role::Active.slot(), 1, &good, image_params(&good));
    let update = payload(1000, 18);
    commit(&mut store, Role::Staging.slot(), 2, &update, image_params(&update));
    poke_load(
        &mut store,
        Role::Staging.slot(),
        1,
        LoadDescriptor {
            dest: 0x2000_1000,
            offset: 0xFF00,
            len: 0x80,
        },
    );
    store.flash_mut().controller_mut().clear_log();

    let mut ram = SimRam::new();
    let mut platform = SimPlatform::default();
    let entry = store.zone(Role::Active.slot()).entry_address();
    assert_eq!(
        resolve(&mut store, &mut ram, &mut platform),
        Ok(BootOutcome::Launched { entry })
    );
    assert_eq!(platform.resets, 0);
    assert!(store.flash().controller().log().is_empty());
    assert_eq!(ram.read(0x2000_0000, 32), &good[..32]);
}
