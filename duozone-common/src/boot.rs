// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Duozone Developers

//! Boot-time zone resolution.
//!
//! Zone roles are fixed: slot 0 is the executable (`Active`) zone, slot 1
//! the `Staging` zone a download lands in. At startup:
//! 1. a valid staging zone newer than the active one (or any valid staging
//!    zone when the active one is invalid) is copied into the active slot
//!    with generation + 1, then the device resets;
//! 2. otherwise a valid active zone has its load table applied and is
//!    launched at `zone base + entrypoint`;
//! 3. otherwise there is nothing to run.
//!
//! A staging zone whose entry offset or load table does not fit its image
//! is never promoted, so the active image is not erased for it.

use crate::flash::{FlashController, Quiesce};
use crate::layout::TRANSFER_BLOCK_SIZE;
use crate::session::{next_generation, DownloadParams, DownloadSession, OtaError};
use crate::zone::{LoadDescriptor, Slot, ZoneMetadata, ZoneStore};

/// Role of a zone, independent of its physical slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Role {
    /// Currently executed image.
    Active,
    /// Incoming image waiting for promotion.
    Staging,
}

impl Role {
    pub const fn slot(self) -> Slot {
        match self {
            Role::Active => Slot::Zero,
            Role::Staging => Slot::One,
        }
    }
}

/// What the resolver will do, decided from both trailers alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootPlan {
    /// Copy staging into active, stamping `generation`.
    Promote { generation: u32 },
    /// Relocate and run the active zone.
    Launch,
    /// Neither zone holds a runnable image.
    Idle,
}

/// What the resolver did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootOutcome {
    /// Staging was promoted and a reset requested.
    Promoted { generation: u32 },
    /// Active zone handed to the launcher at `entry`.
    Launched { entry: u32 },
    /// Factory / first-boot state.
    NoImage,
}

/// Destination of load-table copies (RAM on target).
pub trait LoadTarget {
    fn write(&mut self, dest: u32, bytes: &[u8]);
}

/// Scheduler boundary: start the image at an absolute entry address, either
/// as a new task or as a direct call.
pub trait Launcher {
    fn launch(&mut self, entry: u32);
}

/// Unconditional hardware reset. Does not return on hardware.
pub trait Reset {
    fn reset(&mut self);
}

/// Decide between promotion, launch and idle.
pub fn plan_boot(active: &ZoneMetadata, staging: &ZoneMetadata) -> BootPlan {
    match (active.valid_generation(), staging.valid_generation()) {
        (active_gen, Some(staging_gen)) if active_gen.map_or(true, |a| staging_gen > a) => {
            match next_generation(staging_gen) {
                Ok(generation) => BootPlan::Promote { generation },
                // The staging image cannot be stamped; keep running what we have.
                Err(_) if active_gen.is_some() => BootPlan::Launch,
                Err(_) => BootPlan::Idle,
            }
        }
        (Some(_), _) => BootPlan::Launch,
        (None, _) => BootPlan::Idle,
    }
}

/// Run the boot sequence once.
pub fn resolve<C, Q, T, P>(
    store: &mut ZoneStore<C, Q>,
    ram: &mut T,
    platform: &mut P,
) -> Result<BootOutcome, OtaError>
where
    C: FlashController,
    Q: Quiesce,
    T: LoadTarget,
    P: Launcher + Reset,
{
    let active = store.metadata(Role::Active.slot());
    let mut staging = store.metadata(Role::Staging.slot());
    if staging.is_valid() {
        let capacity = store.layout().payload_capacity();
        if let Err(err) = DownloadParams::from_metadata(&staging).validate(capacity) {
            warn!("boot: ignoring malformed staging image: {}", err);
            staging = ZoneMetadata::erased();
        }
    }

    match plan_boot(&active, &staging) {
        BootPlan::Promote { generation } => {
            info!(
                "boot: promoting staging generation {} as {}",
                staging.generation,
                generation
            );
            promote(store, generation)?;
            platform.reset();
            Ok(BootOutcome::Promoted { generation })
        }
        BootPlan::Launch => {
            let zone = store.zone(Role::Active.slot());
            relocate(store, Role::Active.slot(), ram)?;
            let entry = zone.entry_address();
            info!("boot: launching generation {} at 0x{:08x}", zone.metadata.generation, entry);
            platform.launch(entry);
            Ok(BootOutcome::Launched { entry })
        }
        BootPlan::Idle => {
            info!("boot: no valid image");
            Ok(BootOutcome::NoImage)
        }
    }
}

/// Copy the staging zone into the active zone with a full download session.
pub fn promote<C: FlashController, Q: Quiesce>(
    store: &mut ZoneStore<C, Q>,
    generation: u32,
) -> Result<(), OtaError> {
    let source = Role::Staging.slot();
    let params = DownloadParams::from_metadata(&store.metadata(source));

    let mut session = DownloadSession::init_into(store, Role::Active.slot(), generation, params)?;
    session.begin(store)?;

    let mut block = [0u8; TRANSFER_BLOCK_SIZE];
    while !session.is_complete() {
        let n = (session.remaining() as usize).min(block.len());
        store.read_payload(source, session.bytes_written(), &mut block[..n]);
        session.process(store, &block[..n])?;
    }

    session.finish(store)
}

/// Apply every load descriptor of a zone: copy `len` bytes from
/// `payload + offset` to `dest`. Descriptors outside the payload area or
/// with a wrapping destination are rejected before anything is copied.
pub fn relocate<C, Q, T>(store: &ZoneStore<C, Q>, slot: Slot, ram: &mut T) -> Result<(), OtaError>
where
    C: FlashController,
    Q: Quiesce,
    T: LoadTarget,
{
    let meta = store.metadata(slot);
    let capacity = store.layout().payload_capacity();

    for (index, load) in meta.loads.iter().enumerate() {
        if !load.fits(capacity) {
            error!("relocate: load {} out of bounds", index);
            return Err(OtaError::BadLoad { index: index as u8 });
        }
    }

    for load in meta.loads.iter() {
        debug!(
            "relocate: {} bytes from +0x{:x} to 0x{:08x}",
            load.len,
            load.offset,
            load.dest
        );
        copy_load(store, slot, load, ram);
    }
    Ok(())
}

fn copy_load<C, Q, T>(store: &ZoneStore<C, Q>, slot: Slot, load: &LoadDescriptor, ram: &mut T)
where
    C: FlashController,
    Q: Quiesce,
    T: LoadTarget,
{
    let mut block = [0u8; TRANSFER_BLOCK_SIZE];
    let mut done = 0u32;
    while done < load.len {
        let n = ((load.len - done) as usize).min(block.len());
        store.read_payload(slot, load.offset + done, &mut block[..n]);
        ram.write(load.dest + done, &block[..n]);
        done += n as u32;
    }
}
