// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Duozone Developers

//! Download session: stream one image into a target zone.
//!
//! Phases:
//! - `init`: pick target zone and generation, compute sector geometry
//! - `begin`: unprotect and erase every sector of the target, ascending
//! - `process`: program payload bytes at the running offset (repeatable)
//! - `finish`: write `size`, `entrypoint`, `generation`, `loads`, then `done`
//!
//! Erasing destroys the target's `done` field first, so the zone stays
//! invalid until the very last write of `finish`. Nothing is rolled back on
//! failure: an interrupted zone is already non-authoritative.

use crate::flash::{FlashController, FlashStatus, Protection, Quiesce};
use crate::layout::{
    DONE_MAGIC, INVALID_GENERATION, META_DONE_OFFSET, META_ENTRYPOINT_OFFSET,
    META_GENERATION_OFFSET, META_LOADS_OFFSET, META_SIZE_OFFSET,
};
use crate::zone::{encode_loads, Loads, Slot, ZoneMetadata, ZoneStore};

/// Errors surfaced by the download session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OtaError {
    /// The flash controller reported a non-success status.
    Flash(FlashStatus),
    /// Declared image does not fit in the zone's payload area.
    TooLarge { size: u32, capacity: u32 },
    /// A write would run past the zone's payload area.
    Overflow { offset: u32, len: u32 },
    /// `finish` called before all declared bytes were written.
    Incomplete { written: u32, declared: u32 },
    /// The next generation would collide with the invalid sentinel.
    GenerationExhausted,
    /// Zone address or size is not a whole number of sectors.
    Geometry { sector_size: u32 },
    /// A load descriptor copies from outside the image or to a destination
    /// range that wraps the address space.
    BadLoad { index: u8 },
    /// Entry offset does not fall inside the image.
    BadEntry { entrypoint: u32, size: u32 },
}

impl From<FlashStatus> for OtaError {
    fn from(status: FlashStatus) -> Self {
        OtaError::Flash(status)
    }
}

impl core::fmt::Display for OtaError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            OtaError::Flash(status) => write!(f, "{status}"),
            OtaError::TooLarge { size, capacity } => {
                write!(f, "image of {size} bytes exceeds zone capacity {capacity}")
            }
            OtaError::Overflow { offset, len } => {
                write!(f, "write of {len} bytes at payload offset {offset} overflows the zone")
            }
            OtaError::Incomplete { written, declared } => {
                write!(f, "only {written} of {declared} declared bytes written")
            }
            OtaError::GenerationExhausted => write!(f, "generation counter exhausted"),
            OtaError::Geometry { sector_size } => {
                write!(f, "zone is not aligned to {sector_size}-byte sectors")
            }
            OtaError::BadLoad { index } => write!(f, "load descriptor {index} is out of bounds"),
            OtaError::BadEntry { entrypoint, size } => {
                write!(f, "entry offset 0x{entrypoint:x} lies outside the {size}-byte image")
            }
        }
    }
}

/// Parameters of one transfer, normally taken from the image header.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DownloadParams {
    /// Payload bytes that will follow.
    pub size: u32,
    /// Entry offset relative to the zone base.
    pub entrypoint: u32,
    pub loads: Loads,
}

impl DownloadParams {
    /// Parameters that reproduce a committed zone.
    pub fn from_metadata(meta: &ZoneMetadata) -> Self {
        Self {
            size: meta.size,
            entrypoint: meta.entrypoint,
            loads: meta.loads.clone(),
        }
    }

    /// Check that the image can run once committed: it fits in `capacity`,
    /// its entry offset lies inside it and every load copies from inside it.
    pub fn validate(&self, capacity: u32) -> Result<(), OtaError> {
        if self.size > capacity {
            return Err(OtaError::TooLarge {
                size: self.size,
                capacity,
            });
        }
        if self.entrypoint >= self.size {
            return Err(OtaError::BadEntry {
                entrypoint: self.entrypoint,
                size: self.size,
            });
        }
        match self.loads.iter().position(|load| !load.fits(self.size)) {
            Some(index) => Err(OtaError::BadLoad { index: index as u8 }),
            None => Ok(()),
        }
    }
}

/// State of one transfer into one zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSession {
    target: Slot,
    target_addr: u32,
    generation: u32,
    declared_size: u32,
    bytes_written: u32,
    entrypoint: u32,
    loads: Loads,
    sector_size: u32,
    first_sector: u32,
    sector_count: u32,
}

impl DownloadSession {
    /// Target the non-authoritative zone (slot 0 when none is valid) and
    /// stamp authoritative generation + 1 (or 0).
    pub fn init<C: FlashController, Q: Quiesce>(
        store: &ZoneStore<C, Q>,
        params: DownloadParams,
    ) -> Result<Self, OtaError> {
        let (target, generation) = match store.find_authoritative() {
            None => (Slot::Zero, 0),
            Some(current) => {
                let current_gen = store.metadata(current).generation;
                (current.other(), next_generation(current_gen)?)
            }
        };
        Self::init_into(store, target, generation, params)
    }

    /// Target an explicit zone with an explicit generation.
    pub fn init_into<C: FlashController, Q: Quiesce>(
        store: &ZoneStore<C, Q>,
        target: Slot,
        generation: u32,
        params: DownloadParams,
    ) -> Result<Self, OtaError> {
        if generation == INVALID_GENERATION {
            return Err(OtaError::GenerationExhausted);
        }

        let layout = store.layout();
        if let Err(err) = params.validate(layout.payload_capacity()) {
            warn!("init: image rejected: {}", err);
            return Err(err);
        }

        let sector_size = store.flash().sector_size();
        let target_addr = layout.zone_addr(target);
        if sector_size == 0
            || target_addr % sector_size != 0
            || layout.zone_size % sector_size != 0
        {
            return Err(OtaError::Geometry { sector_size });
        }

        debug!(
            "init: zone {} at 0x{:08x}, generation {}, size {}",
            target.index(),
            target_addr,
            generation,
            params.size
        );

        Ok(Self {
            target,
            target_addr,
            generation,
            declared_size: params.size,
            bytes_written: 0,
            entrypoint: params.entrypoint,
            loads: params.loads,
            sector_size,
            first_sector: target_addr / sector_size,
            sector_count: layout.zone_size / sector_size,
        })
    }

    /// Unprotect and erase every sector of the target zone in ascending
    /// order. The first failure aborts; sectors already erased stay erased.
    pub fn begin<C: FlashController, Q: Quiesce>(
        &self,
        store: &mut ZoneStore<C, Q>,
    ) -> Result<(), OtaError> {
        let flash = store.flash_mut();
        for sector_addr in self.sector_addrs() {
            flash.set_protection(sector_addr, Protection::None);
            flash.erase(sector_addr).map_err(|status| {
                error!("begin: erase 0x{:08x} failed: {}", sector_addr, status.0);
                OtaError::Flash(status)
            })?;
        }
        Ok(())
    }

    /// Program `data` at the running payload offset and advance it.
    pub fn process<C: FlashController, Q: Quiesce>(
        &mut self,
        store: &mut ZoneStore<C, Q>,
        data: &[u8],
    ) -> Result<(), OtaError> {
        let len = u32::try_from(data.len()).map_err(|_| OtaError::Overflow {
            offset: self.bytes_written,
            len: u32::MAX,
        })?;
        let capacity = store.layout().payload_capacity();
        if self
            .bytes_written
            .checked_add(len)
            .map_or(true, |end| end > capacity)
        {
            return Err(OtaError::Overflow {
                offset: self.bytes_written,
                len,
            });
        }

        store
            .flash_mut()
            .program(self.target_addr + self.bytes_written, data)?;
        self.bytes_written += len;
        Ok(())
    }

    /// Commit the metadata trailer. `done` is written last; any failure
    /// before it leaves the zone invalid. On failure the zone is erased again
    /// on a best-effort basis so no half-written trailer survives.
    pub fn finish<C: FlashController, Q: Quiesce>(
        self,
        store: &mut ZoneStore<C, Q>,
    ) -> Result<(), OtaError> {
        if self.bytes_written != self.declared_size {
            return Err(OtaError::Incomplete {
                written: self.bytes_written,
                declared: self.declared_size,
            });
        }

        if let Err(status) = self.write_trailer(store) {
            error!("finish: metadata write failed: {}", status.0);
            self.scrub(store);
            return Err(OtaError::Flash(status));
        }

        let flash = store.flash_mut();
        for sector_addr in self.sector_addrs() {
            flash.set_protection(sector_addr, Protection::WriteProtect);
        }

        info!(
            "finish: zone {} committed, generation {}",
            self.target.index(),
            self.generation
        );
        Ok(())
    }

    fn write_trailer<C: FlashController, Q: Quiesce>(
        &self,
        store: &mut ZoneStore<C, Q>,
    ) -> Result<(), FlashStatus> {
        let meta = store.layout().metadata_addr(self.target);
        let flash = store.flash_mut();

        flash.program(meta + META_SIZE_OFFSET, &self.declared_size.to_le_bytes())?;
        flash.program(meta + META_ENTRYPOINT_OFFSET, &self.entrypoint.to_le_bytes())?;
        flash.program(meta + META_GENERATION_OFFSET, &self.generation.to_le_bytes())?;
        flash.program(meta + META_LOADS_OFFSET, &encode_loads(&self.loads))?;
        flash.program(meta + META_DONE_OFFSET, &DONE_MAGIC.to_le_bytes())
    }

    fn scrub<C: FlashController, Q: Quiesce>(&self, store: &mut ZoneStore<C, Q>) {
        let flash = store.flash_mut();
        for sector_addr in self.sector_addrs() {
            if flash.erase(sector_addr).is_err() {
                warn!("scrub: erase 0x{:08x} failed", sector_addr);
            }
        }
    }

    fn sector_addrs(&self) -> impl Iterator<Item = u32> {
        let sector_size = self.sector_size;
        (self.first_sector..self.first_sector + self.sector_count).map(move |s| s * sector_size)
    }

    pub fn target(&self) -> Slot {
        self.target
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn declared_size(&self) -> u32 {
        self.declared_size
    }

    pub fn bytes_written(&self) -> u32 {
        self.bytes_written
    }

    pub fn remaining(&self) -> u32 {
        self.declared_size.saturating_sub(self.bytes_written)
    }

    pub fn is_complete(&self) -> bool {
        self.bytes_written == self.declared_size
    }

    pub fn entrypoint(&self) -> u32 {
        self.entrypoint
    }

    pub fn loads(&self) -> &Loads {
        &self.loads
    }

    pub fn sector_size(&self) -> u32 {
        self.sector_size
    }

    pub fn sector_count(&self) -> u32 {
        self.sector_count
    }
}

/// Generation that supersedes `current`.
pub fn next_generation(current: u32) -> Result<u32, OtaError> {
    match current.checked_add(1) {
        Some(next) if next != INVALID_GENERATION => Ok(next),
        _ => Err(OtaError::GenerationExhausted),
    }
}
