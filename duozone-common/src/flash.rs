// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Duozone Developers

//! Flash erase/program/protect primitives.
//!
//! The flash controller cannot guarantee coherent instruction fetches from a
//! cache line covering a sector under modification, and an interrupt handler
//! executing from the same bank during an erase/program cycle corrupts state.
//! Every primitive therefore runs as:
//!   1. mask interrupts
//!   2. disable the instruction cache
//!   3. raw controller operation
//!   4. restore the cache
//!   5. restore interrupts
//!
//! Steps 4-5 run from a drop guard, so they also happen on the error path.
//! Status codes are returned verbatim; this layer never retries.

/// Raw status code returned by the flash controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlashStatus(pub u32);

impl FlashStatus {
    /// `FAPI_STATUS_SUCCESS`
    pub const SUCCESS: Self = Self(0x0);
    /// `FAPI_STATUS_INCORRECT_DATABUFFER_LENGTH`
    pub const BAD_LENGTH: Self = Self(0x3);
    /// `FAPI_STATUS_FSM_ERROR`
    pub const FSM_ERROR: Self = Self(0x4);

    /// Map a controller return code onto `Result`.
    pub fn check(code: u32) -> Result<(), Self> {
        if code == Self::SUCCESS.0 {
            Ok(())
        } else {
            Err(Self(code))
        }
    }
}

impl core::fmt::Display for FlashStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "flash status 0x{:x}", self.0)
    }
}

/// Sector write-protection mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Protection {
    /// `FLASH_NO_PROTECT`
    None,
    /// `FLASH_WRITE_PROTECT`
    WriteProtect,
}

/// Raw access to the flash controller. Implementations perform the bare
/// hardware operation; quiescing is the caller's job.
pub trait FlashController {
    /// Erase granularity in bytes.
    fn sector_size(&self) -> u32;

    /// Read bytes from an absolute flash address (memory-mapped on target).
    fn read(&self, addr: u32, buf: &mut [u8]);

    fn erase_sector(&mut self, sector_addr: u32) -> Result<(), FlashStatus>;

    fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashStatus>;

    fn set_protection(&mut self, sector_addr: u32, mode: Protection);
}

/// Interrupt and instruction-cache control around a flash operation.
///
/// `Saved*` values carry the state observed before the change so the exact
/// prior state is restored, not an assumed default.
pub trait Quiesce {
    type SavedInterrupts: Copy;
    type SavedCache: Copy;

    fn mask_interrupts(&mut self) -> Self::SavedInterrupts;
    fn restore_interrupts(&mut self, saved: Self::SavedInterrupts);

    fn disable_cache(&mut self) -> Self::SavedCache;
    fn restore_cache(&mut self, saved: Self::SavedCache);
}

/// Restores cache then interrupts when dropped.
struct Quiesced<'a, Q: Quiesce> {
    quiesce: &'a mut Q,
    interrupts: Q::SavedInterrupts,
    cache: Q::SavedCache,
}

impl<'a, Q: Quiesce> Quiesced<'a, Q> {
    fn enter(quiesce: &'a mut Q) -> Self {
        let interrupts = quiesce.mask_interrupts();
        let cache = quiesce.disable_cache();
        Self {
            quiesce,
            interrupts,
            cache,
        }
    }
}

impl<Q: Quiesce> Drop for Quiesced<'_, Q> {
    fn drop(&mut self) {
        self.quiesce.restore_cache(self.cache);
        self.quiesce.restore_interrupts(self.interrupts);
    }
}

/// Serialized flash primitives: every mutating call is bracketed by
/// [`Quiesce`].
pub struct FlashPrimitives<C, Q> {
    controller: C,
    quiesce: Q,
}

impl<C: FlashController, Q: Quiesce> FlashPrimitives<C, Q> {
    pub fn new(controller: C, quiesce: Q) -> Self {
        Self {
            controller,
            quiesce,
        }
    }

    pub fn sector_size(&self) -> u32 {
        self.controller.sector_size()
    }

    pub fn read(&self, addr: u32, buf: &mut [u8]) {
        self.controller.read(addr, buf);
    }

    pub fn read_u32(&self, addr: u32) -> u32 {
        let mut word = [0u8; 4];
        self.controller.read(addr, &mut word);
        u32::from_le_bytes(word)
    }

    pub fn erase(&mut self, sector_addr: u32) -> Result<(), FlashStatus> {
        trace!("flash: erase sector 0x{:08x}", sector_addr);
        let _guard = Quiesced::enter(&mut self.quiesce);
        self.controller.erase_sector(sector_addr)
    }

    pub fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashStatus> {
        trace!("flash: program {} bytes at 0x{:08x}", data.len(), addr);
        let _guard = Quiesced::enter(&mut self.quiesce);
        self.controller.program(addr, data)
    }

    pub fn set_protection(&mut self, sector_addr: u32, mode: Protection) {
        let _guard = Quiesced::enter(&mut self.quiesce);
        self.controller.set_protection(sector_addr, mode);
    }

    pub fn controller(&self) -> &C {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut C {
        &mut self.controller
    }

    pub fn into_parts(self) -> (C, Q) {
        (self.controller, self.quiesce)
    }
}
