// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Duozone Developers

//! CC13x0 board support.
//!
//! - [`RomFlash`]: flash controller backed by the driverlib routines in ROM
//! - [`CortexQuiesce`]: PRIMASK interrupt masking and VIMS cache control
//! - [`Board`]: system reset and direct-call launch
//! - [`RawMemory`]: copy target for load relocation

use core::ptr;

use cortex_m::interrupt;
use cortex_m::peripheral::SCB;
use cortex_m::register::primask;

use crate::boot::{Launcher, LoadTarget, Reset};
use crate::flash::{FlashController, FlashStatus, Protection, Quiesce};

// --- ROM API ---

const ROM_API_TABLE: *const u32 = 0x1000_0180 as *const u32;
const ROM_API_FLASH_TABLE_INDEX: usize = 10;

const FLASH_PROTECTION_SET: usize = 2;
const FLASH_SECTOR_ERASE: usize = 5;
const FLASH_PROGRAM: usize = 6;

const FLASH_NO_PROTECT: u32 = 0;
const FLASH_WRITE_PROTECT: u32 = 1;

// --- Registers ---

const FLASH_BASE: u32 = 0x4003_0000;
const FLASH_O_FCFG_B0_SSIZE0: u32 = 0x2430;
const SSIZE0_SECTSIZE_MASK: u32 = 0xF;

const VIMS_BASE: u32 = 0x4003_4000;
const VIMS_O_STAT: u32 = 0x0;
const VIMS_O_CTL: u32 = 0x4;
const VIMS_MODE_MASK: u32 = 0x3;
const VIMS_STAT_MODE_CHANGING: u32 = 1 << 3;
const VIMS_MODE_OFF: u32 = 0x3;

unsafe fn rom_flash_entry(index: usize) -> usize {
    let table = ptr::read_volatile(ROM_API_TABLE.add(ROM_API_FLASH_TABLE_INDEX)) as *const u32;
    ptr::read_volatile(table.add(index)) as usize
}

unsafe fn reg_read(addr: u32) -> u32 {
    ptr::read_volatile(addr as *const u32)
}

unsafe fn reg_write(addr: u32, value: u32) {
    ptr::write_volatile(addr as *mut u32, value)
}

/// Flash controller driven through the ROM flash API.
pub struct RomFlash {
    sector_size: u32,
}

impl RomFlash {
    /// # Safety
    /// Only one instance may exist; it owns the flash controller.
    pub unsafe fn new() -> Self {
        let kb = reg_read(FLASH_BASE + FLASH_O_FCFG_B0_SSIZE0) & SSIZE0_SECTSIZE_MASK;
        Self {
            sector_size: kb * 1024,
        }
    }
}

impl FlashController for RomFlash {
    fn sector_size(&self) -> u32 {
        self.sector_size
    }

    fn read(&self, addr: u32, buf: &mut [u8]) {
        let src = addr as *const u8;
        for (i, byte) in buf.iter_mut().enumerate() {
            // SAFETY: flash is memory-mapped and always readable
            *byte = unsafe { ptr::read_volatile(src.add(i)) };
        }
    }

    fn erase_sector(&mut self, sector_addr: u32) -> Result<(), FlashStatus> {
        // SAFETY: ROM table entry has the documented FlashSectorErase signature
        let code = unsafe {
            let erase: extern "C" fn(u32) -> u32 =
                core::mem::transmute(rom_flash_entry(FLASH_SECTOR_ERASE));
            erase(sector_addr)
        };
        FlashStatus::check(code)
    }

    fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashStatus> {
        // SAFETY: ROM table entry has the documented FlashProgram signature;
        // the routine only reads `data`
        let code = unsafe {
            let program: extern "C" fn(*const u8, u32, u32) -> u32 =
                core::mem::transmute(rom_flash_entry(FLASH_PROGRAM));
            program(data.as_ptr(), addr, data.len() as u32)
        };
        FlashStatus::check(code)
    }

    fn set_protection(&mut self, sector_addr: u32, mode: Protection) {
        let mode = match mode {
            Protection::None => FLASH_NO_PROTECT,
            Protection::WriteProtect => FLASH_WRITE_PROTECT,
        };
        // SAFETY: ROM table entry has the documented FlashProtectionSet signature
        unsafe {
            let protect: extern "C" fn(u32, u32) =
                core::mem::transmute(rom_flash_entry(FLASH_PROTECTION_SET));
            protect(sector_addr, mode);
        }
    }
}

/// PRIMASK and VIMS control.
pub struct CortexQuiesce {
    _private: (),
}

impl CortexQuiesce {
    /// # Safety
    /// Only one instance may exist; it owns the VIMS mode register.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }

    fn wait_vims_settled() {
        // SAFETY: VIMS_STAT is a read-only status register
        while unsafe { reg_read(VIMS_BASE + VIMS_O_STAT) } & VIMS_STAT_MODE_CHANGING != 0 {}
    }
}

impl Quiesce for CortexQuiesce {
    /// Whether interrupts were enabled.
    type SavedInterrupts = bool;
    /// Previous VIMS mode.
    type SavedCache = u32;

    fn mask_interrupts(&mut self) -> bool {
        let was_enabled = primask::read().is_inactive();
        interrupt::disable();
        was_enabled
    }

    fn restore_interrupts(&mut self, was_enabled: bool) {
        if was_enabled {
            // SAFETY: restores the state observed by `mask_interrupts`
            unsafe { interrupt::enable() };
        }
    }

    fn disable_cache(&mut self) -> u32 {
        Self::wait_vims_settled();
        // SAFETY: exclusive owner of VIMS_CTL; VIMS_STAT is read-only
        let previous = unsafe {
            let mode = reg_read(VIMS_BASE + VIMS_O_STAT) & VIMS_MODE_MASK;
            let ctl = reg_read(VIMS_BASE + VIMS_O_CTL);
            reg_write(
                VIMS_BASE + VIMS_O_CTL,
                (ctl & !VIMS_MODE_MASK) | VIMS_MODE_OFF,
            );
            mode
        };
        Self::wait_vims_settled();
        previous
    }

    fn restore_cache(&mut self, mode: u32) {
        // SAFETY: exclusive owner of VIMS_CTL
        unsafe {
            let ctl = reg_read(VIMS_BASE + VIMS_O_CTL);
            reg_write(VIMS_BASE + VIMS_O_CTL, (ctl & !VIMS_MODE_MASK) | mode);
        }
        Self::wait_vims_settled();
    }
}

/// System reset and direct-call launch.
pub struct Board;

impl Reset for Board {
    fn reset(&mut self) {
        SCB::sys_reset();
    }
}

impl Launcher for Board {
    fn launch(&mut self, entry: u32) {
        // SAFETY: the boot resolver only launches committed images at their
        // recorded entry address
        let image: extern "C" fn() = unsafe { core::mem::transmute(entry as usize) };
        image();
    }
}

/// Writes relocated segments straight to memory.
pub struct RawMemory {
    _private: (),
}

impl RawMemory {
    /// # Safety
    /// Every destination in the load tables processed through this target
    /// must be writable memory not in use by the running code.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl LoadTarget for RawMemory {
    fn write(&mut self, dest: u32, bytes: &[u8]) {
        // SAFETY: guaranteed by the contract of `RawMemory::new`
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), dest as *mut u8, bytes.len()) };
    }
}
