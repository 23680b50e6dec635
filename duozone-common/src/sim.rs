// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Duozone Developers

//! In-memory simulation of the device for host tools and tests.
//!
//! [`SimFlash`] models NOR flash: erase sets a sector to `0xFF`, program can
//! only clear bits, write-protected sectors reject mutation. It also supports:
//! - one-shot failure injection on the n-th mutating operation
//! - power-cut simulation: after a budget of mutating operations, every
//!   further mutation is dropped and reported as [`SimFlash::POWER_LOST`]
//! - an operation log for ordering assertions
//!
//! Every mutation asserts that the [`SimQuiesce`] it was built with reports
//! interrupts masked and cache disabled.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::vec;
use std::vec::Vec;

use crate::boot::{Launcher, LoadTarget, Reset};
use crate::flash::{FlashController, FlashPrimitives, FlashStatus, Protection, Quiesce};
use crate::layout::ZoneLayout;
use crate::zone::ZoneStore;

/// Sector size of the CC13x0 flash bank.
pub const SIM_SECTOR_SIZE: u32 = 4096;

/// Mutating operation recorded by [`SimFlash`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashOp {
    Erase(u32),
    Program { addr: u32, len: u32 },
    Protect { addr: u32, mode: Protection },
}

#[derive(Debug, Clone, Copy, Default)]
struct ProbeState {
    irq_masked: bool,
    cache_off: bool,
}

/// Interrupt/cache state shared between [`SimQuiesce`] and [`SimFlash`].
#[derive(Debug, Clone, Default)]
pub struct QuiesceProbe(Rc<Cell<ProbeState>>);

impl QuiesceProbe {
    pub fn is_quiesced(&self) -> bool {
        let state = self.0.get();
        state.irq_masked && state.cache_off
    }

    pub fn is_idle(&self) -> bool {
        let state = self.0.get();
        !state.irq_masked && !state.cache_off
    }
}

/// Simulated interrupt mask and instruction cache.
#[derive(Debug, Clone)]
pub struct SimQuiesce {
    probe: QuiesceProbe,
}

impl Quiesce for SimQuiesce {
    type SavedInterrupts = bool;
    type SavedCache = bool;

    fn mask_interrupts(&mut self) -> bool {
        let mut state = self.probe.0.get();
        let was = state.irq_masked;
        state.irq_masked = true;
        self.probe.0.set(state);
        was
    }

    fn restore_interrupts(&mut self, saved: bool) {
        let mut state = self.probe.0.get();
        state.irq_masked = saved;
        self.probe.0.set(state);
    }

    fn disable_cache(&mut self) -> bool {
        let mut state = self.probe.0.get();
        let was = state.cache_off;
        state.cache_off = true;
        self.probe.0.set(state);
        was
    }

    fn restore_cache(&mut self, saved: bool) {
        let mut state = self.probe.0.get();
        state.cache_off = saved;
        self.probe.0.set(state);
    }
}

/// RAM-backed NOR flash covering `[base, base + len)`.
#[derive(Debug)]
pub struct SimFlash {
    base: u32,
    sector_size: u32,
    mem: Vec<u8>,
    protected: Vec<bool>,
    probe: QuiesceProbe,
    mutations: u32,
    fail_at: Option<(u32, FlashStatus)>,
    power_budget: Option<u32>,
    log: Vec<FlashOp>,
}

impl SimFlash {
    /// Status reported for mutations attempted after a simulated power cut.
    pub const POWER_LOST: FlashStatus = FlashStatus(0xDEAD);

    /// Fully erased flash.
    pub fn new(base: u32, len: u32, sector_size: u32) -> Self {
        Self::from_image(base, sector_size, vec![0xFF; len as usize])
    }

    /// Flash initialised from a dump.
    pub fn from_image(base: u32, sector_size: u32, mem: Vec<u8>) -> Self {
        assert!(sector_size > 0 && mem.len() % sector_size as usize == 0);
        let sectors = mem.len() / sector_size as usize;
        Self {
            base,
            sector_size,
            mem,
            protected: vec![false; sectors],
            probe: QuiesceProbe::default(),
            mutations: 0,
            fail_at: None,
            power_budget: None,
            log: Vec::new(),
        }
    }

    /// A quiesce handle wired to this flash's probe.
    pub fn quiesce(&self) -> SimQuiesce {
        SimQuiesce {
            probe: self.probe.clone(),
        }
    }

    pub fn probe(&self) -> QuiesceProbe {
        self.probe.clone()
    }

    pub fn image(&self) -> &[u8] {
        &self.mem
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    /// Bytes at an absolute address.
    pub fn bytes(&self, addr: u32, len: usize) -> &[u8] {
        let start = self.index(addr, len);
        &self.mem[start..start + len]
    }

    /// Overwrite bytes directly, bypassing NOR semantics and protection.
    pub fn poke(&mut self, addr: u32, data: &[u8]) {
        let start = self.index(addr, data.len());
        self.mem[start..start + data.len()].copy_from_slice(data);
    }

    /// Fail the mutating operation `n` operations from now (0 = the next one).
    pub fn fail_after(&mut self, n: u32, status: FlashStatus) {
        self.fail_at = Some((self.mutations + n, status));
    }

    /// Let `n` more mutating operations through, then cut power.
    pub fn cut_power_after(&mut self, n: u32) {
        self.power_budget = Some(n);
    }

    /// Power comes back; protection latches reset as on a real reboot.
    pub fn restore_power(&mut self) {
        self.power_budget = None;
        self.protected.fill(false);
    }

    pub fn is_powered(&self) -> bool {
        self.power_budget != Some(0)
    }

    pub fn is_protected(&self, addr: u32) -> bool {
        self.protected[self.sector_of(addr)]
    }

    pub fn log(&self) -> &[FlashOp] {
        &self.log
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    pub fn erase_count(&self) -> usize {
        self.log
            .iter()
            .filter(|op| matches!(op, FlashOp::Erase(_)))
            .count()
    }

    pub fn program_count(&self) -> usize {
        self.log
            .iter()
            .filter(|op| matches!(op, FlashOp::Program { .. }))
            .count()
    }

    fn index(&self, addr: u32, len: usize) -> usize {
        let start = addr
            .checked_sub(self.base)
            .unwrap_or_else(|| panic!("address 0x{addr:08x} below simulated flash"))
            as usize;
        assert!(
            start + len <= self.mem.len(),
            "range 0x{addr:08x}+{len} beyond simulated flash"
        );
        start
    }

    fn sector_of(&self, addr: u32) -> usize {
        self.index(addr, 0) / self.sector_size as usize
    }

    /// Common gate for every mutation: quiesce check, power, injected faults.
    fn admit(&mut self) -> Result<(), FlashStatus> {
        assert!(
            self.probe.is_quiesced(),
            "flash mutated without masking interrupts and disabling the cache"
        );

        match self.power_budget {
            Some(0) => return Err(Self::POWER_LOST),
            Some(ref mut left) => *left -= 1,
            None => {}
        }

        let op = self.mutations;
        self.mutations += 1;
        match self.fail_at {
            Some((at, status)) if at == op => {
                self.fail_at = None;
                Err(status)
            }
            _ => Ok(()),
        }
    }
}

impl FlashController for SimFlash {
    fn sector_size(&self) -> u32 {
        self.sector_size
    }

    fn read(&self, addr: u32, buf: &mut [u8]) {
        buf.copy_from_slice(self.bytes(addr, buf.len()));
    }

    fn erase_sector(&mut self, sector_addr: u32) -> Result<(), FlashStatus> {
        self.admit()?;
        assert_eq!(sector_addr % self.sector_size, 0, "unaligned sector erase");
        let sector = self.sector_of(sector_addr);
        if self.protected[sector] {
            return Err(FlashStatus::FSM_ERROR);
        }
        let start = self.index(sector_addr, self.sector_size as usize);
        self.mem[start..start + self.sector_size as usize].fill(0xFF);
        self.log.push(FlashOp::Erase(sector_addr));
        Ok(())
    }

    fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashStatus> {
        self.admit()?;
        if data.is_empty() {
            return Err(FlashStatus::BAD_LENGTH);
        }
        let start = self.index(addr, data.len());
        let first = self.sector_of(addr);
        let last = self.sector_of(addr + data.len() as u32 - 1);
        if self.protected[first..=last].iter().any(|&p| p) {
            return Err(FlashStatus::FSM_ERROR);
        }
        for (cell, byte) in self.mem[start..start + data.len()].iter_mut().zip(data) {
            *cell &= *byte;
        }
        self.log.push(FlashOp::Program {
            addr,
            len: data.len() as u32,
        });
        Ok(())
    }

    fn set_protection(&mut self, sector_addr: u32, mode: Protection) {
        assert!(self.probe.is_quiesced(), "protection changed while not quiesced");
        if !self.is_powered() {
            return;
        }
        let sector = self.sector_of(sector_addr);
        self.protected[sector] = mode == Protection::WriteProtect;
        self.log.push(FlashOp::Protect {
            addr: sector_addr,
            mode,
        });
    }
}

/// Zone store over a blank simulated region.
pub fn blank_store(layout: ZoneLayout, sector_size: u32) -> ZoneStore<SimFlash, SimQuiesce> {
    store_from(SimFlash::new(layout.base, layout.region_size(), sector_size), layout)
}

/// Zone store over an existing simulated flash.
pub fn store_from(flash: SimFlash, layout: ZoneLayout) -> ZoneStore<SimFlash, SimQuiesce> {
    let quiesce = flash.quiesce();
    ZoneStore::new(FlashPrimitives::new(flash, quiesce), layout)
}

/// Sparse byte-addressed RAM receiving relocated segments.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SimRam {
    cells: BTreeMap<u32, u8>,
    writes: usize,
}

impl SimRam {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes at `addr`; never-written cells read as zero.
    pub fn read(&self, addr: u32, len: usize) -> Vec<u8> {
        (0..len as u32)
            .map(|i| self.cells.get(&(addr + i)).copied().unwrap_or(0))
            .collect()
    }

    pub fn write_count(&self) -> usize {
        self.writes
    }
}

impl LoadTarget for SimRam {
    fn write(&mut self, dest: u32, bytes: &[u8]) {
        for (i, byte) in bytes.iter().enumerate() {
            self.cells.insert(dest + i as u32, *byte);
        }
        self.writes += 1;
    }
}

/// Records resets and launches instead of performing them.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SimPlatform {
    pub resets: u32,
    pub launches: Vec<u32>,
}

impl Reset for SimPlatform {
    fn reset(&mut self) {
        self.resets += 1;
    }
}

impl Launcher for SimPlatform {
    fn launch(&mut self, entry: u32) {
        self.launches.push(entry);
    }
}
