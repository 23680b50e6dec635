// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Duozone Developers

//! Dual-zone flash OTA engine.
//!
//! This crate supports both `no_std` (embedded) and `std` (host) environments:
//! - Default: `no_std` mode for embedded targets
//! - `std` feature: Enables `std` support and the [`sim`] flash simulation for host tools and tests
//! - `embedded` feature: Enables the CC13x0 Cortex-M backend (ROM flash API, VIMS cache, SCB reset)
//! - `defmt` feature: Routes the engine's log statements to `defmt`
//!
//! The engine is layered leaves first:
//! - [`flash`]: erase/program/protect primitives bracketed by interrupt masking and cache disabling
//! - [`zone`]: the two-zone on-flash layout and its metadata trailer
//! - [`session`]: the Init / Begin / Process / Finish download state machine
//! - [`boot`]: promotion, load-table relocation and control transfer at startup
//! - [`protocol`] and [`receiver`]: the chunk envelope wire format and its reassembly state machine
//! - [`service`]: the attribute-write boundary the radio stack calls into

#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[macro_use]
mod log;

pub mod boot;
pub mod flash;
pub mod layout;
pub mod protocol;
pub mod receiver;
pub mod service;
pub mod session;
pub mod zone;

// Host-side flash simulation (requires std feature)
#[cfg(feature = "std")]
pub mod sim;

// CC13x0 board support (requires embedded feature)
#[cfg(feature = "embedded")]
pub mod cc13x0;

// Re-export commonly used types
pub use boot::{plan_boot, resolve, BootOutcome, BootPlan, Launcher, LoadTarget, Reset, Role};
pub use flash::{FlashController, FlashPrimitives, FlashStatus, Protection, Quiesce};
pub use layout::{ZoneLayout, DONE_MAGIC, INVALID_GENERATION, MAX_LOADS, OTA_FLASH_BASE};
pub use protocol::{EnvelopeHeader, ImageHeader, BLOB_MAGIC, ENVELOPE_LEN, IMAGE_HEADER_LEN};
pub use receiver::{
    ChecksumPolicy, ChunkReceiver, Progress, ProtocolFault, ReceiveError, ReceiverConfig,
};
pub use service::{AttributeStatus, OtaService};
pub use session::{DownloadParams, DownloadSession, OtaError};
pub use zone::{LoadDescriptor, Loads, Slot, ZoneMetadata, ZoneStore, ZoneView};
