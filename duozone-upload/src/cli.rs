// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Duozone Developers

//! Command-line interface definitions.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use duozone_common::layout::OTA_ZONE_SIZE;
use duozone_common::protocol::{CHUNK_MTU, MAX_BLOB_SIZE};
use duozone_common::{LoadDescriptor, OTA_FLASH_BASE};

use crate::commands;
use crate::elf::ExtractOptions;
use crate::image::{parse_load, parse_u32};

/// Command-line arguments.
#[derive(Parser)]
#[command(name = "duozone-upload")]
#[command(about = "Extract, pack, replay and inspect duozone OTA transfers")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// Extract an image manifest from a linked application ELF
    Extract {
        /// Application ELF
        #[arg(value_name = "ELF")]
        input: PathBuf,

        /// Write the manifest here instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Start of the OTA application in flash
        #[arg(long = "ota-flash-addr", default_value_t = OTA_FLASH_BASE, value_parser = parse_u32)]
        flash_addr: u32,

        /// Largest OTA application in flash
        #[arg(long = "ota-flash-len", default_value_t = OTA_ZONE_SIZE, value_parser = parse_u32)]
        flash_len: u32,

        /// Start of the OTA application's SRAM window
        #[arg(long = "ota-sram-addr", default_value_t = 0x2000_0000, value_parser = parse_u32)]
        sram_addr: u32,

        /// Size of the OTA application's SRAM window
        #[arg(long = "ota-sram-len", default_value_t = 0x1000, value_parser = parse_u32)]
        sram_len: u32,
    },

    /// Build an image and split it into chunk envelopes
    Pack {
        /// Image manifest (.json) or raw payload binary
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Output directory for ota.chunk.N hex files
        #[arg(short, long, default_value = "ota_blobs")]
        out_dir: PathBuf,

        /// Write a single binary envelope stream instead of chunk files
        #[arg(short, long, value_name = "FILE")]
        stream: Option<PathBuf>,

        /// Entry offset for raw binaries (decimal or 0x-hex)
        #[arg(short, long, default_value = "0", value_parser = parse_u32)]
        entrypoint: u32,

        /// Load descriptor for raw binaries, as dest:offset:len (repeatable)
        #[arg(short, long = "load", value_name = "DEST:OFFSET:LEN", value_parser = parse_load)]
        loads: Vec<LoadDescriptor>,

        /// Payload bytes per envelope
        #[arg(short, long, default_value_t = CHUNK_MTU)]
        mtu: u16,

        /// Largest transfer the device accepts
        #[arg(long, default_value_t = MAX_BLOB_SIZE)]
        max_blob: u16,

        /// Send zero checksums, as legacy senders do
        #[arg(long)]
        no_checksum: bool,
    },

    /// Feed envelopes through the device engine against a simulated flash
    Replay {
        /// Chunk files, chunk directories or envelope streams, in order
        #[arg(value_name = "INPUT", required = true)]
        inputs: Vec<PathBuf>,

        /// Existing OTA region dump to start from (blank flash otherwise)
        #[arg(short, long, value_name = "FILE")]
        region: Option<PathBuf>,

        /// Where to write the resulting region dump
        #[arg(short, long, default_value = "ota_region.bin")]
        output: PathBuf,

        /// Accept envelopes without checking their checksums
        #[arg(long)]
        no_checksum: bool,

        /// Run the boot sequence after the transfer
        #[arg(short, long)]
        boot: bool,
    },

    /// Report the zones of an OTA region dump
    Inspect {
        /// OTA region dump
        #[arg(value_name = "FILE")]
        region: PathBuf,

        /// Flash address of the dump's first byte
        #[arg(short, long, default_value_t = OTA_FLASH_BASE, value_parser = parse_u32)]
        base: u32,
    },
}

/// Execute the parsed CLI command.
pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Extract {
            input,
            output,
            flash_addr,
            flash_len,
            sram_addr,
            sram_len,
        } => commands::extract(
            &input,
            output.as_deref(),
            &ExtractOptions {
                flash_addr,
                flash_len,
                sram_addr,
                sram_len,
            },
        ),
        Commands::Pack {
            input,
            out_dir,
            stream,
            entrypoint,
            loads,
            mtu,
            max_blob,
            no_checksum,
        } => commands::pack(
            &input,
            &commands::PackOptions {
                out_dir,
                stream,
                entrypoint,
                loads,
                mtu,
                max_blob,
                checksums: !no_checksum,
            },
        ),
        Commands::Replay {
            inputs,
            region,
            output,
            no_checksum,
            boot,
        } => commands::replay(&inputs, region.as_deref(), &output, !no_checksum, boot),
        Commands::Inspect { region, base } => commands::inspect(&region, base),
    }
}
