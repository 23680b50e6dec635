// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Duozone Developers

//! Command implementations.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, ensure, Context, Result};
use crc::{Crc, CRC_32_ISO_HDLC};
use indicatif::{ProgressBar, ProgressStyle};

use duozone_common::layout::ZoneLayout;
use duozone_common::service::{PROGRESS_CHAR_UUID, TRANSFER_CHAR_UUID};
use duozone_common::sim::{store_from, SimFlash, SimPlatform, SimQuiesce, SimRam, SIM_SECTOR_SIZE};
use duozone_common::{
    plan_boot, resolve, AttributeStatus, BootOutcome, BootPlan, ChecksumPolicy, LoadDescriptor,
    OtaService, ReceiverConfig, Role, Slot, ZoneStore,
};

use crate::elf::{self, ExtractOptions};
use crate::image::{read_envelopes, Image, CHUNK_FILE_PREFIX};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Resolver passes before giving up; a promotion needs two.
const MAX_BOOT_PASSES: usize = 3;

/// Extract an image manifest from an application ELF.
pub fn extract(input: &Path, output: Option<&Path>, options: &ExtractOptions) -> Result<()> {
    let bytes = fs::read(input).with_context(|| format!("Failed to read {}", input.display()))?;
    let manifest = elf::extract(&bytes, options)
        .with_context(|| format!("Failed to extract {}", input.display()))?;
    let json = serde_json::to_string_pretty(&manifest)?;

    match output {
        Some(path) => {
            fs::write(path, &json).with_context(|| format!("Failed to write {}", path.display()))?;
            println!(
                "Manifest:   {} ({} bytes, entry +0x{:x}, {} loads)",
                path.display(),
                manifest.size.unwrap_or_default(),
                manifest.entrypoint,
                manifest.loads.len()
            );
        }
        None => println!("{json}"),
    }
    Ok(())
}

/// Options of the `pack` command.
pub struct PackOptions {
    pub out_dir: PathBuf,
    pub stream: Option<PathBuf>,
    pub entrypoint: u32,
    pub loads: Vec<LoadDescriptor>,
    pub mtu: u16,
    pub max_blob: u16,
    pub checksums: bool,
}

/// Build an image and write its envelopes.
pub fn pack(input: &Path, options: &PackOptions) -> Result<()> {
    let image = if input.extension().is_some_and(|ext| ext == "json") {
        Image::load_manifest(input)?
    } else {
        let data = fs::read(input).with_context(|| format!("Failed to read {}", input.display()))?;
        Image::new(options.entrypoint, &options.loads, data)?
    };

    println!(
        "Image:      {} ({} bytes, CRC32: 0x{:08x})",
        input.display(),
        image.data.len(),
        CRC32.checksum(&image.data)
    );
    println!("Entrypoint: +0x{:04x}", image.header.entrypoint);
    for (index, load) in image.header.loads.iter().enumerate() {
        println!("Load {}:     {}", index, describe_load(load));
    }

    let envelopes = image.envelopes(options.mtu, options.max_blob, options.checksums)?;

    match &options.stream {
        Some(path) => {
            fs::write(path, envelopes.concat())
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!(
                "Stream:     {} ({} envelopes)",
                path.display(),
                envelopes.len()
            );
        }
        None => {
            prepare_out_dir(&options.out_dir)?;
            for (index, envelope) in envelopes.iter().enumerate() {
                let path = options.out_dir.join(format!("{CHUNK_FILE_PREFIX}{index}"));
                fs::write(&path, hex::encode(envelope))
                    .with_context(|| format!("Failed to write {}", path.display()))?;
            }
            println!(
                "Chunks:     {} ({} files)",
                options.out_dir.display(),
                envelopes.len()
            );
        }
    }

    Ok(())
}

/// Create the chunk directory, dropping chunk files of an earlier run.
fn prepare_out_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let stale = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(CHUNK_FILE_PREFIX));
        if stale {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
        }
    }
    Ok(())
}

/// Run envelopes through the attribute service over a simulated region,
/// optionally boot it, and write the resulting dump.
pub fn replay(
    inputs: &[PathBuf],
    region: Option<&Path>,
    output: &Path,
    checksums: bool,
    boot: bool,
) -> Result<()> {
    let layout = ZoneLayout::device();
    let flash = match region {
        Some(path) => load_region(path, layout.base)?,
        None => SimFlash::new(layout.base, layout.region_size(), SIM_SECTOR_SIZE),
    };
    ensure!(
        flash.image().len() as u32 == layout.region_size(),
        "region dump must be exactly {} bytes",
        layout.region_size()
    );

    let config = ReceiverConfig {
        checksum: if checksums {
            ChecksumPolicy::Enforce
        } else {
            ChecksumPolicy::Ignore
        },
        ..ReceiverConfig::default()
    };
    let mut service = OtaService::new(store_from(flash, layout), config, SimPlatform::default());

    let envelopes = read_envelopes(inputs)?;
    let pb = ProgressBar::new(envelopes.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks {msg}")?
            .progress_chars("#>-"),
    );

    let mut transfers = 0;
    for (index, envelope) in envelopes.iter().enumerate() {
        let resets = service.platform().resets;
        match service.write(TRANSFER_CHAR_UUID, 0, envelope) {
            AttributeStatus::Success => {}
            AttributeStatus::InvalidValue => {
                pb.abandon();
                match service.receiver().fault() {
                    Some(fault) => bail!("envelope {index} rejected: {fault}"),
                    None => bail!("envelope {index} rejected"),
                }
            }
            status => {
                pb.abandon();
                bail!("envelope {index} refused by the attribute layer: {status:?}");
            }
        }

        if service.platform().resets > resets {
            transfers += 1;
        }
        pb.set_message(format!("{} bytes", received(&service)?));
        pb.inc(1);
    }
    pb.finish_with_message("done");

    if !service.receiver().is_idle() {
        println!(
            "Transfer incomplete: {} bytes received, device keeps its current image",
            received(&service)?
        );
    }
    println!("Transfers completed: {transfers}");

    let (mut store, _, _) = service.into_parts();
    report_zones(&store);

    if boot {
        boot_region(&mut store)?;
    }

    let (flash, _) = store.into_flash().into_parts();
    fs::write(output, flash.image())
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Region:     {}", output.display());

    Ok(())
}

/// Print zones, the authoritative zone and what the next boot will do.
pub fn inspect(region: &Path, base: u32) -> Result<()> {
    let flash = load_region(region, base)?;
    let layout = ZoneLayout::new(base, flash.image().len() as u32 / 2);
    let store = store_from(flash, layout);

    report_zones(&store);
    Ok(())
}

fn load_region(path: &Path, base: u32) -> Result<SimFlash> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let zone_size = bytes.len() / 2;
    if bytes.is_empty() || zone_size % SIM_SECTOR_SIZE as usize != 0 || bytes.len() % 2 != 0 {
        bail!(
            "{}: {} bytes is not two whole zones of {}-byte sectors",
            path.display(),
            bytes.len(),
            SIM_SECTOR_SIZE
        );
    }
    Ok(SimFlash::from_image(base, SIM_SECTOR_SIZE, bytes))
}

fn received(service: &OtaService<SimFlash, SimQuiesce, SimPlatform>) -> Result<u32> {
    let mut value = [0u8; 4];
    service
        .read(PROGRESS_CHAR_UUID, 0, &mut value)
        .map_err(|status| anyhow::anyhow!("progress read failed: {status:?}"))?;
    Ok(u32::from_le_bytes(value))
}

fn boot_region(store: &mut ZoneStore<SimFlash, SimQuiesce>) -> Result<()> {
    let mut ram = SimRam::new();
    for _ in 0..MAX_BOOT_PASSES {
        let mut platform = SimPlatform::default();
        let outcome = resolve(store, &mut ram, &mut platform)
            .map_err(|err| anyhow::anyhow!("boot failed: {err}"))?;
        match outcome {
            BootOutcome::Promoted { generation } => {
                println!("Boot:       promoted staging as generation {generation}, reset");
            }
            BootOutcome::Launched { entry } => {
                println!(
                    "Boot:       launched at 0x{entry:08x} ({} RAM writes)",
                    ram.write_count()
                );
                return Ok(());
            }
            BootOutcome::NoImage => {
                println!("Boot:       no valid image");
                return Ok(());
            }
        }
    }
    bail!("boot did not settle after {MAX_BOOT_PASSES} passes")
}

fn report_zones(store: &ZoneStore<SimFlash, SimQuiesce>) {
    let capacity = store.layout().payload_capacity();

    for slot in Slot::ALL {
        let zone = store.zone(slot);
        let role = if slot == Role::Active.slot() {
            "active"
        } else {
            "staging"
        };
        println!("Zone {} ({role}) at 0x{:08x}:", slot.index(), zone.addr);
        if !zone.is_valid() {
            println!("  State:      invalid (done = 0x{:08x})", zone.metadata.done);
            continue;
        }

        let meta = &zone.metadata;
        println!("  State:      valid");
        println!("  Generation: {}", meta.generation);
        if meta.size <= capacity {
            let mut payload = vec![0u8; meta.size as usize];
            store.read_payload(slot, 0, &mut payload);
            println!(
                "  Size:       {} bytes (CRC32: 0x{:08x})",
                meta.size,
                CRC32.checksum(&payload)
            );
        } else {
            println!("  Size:       {} bytes (exceeds zone capacity)", meta.size);
        }
        println!(
            "  Entry:      +0x{:x} -> 0x{:08x}",
            meta.entrypoint,
            zone.entry_address()
        );
        for (index, load) in meta.loads.iter().enumerate() {
            println!("  Load {index}:     {}", describe_load(load));
        }
    }

    match store.find_authoritative() {
        Some(slot) => println!("Authoritative: zone {}", slot.index()),
        None => println!("Authoritative: none"),
    }

    let plan = plan_boot(
        &store.metadata(Role::Active.slot()),
        &store.metadata(Role::Staging.slot()),
    );
    match plan {
        BootPlan::Promote { generation } => {
            println!("Next boot:     promote staging as generation {generation}")
        }
        BootPlan::Launch => println!("Next boot:     launch active zone"),
        BootPlan::Idle => println!("Next boot:     idle"),
    }
}

fn describe_load(load: &LoadDescriptor) -> String {
    format!(
        "{} bytes from +0x{:x} to 0x{:08x}",
        load.len, load.offset, load.dest
    )
}
