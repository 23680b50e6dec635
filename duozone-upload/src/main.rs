// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Duozone Developers

//! Host tool for duozone OTA transfers.

mod cli;
mod commands;
mod elf;
mod image;

use anyhow::Result;
use clap::Parser;

use cli::Cli;

fn main() -> Result<()> {
    cli::run(Cli::parse())
}
