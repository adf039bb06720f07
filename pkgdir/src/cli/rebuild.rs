// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use clap::Parser;
use thiserror::Error;

use crate::{settings::Settings, wiring};

#[derive(Debug, Parser)]
pub struct Command {
    /// Package name (normalized before lookup)
    pub name: String,
}

/// Mirrors `POST /ci/rebuild/<name>`: always `force=true`, never waits.
pub async fn handle(command: Command, settings: Settings) -> Result<(), Error> {
    let runtime = wiring::bootstrap(&settings).await?;
    runtime.orchestrator.request(&command.name, true).await?;
    println!("{}: rebuild requested", command.name);
    Ok(())
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("prepare orchestrator")]
    Wiring(#[from] wiring::Error),
    #[error("request rebuild")]
    Orchestrator(#[from] pkgdir_core::orchestrator::Error),
}
