// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::time::Duration;

use clap::Parser;
use thiserror::Error;

use crate::{settings::Settings, wiring};

#[derive(Debug, Parser)]
pub struct Command {
    /// Package name (normalized before lookup)
    pub name: String,
    /// Bypass the expiry check even if a recent build exists
    #[arg(long, default_value_t = false)]
    pub force: bool,
}

pub async fn handle(command: Command, settings: Settings) -> Result<(), Error> {
    let runtime = wiring::bootstrap(&settings).await?;
    runtime.orchestrator.request(&command.name, command.force).await?;

    let completed = runtime
        .orchestrator
        .wait_completion(&command.name, Duration::from_secs(settings.build_timeout_seconds))
        .await;

    if !completed {
        println!(
            "{}: still building after {}s, check `pkgdir status` later",
            command.name, settings.build_timeout_seconds
        );
        return Ok(());
    }

    let tables = runtime.state.tables.lock().await;
    match tables.pkgs_doc_files.get(&pkgdir_core::normalize(&command.name)) {
        Some(metadata) => println!(
            "{}: build={:?} doc={:?} version={}",
            command.name, metadata.build_status, metadata.doc_build_status, metadata.version
        ),
        None => println!("{}: no metadata recorded (package may not exist)", command.name),
    }

    Ok(())
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("prepare orchestrator")]
    Wiring(#[from] wiring::Error),
    #[error("request build")]
    Orchestrator(#[from] pkgdir_core::orchestrator::Error),
}
