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

/// Mirrors the `/api/v1/status/<name>` contract: `waiting`, `building`,
/// `done` (with the terminal statuses), or `unknown`.
pub async fn handle(command: Command, settings: Settings) -> Result<(), Error> {
    let runtime = wiring::bootstrap(&settings).await?;
    let name = pkgdir_core::normalize(&command.name);

    let tables = runtime.state.tables.lock().await;
    let status = if tables.waiting.contains(&name) {
        "waiting".to_owned()
    } else if tables.building.contains(&name) {
        "building".to_owned()
    } else if let Some(metadata) = tables.pkgs_doc_files.get(&name) {
        format!("done (build={:?}, doc={:?})", metadata.build_status, metadata.doc_build_status)
    } else {
        "unknown".to_owned()
    };

    println!("{}: {status}", command.name);
    Ok(())
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("prepare state")]
    Wiring(#[from] wiring::Error),
}
