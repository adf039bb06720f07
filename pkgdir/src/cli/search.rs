// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use clap::Parser;
use pkgdir_core::QueryService;
use thiserror::Error;

use crate::{settings::Settings, wiring};

#[derive(Debug, Parser)]
pub struct Command {
    /// Terms, split on space/comma, matched against name/tag/description
    pub query: String,
}

pub async fn handle(command: Command, settings: Settings) -> Result<(), Error> {
    let runtime = wiring::bootstrap(&settings).await?;
    let results = QueryService::new(&runtime.state).search_packages(&command.query).await;

    if results.is_empty() {
        println!("no matches for {:?}", command.query);
        return Ok(());
    }

    for (name, score) in results {
        println!("{score:>3}  {name}");
    }

    Ok(())
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("prepare state")]
    Wiring(#[from] wiring::Error),
}
