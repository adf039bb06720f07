// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::error::Error as _;

use tracing::error;

mod adapters;
mod cli;
mod settings;
mod wiring;

#[tokio::main]
async fn main() {
    if let Err(error) = cli::process().await {
        report_error(error);
        std::process::exit(1);
    }
}

/// Reports the full `source()` chain, matching `boulder`/`moss`'s
/// `report_error`: a single colon-joined line to stderr, plus a structured
/// `tracing` event for anyone collecting logs.
fn report_error(error: cli::Error) {
    let chain = std::iter::successors(Some(&error as &dyn std::error::Error), |e| e.source())
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(": ");

    error!(%chain, "command execution failed");
    eprintln!("Error: {chain}");
}
