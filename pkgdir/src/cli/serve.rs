// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! The daemon entrypoint: runs the manifest poller and watchdog ping
//! forever. The HTTP router that actually serves `/pkg/<name>`, `/docs/<name>`,
//! etc. over `BuildOrchestrator`/`QueryService` is out of scope for this
//! crate (§1 of the design doc) and wired externally against the same
//! `State`/`BuildOrchestrator` this bootstraps.

use std::time::Duration;

use clap::Parser;
use thiserror::Error;
use tokio::signal::unix::{SignalKind, signal};
use tracing::info;

use pkgdir_core::ManifestPoller;

use crate::{adapters, settings::Settings, wiring};

#[derive(Debug, Parser)]
pub struct Command {
    /// Grace period to let an in-flight build finish naturally before exit
    #[arg(long, default_value = "30")]
    pub shutdown_grace_seconds: u64,
}

pub async fn handle(command: Command, settings: Settings) -> Result<(), Error> {
    let runtime = wiring::bootstrap(&settings).await?;

    let poller = ManifestPoller::new(
        runtime.state.clone(),
        settings.upstream_manifest_url.clone(),
        settings.cache_path.clone(),
        Duration::from_secs(settings.manifest_poll_seconds),
    );
    let poller_handle = tokio::spawn(async move { poller.run().await });

    let watchdog = adapters::watchdog_from_env();
    let watchdog_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(15));
        loop {
            interval.tick().await;
            watchdog.ping();
        }
    });

    info!(
        poll_seconds = settings.manifest_poll_seconds,
        "pkgdir serving: manifest poller and watchdog running, awaiting shutdown signal"
    );
    wait_for_shutdown_signal().await?;

    poller_handle.abort();
    watchdog_handle.abort();

    info!(
        grace_seconds = command.shutdown_grace_seconds,
        "shutdown signal received, waiting for any in-flight build to finish naturally"
    );
    let idle_before_deadline = tokio::time::timeout(Duration::from_secs(command.shutdown_grace_seconds), async {
        loop {
            if runtime.state.tables.lock().await.building.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    })
    .await
    .is_ok();

    if !idle_before_deadline {
        info!("grace period elapsed with a build still in flight; exiting anyway, it dies with the process");
    }

    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<(), Error> {
    let mut terminate = signal(SignalKind::terminate()).map_err(Error::Signal)?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("prepare orchestrator")]
    Wiring(#[from] wiring::Error),
    #[error("install signal handler")]
    Signal(#[source] std::io::Error),
}
