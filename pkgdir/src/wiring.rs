// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Assembles a [`pkgdir_core::State`] and [`pkgdir_core::BuildOrchestrator`]
//! from [`Settings`], the way `boulder::Env` gathers cache/config/data
//! directories into one record every subcommand handler takes by value.

use std::{sync::Arc, time::Duration};

use pkgdir_core::{BuildOrchestrator, OrchestratorConfig, manifest::ManifestStore, ports::NullMetricsSink, scanner, state::State};
use thiserror::Error;

use crate::settings::Settings;

pub struct Runtime {
    pub state: Arc<State>,
    pub orchestrator: BuildOrchestrator,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("load manifest")]
    Manifest(#[from] pkgdir_core::manifest::Error),
}

/// Loads the manifest, rehydrates `State` from whatever the directory
/// scanner finds on disk, and builds an orchestrator wired against
/// `settings`. Every `pkgdir` subcommand starts from this.
pub async fn bootstrap(settings: &Settings) -> Result<Runtime, Error> {
    let mut manifest = ManifestStore::new(&settings.packages_list_fname, Some(settings.upstream_manifest_url.clone()));
    manifest.load().await?;

    let state = Arc::new(State::new(manifest));

    scanner::scan(&state, &settings.workspace_root, "pkgs").await;

    let config = OrchestratorConfig {
        build_expiry: Duration::from_secs(settings.build_expiry_minutes.max(0) as u64 * 60),
        build_timeout: Duration::from_secs(settings.build_timeout_seconds),
        doc_timeout: Duration::from_secs(settings.doc_timeout_seconds),
    };

    let orchestrator = BuildOrchestrator::new(
        state.clone(),
        config,
        settings.workspace_root.clone(),
        settings.installer_bin.clone(),
        settings.doc_bin.clone(),
        settings.source_extension.clone(),
        Arc::new(NullMetricsSink),
    );

    Ok(Runtime { state, orchestrator })
}
