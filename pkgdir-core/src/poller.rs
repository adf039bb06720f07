// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Periodically re-fetches the upstream manifest, diffs it against the
//! first-seen history, and triggers a [`crate::manifest::ManifestStore`]
//! reload. Failure is per-tick: errors are logged and the loop continues,
//! matching `crates/config`'s best-effort, log-and-continue posture for
//! individual file failures.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{cache, domain::PkgHistoryItem, state::State};

#[derive(Debug, Error)]
pub enum Error {
    #[error("fetch upstream manifest")]
    Fetch(#[from] reqwest::Error),
    #[error("parse upstream manifest")]
    Parse(#[from] serde_json::Error),
    #[error("manifest store")]
    Manifest(#[from] crate::manifest::Error),
    #[error("persist first-seen history")]
    Cache(#[from] cache::Error),
}

pub struct ManifestPoller {
    state: Arc<State>,
    upstream_url: Url,
    history_path: std::path::PathBuf,
    period: Duration,
}

impl ManifestPoller {
    pub fn new(state: Arc<State>, upstream_url: Url, history_path: impl Into<std::path::PathBuf>, period: Duration) -> Self {
        Self {
            state,
            upstream_url,
            history_path: history_path.into(),
            period,
        }
    }

    /// Runs forever at `period`. Intended to be driven by `tokio::spawn` so
    /// callers can hold the handle for graceful shutdown.
    pub async fn run(&self) -> ! {
        let mut interval = tokio::time::interval(self.period);
        loop {
            interval.tick().await;

            if let Err(source) = self.tick().await {
                warn!(%source, "manifest poller tick failed, will retry next period");
            }
        }
    }

    async fn tick(&self) -> Result<(), Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let remote_bytes = client
            .get(self.upstream_url.clone())
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        let local_path = {
            let manifest = self.state.manifest.lock().await;
            manifest.local_path().to_owned()
        };

        if let Ok(local_bytes) = fs_err::tokio::read(&local_path).await
            && local_bytes == remote_bytes.as_ref()
        {
            return Ok(());
        }

        let raw: Vec<serde_json::Value> = serde_json::from_slice(&remote_bytes)?;

        let mut history = cache::load_history(&self.history_path).await;
        let known: std::collections::HashSet<String> = history.iter().map(|item| item.normalized_name.clone()).collect();

        let now = Utc::now();
        let mut seen_this_tick = std::collections::HashSet::new();
        for value in &raw {
            let Some(name) = value.get("name").and_then(|v| v.as_str()) else {
                continue;
            };
            let normalized = crate::domain::normalize(name);
            seen_this_tick.insert(normalized.clone());

            if !known.contains(&normalized) {
                history.push(PkgHistoryItem {
                    normalized_name: normalized,
                    first_seen_time: now,
                });
            }
        }

        cache::save_history(&self.history_path, &history).await?;

        {
            let mut manifest = self.state.manifest.lock().await;
            manifest.replace_local_and_reload(&remote_bytes).await?;
        }

        for item in &history {
            if !seen_this_tick.contains(&item.normalized_name) {
                info!(name = %item.normalized_name, "package disappeared from upstream manifest but remains in history");
            }
        }

        Ok(())
    }
}
