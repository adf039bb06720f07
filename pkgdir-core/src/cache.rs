// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Persists the two on-disk artifacts named in the filesystem layout:
//! `.cache.json` (first-seen history) and `<workspace>/<pkg>/nimpkgdir.json`
//! (per-package build metadata). Both are replaced atomically: write to a
//! `.tmp` sibling, then rename, the same two-step
//! `moss::request::download_with_progress` uses for `<to>.part` -> `<to>`.

use std::path::{Path, PathBuf};

use fs_err::tokio as fs;
use thiserror::Error;
use tracing::warn;

use crate::domain::{PkgDocMetadata, PkgHistoryItem};

#[derive(Debug, Error)]
pub enum Error {
    #[error("read {path:?}")]
    Read { path: PathBuf, #[source] source: std::io::Error },
    #[error("parse {path:?}")]
    Parse { path: PathBuf, #[source] source: serde_json::Error },
    #[error("write {path:?}")]
    Write { path: PathBuf, #[source] source: std::io::Error },
    #[error("rename {path:?}")]
    Rename { path: PathBuf, #[source] source: std::io::Error },
}

/// Loads the first-seen history from `path`. On any failure to read or parse,
/// logs and returns an empty history rather than propagating the error: a
/// fresh history is always a valid starting point.
pub async fn load_history(path: &Path) -> Vec<PkgHistoryItem> {
    match fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(history) => history,
            Err(source) => {
                warn!(?path, %source, "first-seen history is corrupt, starting fresh");
                Vec::new()
            }
        },
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(source) => {
            warn!(?path, %source, "failed to read first-seen history, starting fresh");
            Vec::new()
        }
    }
}

pub async fn save_history(path: &Path, history: &[PkgHistoryItem]) -> Result<(), Error> {
    write_atomic(path, &serde_json::to_vec_pretty(history).expect("serialize history")).await
}

/// Loads one package's persisted [`PkgDocMetadata`]. A missing or corrupt
/// file is not an error to the caller: that package is simply rebuilt on its
/// next request.
pub async fn load_metadata(path: &Path) -> Option<PkgDocMetadata> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => return None,
        Err(source) => {
            warn!(?path, %source, "failed to read package metadata");
            return None;
        }
    };

    match serde_json::from_slice(&bytes) {
        Ok(metadata) => Some(metadata),
        Err(source) => {
            warn!(?path, %source, "package metadata is corrupt, skipping");
            None
        }
    }
}

/// Normalizes `metadata` (per [`PkgDocMetadata::normalize_for_persist`]) and
/// writes it atomically to `path`, creating the parent directory if needed.
pub async fn save_metadata(path: &Path, metadata: &mut PkgDocMetadata) -> Result<(), Error> {
    metadata.normalize_for_persist();

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|source| Error::Write { path: path.to_owned(), source })?;
    }

    write_atomic(path, &serde_json::to_vec_pretty(metadata).expect("serialize metadata")).await
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), Error> {
    let tmp = path.with_extension("tmp");

    fs::write(&tmp, bytes)
        .await
        .map_err(|source| Error::Write { path: tmp.clone(), source })?;

    fs::rename(&tmp, path)
        .await
        .map_err(|source| Error::Rename { path: path.to_owned(), source })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn missing_history_file_yields_empty_history() {
        let dir = tempdir().unwrap();
        let history = load_history(&dir.path().join(".cache.json")).await;
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn history_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".cache.json");
        let history = vec![PkgHistoryItem {
            normalized_name: "foo".to_owned(),
            first_seen_time: Utc::now(),
        }];

        save_history(&path, &history).await.unwrap();
        let loaded = load_history(&path).await;

        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].normalized_name, "foo");
    }

    #[tokio::test]
    async fn metadata_round_trips_with_persist_normalization() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("foo").join("nimpkgdir.json");

        let mut metadata = PkgDocMetadata::waiting(Utc::now());
        metadata.version = String::new();
        save_metadata(&path, &mut metadata).await.unwrap();

        let loaded = load_metadata(&path).await.unwrap();
        assert_eq!(loaded.version, "?");
    }

    #[tokio::test]
    async fn missing_metadata_file_yields_none() {
        let dir = tempdir().unwrap();
        let result = load_metadata(&dir.path().join("nope").join("nimpkgdir.json")).await;
        assert!(result.is_none());
    }
}
