// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Runs once at startup: walks `<workspace>/*/nimpkgdir.json`, rehydrating
//! [`crate::domain::PkgDocMetadata`] and (best-effort) the symbol index from
//! each package's cached doc output.

use std::path::Path;

use tracing::warn;

use crate::{cache, domain::normalize, state::State};

pub async fn scan(state: &State, workspace_root: &Path, pkg_root_subdir: &str) {
    let Ok(mut read_dir) = tokio::fs::read_dir(workspace_root).await else {
        warn!(?workspace_root, "workspace root does not exist yet, nothing to scan");
        return;
    };

    while let Ok(Some(entry)) = read_dir.next_entry().await {
        let pkg_dir = entry.path();
        if !pkg_dir.is_dir() {
            continue;
        }

        let Some(raw_name) = pkg_dir.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        let name = normalize(&raw_name);

        let metadata_path = pkg_dir.join("nimpkgdir.json");
        let Some(metadata) = cache::load_metadata(&metadata_path).await else {
            continue;
        };

        {
            let mut tables = state.tables.lock().await;
            tables.pkgs_doc_files.insert(name.clone(), metadata);
        }

        let pkgs_dir = pkg_dir.join(pkg_root_subdir);
        if let Some(pkg_root) = first_subdir(&pkgs_dir).await {
            replay_symbols(state, &name, &pkg_root).await;
        }
    }
}

async fn first_subdir(dir: &Path) -> Option<std::path::PathBuf> {
    let mut read_dir = tokio::fs::read_dir(dir).await.ok()?;
    while let Ok(Some(entry)) = read_dir.next_entry().await {
        if entry.path().is_dir() {
            return Some(entry.path());
        }
    }
    None
}

async fn replay_symbols(state: &State, name: &str, pkg_root: &Path) {
    let mut stack = vec![pkg_root.to_owned()];

    while let Some(dir) = stack.pop() {
        let Ok(mut read_dir) = tokio::fs::read_dir(&dir).await else { continue };

        while let Ok(Some(entry)) = read_dir.next_entry().await {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }

            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            // The sidecar json is keyed by source stem; reconstruct a plausible
            // source path so `SymbolIndex::parse` can locate it the same way
            // it does after a live build.
            let source_guess = path.with_extension("");
            let mut symbols = state.symbols.lock().await;
            if let Err(source) = symbols.parse(name, pkg_root, &source_guess).await {
                warn!(%name, ?path, %source, "failed to replay cached symbol json");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::manifest::ManifestStore;

    #[tokio::test]
    async fn scan_rehydrates_metadata_and_replays_symbols() {
        let dir = tempfile::tempdir().unwrap();
        let workspace_root = dir.path();

        let pkg_dir = workspace_root.join("foo");
        let pkgs_dir = pkg_dir.join("pkgs").join("foo-1.0.0");
        tokio::fs::create_dir_all(&pkgs_dir).await.unwrap();

        let mut metadata = crate::domain::PkgDocMetadata::waiting(Utc::now());
        metadata.fnames = vec!["foo.html".to_owned()];
        cache::save_metadata(&pkg_dir.join("nimpkgdir.json"), &mut metadata).await.unwrap();

        tokio::fs::write(
            pkgs_dir.join("foo.json"),
            r#"[{"type":"proc","description":"d","code":"proc foo()","line":1,"col":0}]"#,
        )
        .await
        .unwrap();

        let state = State::new(ManifestStore::new(workspace_root.join("packages.json"), None));
        scan(&state, workspace_root, "pkgs").await;

        let tables = state.tables.lock().await;
        assert!(tables.pkgs_doc_files.contains_key("foo"));
        drop(tables);

        let symbols = state.symbols.lock().await;
        assert_eq!(symbols.search_symbol("proc foo()").len(), 1);
    }
}
