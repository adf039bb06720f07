// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Parses the per-file symbol descriptors the documentation tool's
//! `jsondoc` mode emits and maintains the cross-package and per-package
//! symbol indexes. Populated both by [`crate::scanner`] at startup and by
//! [`crate::orchestrator`] after every successful symbol-doc stage.

use std::{
    collections::{HashMap, HashSet},
    path::Path,
};

use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::warn;

use crate::domain::PkgSymbol;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no symbol json found for {0:?}")]
    NotFound(std::path::PathBuf),
    #[error("read {path:?}")]
    Read { path: std::path::PathBuf, #[source] source: std::io::Error },
    #[error("parse {path:?}")]
    Parse { path: std::path::PathBuf, #[source] source: serde_json::Error },
}

#[derive(Debug, Default, Clone)]
pub struct SymbolIndex {
    by_name: HashMap<String, HashSet<PkgSymbol>>,
    by_pkg_and_name: HashMap<(String, String), HashSet<PkgSymbol>>,
}

impl SymbolIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn search_symbol(&self, name: &str) -> Vec<PkgSymbol> {
        self.by_name.get(name).map(|set| set.iter().cloned().collect()).unwrap_or_default()
    }

    pub fn search_symbol_in_pkg(&self, pkg: &str, name: &str) -> Vec<PkgSymbol> {
        self.by_pkg_and_name
            .get(&(pkg.to_owned(), name.to_owned()))
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Inserts `symbol`, de-duplicating by structural equality. Whole values
    /// are published under the caller's lock, so concurrent readers never
    /// observe a torn entry.
    pub fn insert(&mut self, pkg: &str, name: &str, symbol: PkgSymbol) {
        self.by_name.entry(name.to_owned()).or_default().insert(symbol.clone());
        self.by_pkg_and_name
            .entry((pkg.to_owned(), name.to_owned()))
            .or_default()
            .insert(symbol);
    }

    /// Locates the JSON sidecar for `source_file` (next to it, then under
    /// `htmldocs/`), parses it, and inserts every entry into both indexes,
    /// computing `relative_path` by stripping `pkg_root` off the source path.
    pub async fn parse(&mut self, pkg: &str, pkg_root: &Path, source_file: &Path) -> Result<(), Error> {
        let candidates = [
            source_file.with_extension("json"),
            pkg_root
                .join("htmldocs")
                .join(source_file.file_name().unwrap_or_default())
                .with_extension("json"),
        ];

        let Some(path) = find_existing(&candidates).await else {
            return Err(Error::NotFound(source_file.to_owned()));
        };

        let bytes = fs_err::tokio::read(&path)
            .await
            .map_err(|source| Error::Read { path: path.clone(), source })?;
        let value: serde_json::Value =
            serde_json::from_slice(&bytes).map_err(|source| Error::Parse { path: path.clone(), source })?;

        let relative_path = source_file
            .strip_prefix(pkg_root)
            .unwrap_or(source_file)
            .to_string_lossy()
            .into_owned();

        for raw in entries(&value) {
            let Some(symbol) = symbol_from_json(raw, &relative_path) else {
                continue;
            };
            let name = symbol.code.clone();
            self.insert(pkg, &name, symbol);
        }

        Ok(())
    }
}

async fn find_existing(candidates: &[std::path::PathBuf]) -> Option<std::path::PathBuf> {
    for candidate in candidates {
        if fs_err::tokio::try_exists(candidate).await.unwrap_or(false) {
            return Some(candidate.clone());
        }
    }
    None
}

/// Accepts either a top-level array or an object with an `entries` array.
fn entries(value: &serde_json::Value) -> Vec<&serde_json::Value> {
    if let Some(array) = value.as_array() {
        array.iter().collect()
    } else if let Some(entries) = value.get("entries").and_then(|v| v.as_array()) {
        entries.iter().collect()
    } else {
        warn!("symbol json is neither an array nor an object with `entries`");
        Vec::new()
    }
}

fn symbol_from_json(raw: &serde_json::Value, relative_path: &str) -> Option<PkgSymbol> {
    let kind = raw.get("type")?.as_str()?.to_owned();
    let code = raw.get("code")?.as_str()?.to_owned();
    let description = strip_html(raw.get("description").and_then(|v| v.as_str()).unwrap_or_default());
    let line = raw.get("line").and_then(|v| v.as_u64()).unwrap_or_default() as u32;
    let column = raw.get("col").and_then(|v| v.as_u64()).unwrap_or_default() as u32;

    Some(PkgSymbol {
        kind,
        description,
        code,
        relative_path: relative_path.to_owned(),
        line,
        column,
    })
}

fn strip_html(s: &str) -> String {
    static TAG: OnceLock<Regex> = OnceLock::new();
    let re = TAG.get_or_init(|| Regex::new(r"<[^>]*>").expect("valid regex"));
    re.replace_all(s, "").into_owned()
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn strip_html_removes_tags() {
        assert_eq!(strip_html("a <b>bold</b> word"), "a bold word");
    }

    #[tokio::test]
    async fn parse_accepts_plain_array() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("mod.nim");
        fs_err::write(&source, "").unwrap();
        let json = dir.path().join("mod.json");
        fs_err::write(
            &json,
            serde_json::to_vec(&serde_json::json!([
                {"type": "proc", "description": "<p>does a thing</p>", "code": "proc foo()", "line": 1, "col": 0}
            ]))
            .unwrap(),
        )
        .unwrap();

        let mut index = SymbolIndex::new();
        index.parse("foo", dir.path(), &source).await.unwrap();

        let results = index.search_symbol("proc foo()");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].description, "does a thing");
    }

    #[tokio::test]
    async fn parse_accepts_entries_wrapper_and_dedupes() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("mod.nim");
        fs_err::write(&source, "").unwrap();
        let json = dir.path().join("mod.json");
        fs_err::write(
            &json,
            serde_json::to_vec(&serde_json::json!({
                "entries": [
                    {"type": "proc", "description": "d", "code": "proc bar()", "line": 1, "col": 0},
                    {"type": "proc", "description": "d", "code": "proc bar()", "line": 1, "col": 0},
                ]
            }))
            .unwrap(),
        )
        .unwrap();

        let mut index = SymbolIndex::new();
        index.parse("foo", dir.path(), &source).await.unwrap();

        assert_eq!(index.search_symbol("proc bar()").len(), 1);
        assert_eq!(index.search_symbol_in_pkg("foo", "proc bar()").len(), 1);
    }

    #[tokio::test]
    async fn parse_missing_sidecar_returns_not_found() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("mod.nim");
        fs_err::write(&source, "").unwrap();

        let mut index = SymbolIndex::new();
        let result = index.parse("foo", dir.path(), &source).await;

        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
