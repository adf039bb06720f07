// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Pure read operations over the shared [`State`]: package search, symbol
//! search, top-N hot packages, and a build-history snapshot.

use std::collections::{HashMap, HashSet};

use crate::{
    domain::{BuildHistoryItem, PkgSymbol, normalize},
    state::State,
};

pub struct QueryService<'a> {
    state: &'a State,
}

#[derive(Debug, Clone)]
pub struct BuildHistorySnapshot {
    pub history: Vec<BuildHistoryItem>,
    pub waiting: HashSet<String>,
    pub building: HashSet<String>,
}

impl<'a> QueryService<'a> {
    pub fn new(state: &'a State) -> Self {
        Self { state }
    }

    /// Splits `query` on space and comma, lowercases each term, and
    /// accumulates weighted scores over normalized names: exact name +5,
    /// substring name +3, tag match +3, description-word match +1. Returned
    /// sorted by descending score.
    pub async fn search_packages(&self, query: &str) -> Vec<(String, u32)> {
        let manifest = self.state.manifest.lock().await;

        let mut scores: HashMap<String, u32> = HashMap::new();

        for term in query.split([' ', ',']).map(|t| t.trim().to_lowercase()).filter(|t| !t.is_empty()) {
            for entry in manifest.iter() {
                let key = entry.normalized_name();
                let name_lower = entry.name.to_lowercase();

                if name_lower == term {
                    *scores.entry(key.clone()).or_default() += 5;
                } else if name_lower.contains(&term) {
                    *scores.entry(key.clone()).or_default() += 3;
                }
            }

            for name in manifest.packages_by_tag(&term) {
                *scores.entry(name.clone()).or_default() += 3;
            }

            for name in manifest.packages_by_description_word(&term) {
                *scores.entry(name.clone()).or_default() += 1;
            }
        }

        let mut results: Vec<_> = scores.into_iter().collect();
        results.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        results
    }

    /// Increments and reads the view counter for `name`; call sites in the
    /// (out-of-scope) `/pkg/<name>` handler drive this on every package view.
    pub async fn record_view(&self, raw_name: &str) {
        let name = normalize(raw_name);
        let mut counters = self.state.most_queried_packages.lock().await;
        *counters.entry(name).or_default() += 1;
    }

    pub async fn top_queried(&self, n: usize) -> Vec<(String, u64)> {
        let counters = self.state.most_queried_packages.lock().await;
        let mut entries: Vec<_> = counters.iter().map(|(k, v)| (k.clone(), *v)).collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        entries.truncate(n);
        entries
    }

    pub async fn build_history_snapshot(&self) -> BuildHistorySnapshot {
        let history = self.state.build_history.lock().await.iter().cloned().collect();
        let tables = self.state.tables.lock().await;

        BuildHistorySnapshot {
            history,
            waiting: tables.waiting.clone(),
            building: tables.building.clone(),
        }
    }

    pub async fn search_symbol(&self, name: &str) -> Vec<PkgSymbol> {
        self.state.symbols.lock().await.search_symbol(name)
    }

    pub async fn search_symbol_in_pkg(&self, pkg: &str, name: &str) -> Vec<PkgSymbol> {
        self.state.symbols.lock().await.search_symbol_in_pkg(&normalize(pkg), name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestStore;

    async fn state_with_packages() -> State {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("packages.json");
        let raw = serde_json::json!([
            {"name": "Foo", "url": "https://x/foo", "tags": ["net"], "description": "a networking demo"},
            {"name": "Foobar", "url": "https://x/foobar", "tags": [], "description": "unrelated"},
        ]);
        fs_err::write(&path, serde_json::to_vec(&raw).unwrap()).unwrap();

        let mut manifest = ManifestStore::new(&path, None);
        manifest.load().await.unwrap();

        let state = State::new(manifest);
        // keep tempdir alive for the duration of the test by leaking it; the
        // manifest has already been read into memory at this point.
        std::mem::forget(dir);
        state
    }

    #[tokio::test]
    async fn exact_name_match_outranks_substring_match() {
        let state = state_with_packages().await;
        let results = QueryService::new(&state).search_packages("foo").await;

        assert_eq!(results[0].0, "foo");
        assert!(results.iter().any(|(name, _)| name == "foobar"));
        assert!(results[0].1 > results.iter().find(|(n, _)| n == "foobar").unwrap().1);
    }

    #[tokio::test]
    async fn tag_and_description_word_matches_score() {
        let state = state_with_packages().await;
        let results = QueryService::new(&state).search_packages("networking").await;

        assert_eq!(results, vec![("foo".to_owned(), 1)]);
    }

    #[tokio::test]
    async fn top_queried_orders_by_view_count() {
        let state = state_with_packages().await;
        let query = QueryService::new(&state);

        query.record_view("foo").await;
        query.record_view("foo").await;
        query.record_view("foobar").await;

        let top = query.top_queried(2).await;
        assert_eq!(top[0], ("foo".to_owned(), 2));
        assert_eq!(top[1], ("foobar".to_owned(), 1));
    }
}
