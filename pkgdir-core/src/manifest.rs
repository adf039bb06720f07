// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Loads the upstream package manifest, normalizes names, and builds the tag
//! and description-word indexes. A successful [`ManifestStore::load`]
//! publishes a consistent snapshot: manifest, tag index and description-word
//! index all refer to the same set of package names.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use thiserror::Error;
use tracing::warn;
use url::Url;

use crate::domain::{PkgManifestEntry, normalize};

#[derive(Debug, Error)]
pub enum Error {
    #[error("read local manifest {path:?}")]
    Read { path: PathBuf, #[source] source: std::io::Error },
    #[error("write local manifest {path:?}")]
    Write { path: PathBuf, #[source] source: std::io::Error },
    #[error("parse manifest")]
    Parse(#[from] serde_json::Error),
    #[error("fetch upstream manifest")]
    Fetch(#[from] reqwest::Error),
    #[error("package {0:?} already exists under a different name")]
    NameCollision(String),
}

/// Shared client for connection reuse, built once, matching
/// `moss::request`'s `OnceLock<reqwest::Client>` pattern.
static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

fn client() -> &'static reqwest::Client {
    CLIENT.get_or_init(|| {
        reqwest::ClientBuilder::new()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("build reqwest client")
    })
}

#[derive(Debug, Default, Clone)]
pub struct ManifestStore {
    local_path: PathBuf,
    upstream_url: Option<Url>,
    entries: HashMap<String, PkgManifestEntry>,
    packages_by_tag: HashMap<String, Vec<String>>,
    packages_by_description_word: HashMap<String, Vec<String>>,
}

impl ManifestStore {
    pub fn new(local_path: impl Into<PathBuf>, upstream_url: Option<Url>) -> Self {
        Self {
            local_path: local_path.into(),
            upstream_url,
            entries: HashMap::new(),
            packages_by_tag: HashMap::new(),
            packages_by_description_word: HashMap::new(),
        }
    }

    /// Reads the local manifest file, fetching it from upstream first if it
    /// doesn't exist yet. Rebuilds the tag and description-word indexes from
    /// scratch so the three views never disagree.
    pub async fn load(&mut self) -> Result<(), Error> {
        if !fs_err::tokio::try_exists(&self.local_path).await.unwrap_or(false)
            && let Some(url) = self.upstream_url.clone()
        {
            let bytes = client().get(url).send().await?.error_for_status()?.bytes().await?;
            fs_err::tokio::write(&self.local_path, &bytes)
                .await
                .map_err(|source| Error::Write { path: self.local_path.clone(), source })?;
        }

        let bytes = fs_err::tokio::read(&self.local_path)
            .await
            .map_err(|source| Error::Read { path: self.local_path.clone(), source })?;

        let raw: Vec<serde_json::Value> = serde_json::from_slice(&bytes)?;

        let mut entries = HashMap::new();
        for value in raw {
            let Some(entry) = parse_entry(value) else { continue };
            let key = entry.normalized_name();

            if entries.contains_key(&key) {
                warn!(name = %entry.name, normalized = %key, "duplicate normalized package name, keeping first");
                continue;
            }

            entries.insert(key, entry);
        }

        let (by_tag, by_word) = build_indexes(&entries);

        self.entries = entries;
        self.packages_by_tag = by_tag;
        self.packages_by_description_word = by_word;

        Ok(())
    }

    /// Replaces the local manifest's raw bytes (used by the poller when the
    /// upstream manifest has changed) and reloads.
    pub async fn replace_local_and_reload(&mut self, bytes: &[u8]) -> Result<(), Error> {
        fs_err::tokio::write(&self.local_path, bytes)
            .await
            .map_err(|source| Error::Write { path: self.local_path.clone(), source })?;
        self.load().await
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn get(&self, normalized_name: &str) -> Option<&PkgManifestEntry> {
        self.entries.get(normalized_name)
    }

    pub fn get_mut(&mut self, normalized_name: &str) -> Option<&mut PkgManifestEntry> {
        self.entries.get_mut(normalized_name)
    }

    pub fn contains(&self, normalized_name: &str) -> bool {
        self.entries.contains_key(normalized_name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PkgManifestEntry> {
        self.entries.values()
    }

    pub fn packages_by_tag(&self, tag: &str) -> &[String] {
        self.packages_by_tag.get(tag).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn packages_by_description_word(&self, word: &str) -> &[String] {
        self.packages_by_description_word
            .get(word)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Used by the HTTP update endpoint after external signature
    /// verification. Rejects a new package whose normalized name collides
    /// with an existing one under a different raw name, then writes the full
    /// sorted manifest back and reloads.
    pub async fn update(&mut self, pkg_data: PkgManifestEntry) -> Result<(), Error> {
        self.load().await?;

        let key = pkg_data.normalized_name();
        if let Some(existing) = self.entries.get(&key)
            && existing.name != pkg_data.name
        {
            return Err(Error::NameCollision(pkg_data.name));
        }

        self.entries.insert(key, pkg_data);

        let mut sorted: Vec<_> = self.entries.values().cloned().collect();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));

        let bytes = serde_json::to_vec_pretty(&sorted)?;
        fs_err::tokio::write(&self.local_path, &bytes)
            .await
            .map_err(|source| Error::Write { path: self.local_path.clone(), source })?;

        self.load().await
    }
}

fn parse_entry(value: serde_json::Value) -> Option<PkgManifestEntry> {
    let obj = value.as_object()?;
    if !obj.contains_key("name") || !obj.contains_key("tags") {
        return None;
    }

    match serde_json::from_value::<PkgManifestEntry>(value) {
        Ok(entry) => Some(entry),
        Err(source) => {
            warn!(%source, "skipping manifest entry that failed to parse");
            None
        }
    }
}

fn build_indexes(
    entries: &HashMap<String, PkgManifestEntry>,
) -> (HashMap<String, Vec<String>>, HashMap<String, Vec<String>>) {
    let mut by_tag: HashMap<String, Vec<String>> = HashMap::new();
    let mut by_word: HashMap<String, Vec<String>> = HashMap::new();

    for entry in entries.values() {
        let key = entry.normalized_name();

        for tag in &entry.tags {
            by_tag.entry(tag.clone()).or_default().push(key.clone());
        }

        for word in entry
            .description
            .split([' ', ','])
            .map(|w| w.to_lowercase())
            .filter(|w| w.len() >= 3)
        {
            let bucket = by_word.entry(word).or_default();
            if !bucket.contains(&key) {
                bucket.push(key.clone());
            }
        }
    }

    (by_tag, by_word)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use tempfile::tempdir;

    use super::*;

    fn entry(name: &str, tags: &[&str], description: &str) -> serde_json::Value {
        serde_json::json!({
            "name": name,
            "url": format!("https://example.invalid/{name}"),
            "tags": tags,
            "description": description,
            "license": "MIT",
            "web": "",
        })
    }

    #[tokio::test]
    async fn load_skips_entries_missing_name_or_tags() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("packages.json");
        let raw = serde_json::json!([
            entry("Foo", &["net"], "a demo library"),
            {"tags": ["no-name"]},
            {"name": "no-tags"},
        ]);
        fs_err::write(&path, serde_json::to_vec(&raw).unwrap()).unwrap();

        let mut store = ManifestStore::new(&path, None);
        store.load().await.unwrap();

        assert_eq!(store.len(), 1);
        assert!(store.contains("foo"));
    }

    #[tokio::test]
    async fn normalized_collision_keeps_first() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("packages.json");
        let raw = serde_json::json!([entry("Foo_Bar", &["net"], ""), entry("foobar", &["other"], "")]);
        fs_err::write(&path, serde_json::to_vec(&raw).unwrap()).unwrap();

        let mut store = ManifestStore::new(&path, None);
        store.load().await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("foobar").unwrap().name, "Foo_Bar");
    }

    #[tokio::test]
    async fn tag_index_is_consistent_with_manifest() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("packages.json");
        let raw = serde_json::json!([entry("Foo", &["net", "cli"], "a demo")]);
        fs_err::write(&path, serde_json::to_vec(&raw).unwrap()).unwrap();

        let mut store = ManifestStore::new(&path, None);
        store.load().await.unwrap();

        assert_eq!(store.packages_by_tag("net"), ["foo".to_owned()]);
        assert_eq!(store.packages_by_tag("cli"), ["foo".to_owned()]);
    }

    #[tokio::test]
    async fn description_word_index_only_keeps_words_of_length_three_or_more() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("packages.json");
        let raw = serde_json::json!([entry("Foo", &[], "a demo, of net io")]);
        fs_err::write(&path, serde_json::to_vec(&raw).unwrap()).unwrap();

        let mut store = ManifestStore::new(&path, None);
        store.load().await.unwrap();

        assert_eq!(store.packages_by_description_word("demo"), ["foo".to_owned()]);
        assert!(store.packages_by_description_word("a").is_empty());
        assert!(store.packages_by_description_word("of").is_empty());
    }

    #[tokio::test]
    async fn update_rejects_normalized_collision() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("packages.json");
        let raw = serde_json::json!([entry("Foo-Bar", &["net"], "")]);
        fs_err::write(&path, serde_json::to_vec(&raw).unwrap()).unwrap();

        let mut store = ManifestStore::new(&path, None);
        store.load().await.unwrap();

        let result = store
            .update(PkgManifestEntry {
                name: "foobar".to_owned(),
                url: "https://example.invalid/foobar".to_owned(),
                tags: BTreeSet::new(),
                description: String::new(),
                license: String::new(),
                web: String::new(),
                doc: None,
                github_owner: None,
                github_readme: None,
                github_latest_version: None,
                github_latest_versions_str: None,
                github_last_update_time: None,
                extra: serde_json::Map::new(),
            })
            .await;

        assert!(matches!(result, Err(Error::NameCollision(_))));
        assert_eq!(store.get("foobar").unwrap().name, "Foo-Bar");
    }
}
