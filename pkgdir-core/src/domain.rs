// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Core data model: manifest entries, per-package build metadata, history
//! items and the derived symbol type. Every map key derived from a package
//! name in this crate passes through [`normalize`] first.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lowercase and strip underscores and dashes. The sole normalizer for
/// package names; every index in this crate is keyed on its output, never on
/// the raw name. Stripping dashes as well as underscores is what makes
/// `Foo-Bar` and `foobar` collide, per the collision rule `update()` enforces.
pub fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildStatus {
    Waiting,
    Running,
    #[serde(rename = "ok")]
    Ok,
    Failed,
    Timeout,
}

impl BuildStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, BuildStatus::Ok | BuildStatus::Failed | BuildStatus::Timeout)
    }
}

/// One record per package known to the upstream manifest, copied verbatim
/// plus the enrichments the forge adapter lazily fills in. Unknown upstream
/// fields are preserved in `extra` so `update()` round-trips them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PkgManifestEntry {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub license: String,
    #[serde(default)]
    pub web: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_readme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_latest_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_latest_versions_str: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_last_update_time: Option<i64>,
    /// Upstream fields this struct doesn't model explicitly; preserved so a
    /// round-tripped `update()` never silently drops data.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PkgManifestEntry {
    pub fn normalized_name(&self) -> String {
        normalize(&self.name)
    }
}

/// One record per package that has ever entered the build pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PkgDocMetadata {
    pub build_status: BuildStatus,
    pub doc_build_status: BuildStatus,
    #[serde(default)]
    pub build_output: String,
    #[serde(default)]
    pub doc_build_output: Vec<DocBuildOutItem>,
    #[serde(default)]
    pub fnames: Vec<String>,
    #[serde(default)]
    pub idx_fnames: Vec<String>,
    pub build_time: DateTime<Utc>,
    pub expire_time: DateTime<Utc>,
    #[serde(default = "unknown_version")]
    pub version: String,
    /// Reserved for a future commit-based invalidation scheme. Always `None`
    /// on write; never consulted by any decision path.
    #[serde(default)]
    pub last_commitish: Option<String>,
}

fn unknown_version() -> String {
    "?".to_owned()
}

impl PkgDocMetadata {
    pub fn waiting(now: DateTime<Utc>) -> Self {
        Self {
            build_status: BuildStatus::Waiting,
            doc_build_status: BuildStatus::Waiting,
            build_output: String::new(),
            doc_build_output: Vec::new(),
            fnames: Vec::new(),
            idx_fnames: Vec::new(),
            build_time: now,
            expire_time: now,
            version: unknown_version(),
            last_commitish: None,
        }
    }

    /// Normalize in place the way [`crate::cache::PersistentCache`] does
    /// before every write: empty version becomes `"?"`, null bytes are
    /// stripped, and non-printable bytes in the build transcript are escaped.
    pub fn normalize_for_persist(&mut self) {
        self.version = self.version.replace('\0', "");
        if self.version.is_empty() {
            self.version = unknown_version();
        }
        self.build_output = escape_non_printable(&self.build_output);
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self.build_status, BuildStatus::Waiting | BuildStatus::Running)
    }
}

/// Escapes control characters (other than `\n`/`\t`) so a persisted build
/// transcript never embeds raw terminal escape sequences in a JSON string.
pub fn escape_non_printable(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c == '\n' || c == '\t' || !c.is_control() {
                c.to_string()
            } else {
                format!("\\x{:02x}", c as u32)
            }
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocBuildOutItem {
    pub success: bool,
    pub filename: String,
    pub description: String,
    pub output: String,
}

/// Append-only record of when a package name first appeared upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PkgHistoryItem {
    pub normalized_name: String,
    pub first_seen_time: DateTime<Utc>,
}

/// One completed build attempt, held in the fixed-capacity ring buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildHistoryItem {
    pub normalized_name: String,
    pub build_time: DateTime<Utc>,
    pub build_status: BuildStatus,
    pub doc_build_status: BuildStatus,
}

/// A named, documented declaration extracted from a source file by the
/// documentation tool's `jsondoc` mode. Equality is structural so indexes can
/// de-duplicate on insert.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PkgSymbol {
    pub kind: String,
    pub description: String,
    pub code: String,
    pub relative_path: String,
    pub line: u32,
    pub column: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_lowercases_and_strips_underscores_and_dashes() {
        assert_eq!(normalize("Foo_Bar"), "foobar");
        assert_eq!(normalize("NIM_Lang"), "nimlang");
        assert_eq!(normalize("Foo-Bar"), "foobar");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize("My_Package");
        assert_eq!(normalize(&once), once);
    }

    #[test]
    fn persist_normalization_fixes_empty_version_and_nulls() {
        let mut meta = PkgDocMetadata::waiting(Utc::now());
        meta.version = "1.0\0".to_owned();
        meta.normalize_for_persist();
        assert_eq!(meta.version, "1.0");

        let mut meta = PkgDocMetadata::waiting(Utc::now());
        meta.version = String::new();
        meta.normalize_for_persist();
        assert_eq!(meta.version, "?");
    }

    #[test]
    fn escape_non_printable_keeps_newlines_and_escapes_escape_bytes() {
        let raw = "line one\n\x1b[31mred\x1b[0m\n";
        let escaped = escape_non_printable(raw);
        assert!(escaped.contains('\n'));
        assert!(escaped.contains("\\x1b"));
        assert!(!escaped.contains('\u{1b}'));
    }
}
