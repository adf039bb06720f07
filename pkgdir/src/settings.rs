// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Typed configuration loaded the way `crates/config` loads every other
//! `pkgdir_config::Config` implementor: merged YAML from the vendor/admin/user
//! scopes (or a single `--config-dir` override), selected by the `domain()`
//! string. Every field has a default, since a first run with no config file
//! at all is expected to work.

use std::path::{Path, PathBuf};

use pkgdir_config::Config;
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Upstream JSON manifest URL, polled by [`pkgdir_core::poller::ManifestPoller`].
    pub upstream_manifest_url: Url,
    /// Local mirror of the upstream manifest (`<packages_list_fname>` in the spec).
    pub packages_list_fname: PathBuf,
    /// `<tmp_nimble_root_dir>` — per-package build workspaces live under here.
    pub workspace_root: PathBuf,
    /// `.cache.json` — the first-seen history.
    pub cache_path: PathBuf,
    /// Absolute or `$PATH`-resolved path to the ecosystem's package installer.
    pub installer_bin: String,
    /// Absolute or `$PATH`-resolved path to the documentation tool.
    pub doc_bin: String,
    /// File extension (without the dot) identifying a source file to document.
    pub source_extension: String,
    pub build_timeout_seconds: u64,
    pub doc_timeout_seconds: u64,
    pub build_expiry_minutes: i64,
    pub manifest_poll_seconds: u64,
    /// Shared secret the `/update_package` signature verifier checks against.
    /// `None` rejects every update request.
    pub update_shared_secret: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            upstream_manifest_url: Url::parse("https://nimble.directory/packages.json").expect("valid default url"),
            packages_list_fname: PathBuf::from("packages.json"),
            workspace_root: PathBuf::from("workspace"),
            cache_path: PathBuf::from(".cache.json"),
            installer_bin: "nimble".to_owned(),
            doc_bin: "nim".to_owned(),
            source_extension: "nim".to_owned(),
            build_timeout_seconds: 240,
            doc_timeout_seconds: 10,
            build_expiry_minutes: 240,
            manifest_poll_seconds: 600,
            update_shared_secret: None,
        }
    }
}

impl Config for Settings {
    fn domain() -> String {
        "pkgdir".to_owned()
    }
}

/// Loads `Settings` from `config_dir` if given, else the user config scope
/// (`$XDG_CONFIG_HOME/pkgdir`). Scopes merge several files in priority
/// order; the last one wins, matching `Manager::load`'s vendor-then-admin(
/// -then-user) ordering. No file at all is not an error: `Settings::default()`
/// is a runnable configuration.
pub fn load(config_dir: Option<&Path>) -> Settings {
    let manager = match config_dir {
        Some(dir) => pkgdir_config::Manager::custom(dir),
        None => pkgdir_config::Manager::user("pkgdir").unwrap_or_else(|_| pkgdir_config::Manager::custom(".")),
    };

    manager.load::<Settings>().into_iter().last().unwrap_or_default()
}
