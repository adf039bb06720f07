// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Runs the three-stage build pipeline (install -> html-doc -> symbol-doc)
//! per package, enforces the global one-at-a-time concurrency cap, persists
//! metadata, and maintains the bounded build-history ring buffer.

use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use chrono::Utc;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::{
    cache,
    domain::{BuildHistoryItem, BuildStatus, DocBuildOutItem, PkgDocMetadata, normalize},
    ports::MetricsSink,
    state::State,
    subprocess,
};

const RING_CAPACITY: usize = 100;
const SLOT_RETRY_INTERVAL: Duration = Duration::from_secs(1);
const WAIT_COMPLETION_POLL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum Error {
    #[error("package {0:?} not found in manifest")]
    NotFound(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub build_expiry: Duration,
    pub build_timeout: Duration,
    pub doc_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            build_expiry: Duration::from_secs(240 * 60),
            build_timeout: Duration::from_secs(240),
            doc_timeout: Duration::from_secs(10),
        }
    }
}

pub struct BuildOrchestrator {
    state: Arc<State>,
    config: OrchestratorConfig,
    workspace_root: PathBuf,
    installer_bin: String,
    doc_bin: String,
    source_extension: String,
    metrics: Arc<dyn MetricsSink>,
}

impl BuildOrchestrator {
    pub fn new(
        state: Arc<State>,
        config: OrchestratorConfig,
        workspace_root: impl Into<PathBuf>,
        installer_bin: impl Into<String>,
        doc_bin: impl Into<String>,
        source_extension: impl Into<String>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            state,
            config,
            workspace_root: workspace_root.into(),
            installer_bin: installer_bin.into(),
            doc_bin: doc_bin.into(),
            source_extension: source_extension.into(),
            metrics,
        }
    }

    /// Non-blocking: ensures a build is eventually scheduled for `name` and
    /// returns immediately. `force` bypasses the expiry check but never the
    /// in-flight check (admission rule 1).
    #[instrument(skip(self))]
    pub async fn request(&self, raw_name: &str, force: bool) -> Result<(), Error> {
        let name = normalize(raw_name);

        if !self.state.manifest.lock().await.contains(&name) {
            return Err(Error::NotFound(raw_name.to_owned()));
        }

        let now = Utc::now();
        {
            let mut tables = self.state.tables.lock().await;

            if tables.waiting.contains(&name) || tables.building.contains(&name) {
                return Ok(());
            }

            if !force
                && let Some(existing) = tables.pkgs_doc_files.get(&name)
                && existing.expire_time > now
            {
                return Ok(());
            }

            let metadata = tables
                .pkgs_doc_files
                .entry(name.clone())
                .or_insert_with(|| PkgDocMetadata::waiting(now));
            metadata.build_status = BuildStatus::Waiting;
            metadata.doc_build_status = BuildStatus::Waiting;
            tables.waiting.insert(name.clone());
        }

        let orchestrator = self.clone_handles();
        tokio::spawn(async move { orchestrator.drive(name).await });

        Ok(())
    }

    /// Suspends until `name` leaves `waiting`/`building`, or `timeout`
    /// elapses (defaults to the install timeout so a caller never out-waits
    /// a build).
    pub async fn wait_completion(&self, raw_name: &str, timeout: Duration) -> bool {
        let name = normalize(raw_name);
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            {
                let tables = self.state.tables.lock().await;
                if !tables.waiting.contains(&name) && !tables.building.contains(&name) {
                    return true;
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return false;
            }

            tokio::time::sleep(WAIT_COMPLETION_POLL).await;
        }
    }

    fn clone_handles(&self) -> DrivingHandles {
        DrivingHandles {
            state: self.state.clone(),
            config: self.config,
            workspace_root: self.workspace_root.clone(),
            installer_bin: self.installer_bin.clone(),
            doc_bin: self.doc_bin.clone(),
            source_extension: self.source_extension.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

/// Owned copies of everything a single in-flight build needs, detached from
/// `&self` so the pipeline can run on its own spawned task.
#[derive(Clone)]
struct DrivingHandles {
    state: Arc<State>,
    config: OrchestratorConfig,
    workspace_root: PathBuf,
    installer_bin: String,
    doc_bin: String,
    source_extension: String,
    metrics: Arc<dyn MetricsSink>,
}

impl DrivingHandles {
    async fn drive(&self, name: String) {
        self.acquire_slot(&name).await;

        let workspace = self.workspace_root.join(&name);
        let now = Utc::now();
        {
            let mut tables = self.state.tables.lock().await;
            if let Some(metadata) = tables.pkgs_doc_files.get_mut(&name) {
                metadata.build_status = BuildStatus::Running;
                metadata.doc_build_status = BuildStatus::Running;
                metadata.build_time = now;
                metadata.expire_time = now + self.config.build_expiry;
            }
        }

        let install = self.run_install(&name, &workspace).await;

        let (build_status, doc_build_status) = match install.status {
            BuildStatus::Ok => {
                let doc_result = self.run_doc_stages(&name, &workspace).await;
                (BuildStatus::Ok, doc_result)
            }
            other => (other, BuildStatus::Waiting),
        };

        self.finish(&name, &workspace, build_status, doc_build_status, install.output)
            .await;
    }

    /// Spins on the global one-building-at-a-time cap, moving `name` from
    /// `waiting` to `building` the instant a slot opens.
    async fn acquire_slot(&self, name: &str) {
        loop {
            let mut tables = self.state.tables.lock().await;

            if tables.building.is_empty() {
                tables.waiting.remove(name);
                tables.building.insert(name.to_owned());
                return;
            }

            self.metrics.gauge("pkgdir_waiting", tables.waiting.len() as f64);
            drop(tables);
            tokio::time::sleep(SLOT_RETRY_INTERVAL).await;
        }
    }

    async fn run_install(&self, name: &str, workspace: &Path) -> InstallOutcome {
        let per_pkg_workspace = workspace.display().to_string();
        let args = [
            "install".to_owned(),
            name.to_owned(),
            "--verbose".to_owned(),
            format!("--nimbleDir={per_pkg_workspace}"),
            "-y".to_owned(),
            "--debug".to_owned(),
        ];

        if let Err(source) = tokio::fs::create_dir_all(workspace).await {
            warn!(%name, %source, "failed to create package workspace");
        }

        let outcome = subprocess::run(&self.installer_bin, &args, workspace, self.config.build_timeout).await;

        match outcome {
            Ok(outcome) if outcome.succeeded() => InstallOutcome {
                status: BuildStatus::Ok,
                output: outcome.output,
            },
            Ok(outcome) if outcome.timed_out() => InstallOutcome {
                status: BuildStatus::Timeout,
                output: format!(
                    "** Install test timed out after {} seconds **\n{}",
                    self.config.build_timeout.as_secs(),
                    outcome.output
                ),
            },
            Ok(outcome) => InstallOutcome {
                status: BuildStatus::Failed,
                output: outcome.output,
            },
            Err(source) => InstallOutcome {
                status: BuildStatus::Failed,
                output: format!("failed to launch installer: {source}"),
            },
        }
    }

    /// Runs the html-doc and jsondoc stages over every source file under the
    /// installed package root. Missing package root is reported as a single
    /// failed doc item rather than aborting silently.
    async fn run_doc_stages(&self, name: &str, workspace: &Path) -> BuildStatus {
        let pkg_root = match find_package_root(&workspace.join("pkgs"), name).await {
            Some(root) => root,
            None => {
                let mut tables = self.state.tables.lock().await;
                if let Some(metadata) = tables.pkgs_doc_files.get_mut(name) {
                    metadata.doc_build_output.push(DocBuildOutItem {
                        success: false,
                        filename: String::new(),
                        description: "package root not found".to_owned(),
                        output: format!("no directory under {:?} matched normalized name {name:?}", workspace.join("pkgs")),
                    });
                }
                return BuildStatus::Failed;
            }
        };

        let sources = collect_sources(&pkg_root, &self.source_extension).await;

        let mut all_ok = true;
        let mut fnames = Vec::new();
        let mut doc_items = Vec::new();

        for source in &sources {
            let relative = source.strip_prefix(&pkg_root).unwrap_or(source).to_string_lossy().into_owned();
            let workdir = source.parent().unwrap_or(&pkg_root);

            let args = [
                "doc".to_owned(),
                "--index:on".to_owned(),
                source.display().to_string(),
            ];
            let outcome = subprocess::run(&self.doc_bin, &args, workdir, self.config.doc_timeout).await;

            let success = matches!(&outcome, Ok(o) if o.succeeded());
            all_ok &= success;

            doc_items.push(DocBuildOutItem {
                success,
                filename: relative.clone(),
                description: relative.clone(),
                output: outcome.map(|o| o.output).unwrap_or_default(),
            });

            if success {
                fnames.push(with_html_extension(&relative, &self.source_extension));
            }
        }

        let idx_fnames = collect_idx_files(&pkg_root).await;

        let version = {
            let manifest = self.state.manifest.lock().await;
            manifest
                .get(name)
                .and_then(|entry| entry.github_latest_version.clone())
                .unwrap_or_else(|| "?".to_owned())
        };

        {
            let mut tables = self.state.tables.lock().await;
            if let Some(metadata) = tables.pkgs_doc_files.get_mut(name) {
                metadata.doc_build_output = doc_items;
                metadata.fnames = fnames;
                metadata.idx_fnames = idx_fnames;
                metadata.version = version;
            }
        }

        for source in &sources {
            let args = ["jsondoc".to_owned(), source.display().to_string()];
            let outcome = subprocess::run(&self.doc_bin, &args, source.parent().unwrap_or(&pkg_root), self.config.doc_timeout).await;

            if !matches!(outcome, Ok(o) if o.succeeded()) {
                warn!(%name, ?source, "jsondoc stage failed, skipping symbol parse");
                continue;
            }

            let mut symbols = self.state.symbols.lock().await;
            if let Err(source_err) = symbols.parse(name, &pkg_root, source).await {
                warn!(%name, ?source, %source_err, "failed to parse emitted symbol json");
            }
        }

        if sources.is_empty() || all_ok { BuildStatus::Ok } else { BuildStatus::Failed }
    }

    async fn finish(
        &self,
        name: &str,
        workspace: &Path,
        build_status: BuildStatus,
        doc_build_status: BuildStatus,
        build_output: String,
    ) {
        let mut terminal_metadata = {
            let mut tables = self.state.tables.lock().await;

            if let Some(metadata) = tables.pkgs_doc_files.get_mut(name) {
                metadata.build_status = build_status;
                metadata.doc_build_status = doc_build_status;
                metadata.build_output = build_output;
            }

            tables.pkgs_doc_files.get(name).cloned()
        };

        // Persist and append to history outside the table lock: neither is
        // short enough to hold it across, and no other writer touches this
        // package's metadata while its name is still in `building`.
        if let Some(metadata) = terminal_metadata.as_mut() {
            let metadata_path = workspace.join("nimpkgdir.json");
            if let Err(source) = cache::save_metadata(&metadata_path, metadata).await {
                warn!(%name, %source, "failed to persist package metadata");
            }

            let mut history = self.state.build_history.lock().await;
            push_ring(
                &mut history,
                BuildHistoryItem {
                    normalized_name: name.to_owned(),
                    build_time: metadata.build_time,
                    build_status: metadata.build_status,
                    doc_build_status: metadata.doc_build_status,
                },
            );
        }

        {
            let mut tables = self.state.tables.lock().await;
            tables.building.remove(name);
            tables.waiting.remove(name);
        }

        info!(%name, ?build_status, ?doc_build_status, "build finished");
    }
}

struct InstallOutcome {
    status: BuildStatus,
    output: String,
}

/// Appends `item` to the front of the ring, evicting the oldest entry once
/// capacity is reached. Newest is always at the front.
fn push_ring(history: &mut VecDeque<BuildHistoryItem>, item: BuildHistoryItem) {
    history.push_front(item);
    history.truncate(RING_CAPACITY);
}

/// First directory under `pkgs_dir` whose leading `-`-delimited token,
/// normalized, matches `name`. Brittle by design (see Design Notes); a
/// lock-file based lookup can replace it later without touching callers.
async fn find_package_root(pkgs_dir: &Path, name: &str) -> Option<PathBuf> {
    let mut read_dir = tokio::fs::read_dir(pkgs_dir).await.ok()?;

    while let Ok(Some(entry)) = read_dir.next_entry().await {
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        let leading = file_name.split('-').next().unwrap_or_default();

        if normalize(leading) == name {
            return Some(entry.path());
        }
    }

    None
}

async fn collect_sources(root: &Path, extension: &str) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_owned()];

    while let Some(dir) = stack.pop() {
        let Ok(mut read_dir) = tokio::fs::read_dir(&dir).await else { continue };

        while let Ok(Some(entry)) = read_dir.next_entry().await {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().and_then(|e| e.to_str()) == Some(extension) {
                out.push(path);
            }
        }
    }

    out.sort();
    out
}

/// Walks `root` exactly once to collect `.idx` files, per the Design Notes
/// fix for the source's per-file re-walk.
async fn collect_idx_files(root: &Path) -> Vec<String> {
    let Ok(mut read_dir) = tokio::fs::read_dir(root).await else {
        return Vec::new();
    };

    let mut out = Vec::new();
    while let Ok(Some(entry)) = read_dir.next_entry().await {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("idx")
            && let Some(name) = path.file_name()
        {
            out.push(name.to_string_lossy().into_owned());
        }
    }
    out.sort();
    out
}

fn with_html_extension(relative: &str, source_extension: &str) -> String {
    if let Some(stripped) = relative.strip_suffix(&format!(".{source_extension}")) {
        format!("{stripped}.html")
    } else {
        format!("{relative}.html")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_buffer_evicts_oldest_and_keeps_newest_at_front() {
        let mut history = VecDeque::new();
        for i in 0..(RING_CAPACITY + 5) {
            push_ring(
                &mut history,
                BuildHistoryItem {
                    normalized_name: format!("pkg{i}"),
                    build_time: Utc::now(),
                    build_status: BuildStatus::Ok,
                    doc_build_status: BuildStatus::Ok,
                },
            );
        }

        assert_eq!(history.len(), RING_CAPACITY);
        assert_eq!(history.front().unwrap().normalized_name, format!("pkg{}", RING_CAPACITY + 4));
    }

    #[test]
    fn with_html_extension_replaces_source_suffix() {
        assert_eq!(with_html_extension("foo/bar.nim", "nim"), "foo/bar.html");
        assert_eq!(with_html_extension("foo/bar", "nim"), "foo/bar.html");
    }

    #[tokio::test]
    async fn find_package_root_matches_leading_dash_token() {
        let dir = tempfile::tempdir().unwrap();
        let pkgs = dir.path().join("pkgs");
        tokio::fs::create_dir_all(pkgs.join("foo-1.2.3")).await.unwrap();

        let found = find_package_root(&pkgs, "foo").await;
        assert_eq!(found, Some(pkgs.join("foo-1.2.3")));
    }

    #[tokio::test]
    async fn find_package_root_returns_none_on_miss() {
        let dir = tempfile::tempdir().unwrap();
        let pkgs = dir.path().join("pkgs");
        tokio::fs::create_dir_all(pkgs.join("other-1.0.0")).await.unwrap();

        assert!(find_package_root(&pkgs, "foo").await.is_none());
    }

    /// Writes an executable shell script to `path`, matching the way these
    /// tests stand in for the real installer/documentation-tool binaries
    /// named in `Settings`.
    fn write_script(path: &Path, body: &str) {
        std::fs::write(path, body).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
    }

    async fn harness(dir: &Path) -> (Arc<State>, OrchestratorConfig, PathBuf, String, String) {
        let manifest_path = dir.join("packages.json");
        fs_err::write(
            &manifest_path,
            serde_json::to_vec(&serde_json::json!([
                {"name": "Foo", "url": "https://example.invalid/foo", "tags": ["net"], "description": "a demo"}
            ]))
            .unwrap(),
        )
        .unwrap();

        let mut manifest = crate::manifest::ManifestStore::new(&manifest_path, None);
        manifest.load().await.unwrap();
        let state = Arc::new(State::new(manifest));

        let installer = dir.join("fake_installer.sh");
        write_script(
            &installer,
            "#!/bin/sh\nfor a in \"$@\"; do\n  case \"$a\" in\n    --nimbleDir=*) dir=\"${a#--nimbleDir=}\" ;;\n  esac\ndone\nmkdir -p \"$dir/pkgs/foo-1.0.0\"\nprintf 'discard\\n' > \"$dir/pkgs/foo-1.0.0/foo.nim\"\nexit 0\n",
        );

        let doc = dir.join("fake_doc.sh");
        write_script(
            &doc,
            "#!/bin/sh\ncase \"$1\" in\n  doc) exit 0 ;;\n  jsondoc)\n    src=\"$2\"\n    json=\"${src%.nim}.json\"\n    printf '[{\"type\":\"proc\",\"description\":\"d\",\"code\":\"proc foo()\",\"line\":1,\"col\":0}]' > \"$json\"\n    exit 0\n    ;;\nesac\n",
        );

        let config = OrchestratorConfig {
            build_expiry: Duration::from_secs(3600),
            build_timeout: Duration::from_secs(5),
            doc_timeout: Duration::from_secs(5),
        };

        (
            state,
            config,
            dir.join("workspace"),
            installer.to_string_lossy().into_owned(),
            doc.to_string_lossy().into_owned(),
        )
    }

    #[tokio::test]
    async fn cold_install_all_green_reaches_ok_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let (state, config, workspace, installer, doc) = harness(dir.path()).await;

        let orchestrator = BuildOrchestrator::new(state.clone(), config, workspace.clone(), installer, doc, "nim", Arc::new(crate::ports::NullMetricsSink));

        orchestrator.request("foo", false).await.unwrap();
        let completed = orchestrator.wait_completion("foo", Duration::from_secs(10)).await;
        assert!(completed);

        let tables = state.tables.lock().await;
        let metadata = tables.pkgs_doc_files.get("foo").unwrap();
        assert_eq!(metadata.build_status, BuildStatus::Ok);
        assert_eq!(metadata.doc_build_status, BuildStatus::Ok);
        assert_eq!(metadata.fnames, vec!["foo.html".to_owned()]);
        drop(tables);

        assert!(workspace.join("foo").join("nimpkgdir.json").exists());

        let history = state.build_history.lock().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history.front().unwrap().normalized_name, "foo");
        assert_eq!(history.front().unwrap().build_status, BuildStatus::Ok);
        drop(history);

        let symbols = state.symbols.lock().await;
        assert_eq!(symbols.search_symbol("proc foo()").len(), 1);
    }

    #[tokio::test]
    async fn concurrent_double_request_runs_the_pipeline_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let (state, config, workspace, installer, doc) = harness(dir.path()).await;

        let orchestrator = BuildOrchestrator::new(state.clone(), config, workspace.clone(), installer, doc, "nim", Arc::new(crate::ports::NullMetricsSink));

        orchestrator.request("foo", false).await.unwrap();
        orchestrator.request("foo", false).await.unwrap();

        let completed = orchestrator.wait_completion("foo", Duration::from_secs(10)).await;
        assert!(completed);

        let history = state.build_history.lock().await;
        assert_eq!(history.len(), 1, "second concurrent request must be a no-op per admission rule 1");
    }

    #[tokio::test]
    async fn request_for_unknown_package_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (state, config, workspace, installer, doc) = harness(dir.path()).await;

        let orchestrator = BuildOrchestrator::new(state, config, workspace.clone(), installer, doc, "nim", Arc::new(crate::ports::NullMetricsSink));

        let result = orchestrator.request("doesnotexist", false).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn force_rebuild_before_expiry_runs_a_second_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let (state, config, workspace, installer, doc) = harness(dir.path()).await;

        let orchestrator = BuildOrchestrator::new(state.clone(), config, workspace.clone(), installer, doc, "nim", Arc::new(crate::ports::NullMetricsSink));

        orchestrator.request("foo", false).await.unwrap();
        assert!(orchestrator.wait_completion("foo", Duration::from_secs(10)).await);

        let first_build_time = state.tables.lock().await.pkgs_doc_files.get("foo").unwrap().build_time;

        // Plain re-request is a no-op: `expire_time` is still in the future.
        orchestrator.request("foo", false).await.unwrap();
        assert!(orchestrator.wait_completion("foo", Duration::from_secs(10)).await);
        assert_eq!(state.build_history.lock().await.len(), 1);

        orchestrator.request("foo", true).await.unwrap();
        assert!(orchestrator.wait_completion("foo", Duration::from_secs(10)).await);

        let second_build_time = state.tables.lock().await.pkgs_doc_files.get("foo").unwrap().build_time;
        assert!(second_build_time >= first_build_time);
        assert_eq!(state.build_history.lock().await.len(), 2, "force=true must run a second pipeline");
    }
}
