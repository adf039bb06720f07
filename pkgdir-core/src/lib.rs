// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Core build orchestrator and in-memory state machines for a
//! package-directory service: the per-package build lifecycle, the
//! subprocess runner that drives it, the upstream-manifest poller, the
//! derived search indexes, and the on-disk metadata cache that survives a
//! process restart.
//!
//! The HTTP router, templating, upstream-forge adapters, signature
//! verifier, metrics sink, and watchdog ping are out of scope for this
//! crate; they are wired against the traits in [`ports`] by the `pkgdir`
//! binary crate.

pub mod ansi;
pub mod cache;
pub mod domain;
pub mod manifest;
pub mod orchestrator;
pub mod poller;
pub mod ports;
pub mod query;
pub mod scanner;
pub mod state;
pub mod subprocess;
pub mod symbols;

pub use domain::normalize;
pub use orchestrator::{BuildOrchestrator, OrchestratorConfig};
pub use poller::ManifestPoller;
pub use query::QueryService;
pub use state::State;
