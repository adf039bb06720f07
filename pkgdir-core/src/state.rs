// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Gathers every mutable table the source kept as separate top-level
//! globals into a single `State` record, per the Design Notes decision: a
//! `tokio::sync::Mutex` per logical table (none of the critical sections
//! perform blocking I/O while held), owned behind one `Arc` so the
//! orchestrator, poller, and scanner can all hold a cheap clone.

use std::collections::{HashMap, HashSet, VecDeque};

use tokio::sync::Mutex;

use crate::domain::{BuildHistoryItem, PkgDocMetadata};
use crate::manifest::ManifestStore;
use crate::symbols::SymbolIndex;

/// The admission-decision tables: per-package build metadata plus the two
/// transient name sets. Grouped together because admission must observe all
/// three as a single atomic snapshot.
#[derive(Debug, Default)]
pub struct Tables {
    pub pkgs_doc_files: HashMap<String, PkgDocMetadata>,
    pub waiting: HashSet<String>,
    pub building: HashSet<String>,
}

pub struct State {
    pub tables: Mutex<Tables>,
    pub manifest: Mutex<ManifestStore>,
    pub symbols: Mutex<SymbolIndex>,
    pub build_history: Mutex<VecDeque<BuildHistoryItem>>,
    pub most_queried_packages: Mutex<HashMap<String, u64>>,
}

impl State {
    pub fn new(manifest: ManifestStore) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            manifest: Mutex::new(manifest),
            symbols: Mutex::new(SymbolIndex::new()),
            build_history: Mutex::new(VecDeque::new()),
            most_queried_packages: Mutex::new(HashMap::new()),
        }
    }
}
