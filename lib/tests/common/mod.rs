// Copyright 2024-2025 The swh-scan Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! In-memory archive double and small on-disk tree helpers shared by the
//! scenario tests.

#![allow(dead_code)] // not every test file uses every helper

use std::collections::HashMap;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use swh_scan_lib::client::ArchiveError;
use swh_scan_lib::client::KnownSource;
use swh_scan_lib::client::ProvenanceSource;
use swh_scan_lib::exclude::ExclusionSet;
use swh_scan_lib::progress::NoProgress;
use swh_scan_lib::swhid::CoreId;
use swh_scan_lib::swhid::QualifiedId;
use swh_scan_lib::tree;
use swh_scan_lib::tree::SourceTree;

/// Deterministic archive double recording every batch it receives.
#[derive(Default)]
pub struct MockArchive {
    known_ids: HashSet<CoreId>,
    provenance: HashMap<CoreId, QualifiedId>,
    pub known_calls: Mutex<Vec<Vec<CoreId>>>,
    pub provenance_calls: Mutex<Vec<Vec<CoreId>>>,
}

impl MockArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn holding(ids: impl IntoIterator<Item = CoreId>) -> Self {
        Self {
            known_ids: ids.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn with_provenance(mut self, id: CoreId, qualified: QualifiedId) -> Self {
        self.provenance.insert(id, qualified);
        self
    }

    /// Every identifier that appeared in any `known` batch.
    pub fn queried_ids(&self) -> HashSet<CoreId> {
        self.known_calls
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .copied()
            .collect()
    }

    pub fn known_call_count(&self) -> usize {
        self.known_calls.lock().unwrap().len()
    }
}

#[async_trait]
impl KnownSource for MockArchive {
    async fn known(&self, ids: &[CoreId]) -> Result<HashMap<CoreId, bool>, ArchiveError> {
        self.known_calls.lock().unwrap().push(ids.to_vec());
        Ok(ids
            .iter()
            .map(|id| (*id, self.known_ids.contains(id)))
            .collect())
    }
}

#[async_trait]
impl ProvenanceSource for MockArchive {
    async fn provenance_batch(
        &self,
        ids: &[CoreId],
    ) -> Result<Vec<Option<QualifiedId>>, ArchiveError> {
        self.provenance_calls.lock().unwrap().push(ids.to_vec());
        Ok(ids.iter().map(|id| self.provenance.get(id).cloned()).collect())
    }
}

/// Writes `files` (relative path, contents) under `root`, creating parent
/// directories as needed.
pub fn write_files(root: &Path, files: &[(&str, &str)]) {
    for (path, contents) in files {
        let path = root.join(path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }
}

/// Ingests `root` with no exclusions and no progress reporting.
pub fn ingest_plain(root: &Path) -> SourceTree {
    tree::ingest(root, &ExclusionSet::empty(), &NoProgress).unwrap()
}

/// The identifier of the node at `rel_path` (empty string for the root).
pub fn id_at(tree: &SourceTree, rel_path: &str) -> CoreId {
    tree.iter()
        .find(|&node_id| tree.rel_path(node_id) == rel_path)
        .map(|node_id| tree.node(node_id).id())
        .unwrap_or_else(|| panic!("no node at {rel_path:?}"))
}
