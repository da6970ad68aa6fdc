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

//! Scan results in renderer-friendly form.
//!
//! Once discovery (and optionally provenance resolution) has run, the tree
//! and store flatten into per-node records keyed by root-relative paths,
//! plus an aggregate summary. External renderers consume these; nothing in
//! here talks to the network.

use std::collections::HashSet;

use serde::Serialize;

use crate::store::NodeInfoStore;
use crate::tree::NodeId;
use crate::tree::SourceTree;

/// Provenance attached to a node, flattened for output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProvenanceRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

/// One node of the scanned tree, as presented to renderers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NodeRecord {
    /// Path relative to the scan root, forward-slash separated; `""` for
    /// the root itself.
    pub path: String,
    pub swhid: String,
    pub directory: bool,
    pub known: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance: Option<ProvenanceRecord>,
}

/// Flattens the labeled tree into records, in pre-order.
pub fn node_records(tree: &SourceTree, store: &NodeInfoStore) -> Vec<NodeRecord> {
    tree.iter()
        .map(|node_id| {
            let node = tree.node(node_id);
            let info = store.get(node.id()).unwrap_or_default();
            let provenance = info.provenance.map(|qualified| ProvenanceRecord {
                anchor: qualified.anchor().map(ToString::to_string),
                origin: qualified.origin().map(ToString::to_string),
            });
            NodeRecord {
                path: tree.rel_path(node_id),
                swhid: node.id().to_string(),
                directory: node.is_directory(),
                known: info.known.unwrap_or(false),
                provenance,
            }
        })
        .collect()
}

/// Aggregate view of a finished scan.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub total_contents: u64,
    pub known_contents: u64,
    pub total_directories: u64,
    /// Directories whose own identifier is archived.
    pub full_known_directories: u64,
    /// Directories that are not fully known but contain (transitively) at
    /// least one known file.
    pub partially_known_directories: u64,
}

impl ScanSummary {
    pub fn known_contents_percent(&self) -> u64 {
        percent(self.known_contents, self.total_contents)
    }

    pub fn full_known_directories_percent(&self) -> u64 {
        percent(self.full_known_directories, self.total_directories)
    }

    pub fn partially_known_directories_percent(&self) -> u64 {
        percent(self.partially_known_directories, self.total_directories)
    }
}

fn percent(part: u64, whole: u64) -> u64 {
    if whole == 0 { 0 } else { part * 100 / whole }
}

/// Computes the summary rollup over the labeled tree. All counts are per
/// path: a subtree appearing twice counts twice, matching the rendered
/// listing.
pub fn summarize(tree: &SourceTree, store: &NodeInfoStore) -> ScanSummary {
    let mut summary = ScanSummary::default();
    for node_id in tree.iter() {
        let node = tree.node(node_id);
        let known = store.known(node.id()) == Some(true);
        if node.is_directory() {
            summary.total_directories += 1;
            if known {
                summary.full_known_directories += 1;
            }
        } else {
            summary.total_contents += 1;
            if known {
                summary.known_contents += 1;
            }
        }
    }
    let mut partial = HashSet::new();
    collect_partially_known(tree, store, tree.root(), &mut partial);
    summary.partially_known_directories = partial.len() as u64;
    summary
}

/// Post-order rollup: a directory is partially known if it is not fully
/// known itself and either holds a known file directly or has a partially
/// known child directory.
fn collect_partially_known(
    tree: &SourceTree,
    store: &NodeInfoStore,
    dir: NodeId,
    partial: &mut HashSet<NodeId>,
) -> bool {
    if store.known(tree.node(dir).id()) == Some(true) {
        return false;
    }
    let mut partially_known = tree.node(dir).entries().iter().any(|&child| {
        let child_node = tree.node(child);
        !child_node.is_directory() && store.known(child_node.id()) == Some(true)
    });
    for &child in tree.node(dir).entries() {
        if tree.node(child).is_directory()
            && collect_partially_known(tree, store, child, partial)
        {
            partially_known = true;
        }
    }
    if partially_known {
        partial.insert(dir);
    }
    partially_known
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::exclude::ExclusionSet;
    use crate::progress::NoProgress;
    use crate::tree;

    fn labeled_fixture(known: impl Fn(&str) -> bool) -> (SourceTree, NodeInfoStore) {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("pkg/inner")).unwrap();
        fs::write(dir.path().join("pkg/inner/lib.c"), "lib").unwrap();
        fs::write(dir.path().join("pkg/readme"), "doc").unwrap();
        fs::write(dir.path().join("loose.txt"), "loose").unwrap();
        let tree = tree::ingest(dir.path(), &ExclusionSet::empty(), &NoProgress).unwrap();
        let store = NodeInfoStore::from_tree(&tree);
        for node_id in tree.iter() {
            let rel = tree.rel_path(node_id);
            store.mark_known(tree.node(node_id).id(), known(&rel));
        }
        (tree, store)
    }

    #[test]
    fn test_node_records_cover_the_tree_in_order() {
        let (tree, store) = labeled_fixture(|_| false);
        let records = node_records(&tree, &store);
        let paths: Vec<&str> = records.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(
            paths,
            ["", "loose.txt", "pkg", "pkg/inner", "pkg/inner/lib.c", "pkg/readme"]
        );
        assert!(records.iter().all(|r| r.swhid.starts_with("swh:1:")));
        assert!(records.iter().all(|r| !r.known));
    }

    #[test]
    fn test_summary_counts() {
        // pkg/inner is fully known; pkg holds a known file of its own.
        let (tree, store) =
            labeled_fixture(|rel| rel.starts_with("pkg/inner") || rel == "pkg/readme");
        let summary = summarize(&tree, &store);
        assert_eq!(summary.total_contents, 3);
        assert_eq!(summary.known_contents, 2);
        assert_eq!(summary.total_directories, 3);
        assert_eq!(summary.full_known_directories, 1);
        // pkg is partial (direct known file); the root is partial through
        // pkg; fully-known pkg/inner is not.
        assert_eq!(summary.partially_known_directories, 2);
        assert_eq!(summary.known_contents_percent(), 66);
    }

    #[test]
    fn test_summary_empty_tree_has_no_percentages() {
        let dir = tempfile::tempdir().unwrap();
        let tree = tree::ingest(dir.path(), &ExclusionSet::empty(), &NoProgress).unwrap();
        let store = NodeInfoStore::from_tree(&tree);
        store.mark_known(tree.node(tree.root()).id(), false);
        let summary = summarize(&tree, &store);
        assert_eq!(summary.total_contents, 0);
        assert_eq!(summary.known_contents_percent(), 0);
        assert_eq!(summary.partially_known_directories, 0);
    }
}
