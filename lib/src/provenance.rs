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

//! Best-effort provenance attachment by boundary walking.
//!
//! Starting from the shallowest known (or still undecided) subtree roots,
//! the resolver asks the archive where each boundary object came from. An
//! answered directory stamps its whole subtree with the same provenance;
//! an unanswered directory is replaced in the next boundary by its direct
//! children. Every node is visited at most once, so the walk is bounded by
//! the tree size.

use std::collections::HashMap;
use std::collections::HashSet;

use itertools::Itertools as _;

use crate::client::ArchiveError;
use crate::client::ProvenanceSource;
use crate::progress::ProgressSink;
use crate::progress::Step;
use crate::store::NodeInfoStore;
use crate::swhid::CoreId;
use crate::tree::NodeId;
use crate::tree::SourceTree;

/// Attaches provenance to as many known nodes of `tree` as the archive
/// can anchor.
///
/// Assumes the `known` labels are already populated. Nodes under an
/// unknown directory are reached by descending through it; nodes under a
/// known directory inherit the answer given for the shallowest known
/// ancestor that got one.
pub async fn resolve_provenance(
    tree: &SourceTree,
    store: &NodeInfoStore,
    source: &dyn ProvenanceSource,
    progress: &dyn ProgressSink,
) -> Result<(), ArchiveError> {
    let mut seen: HashSet<NodeId> = HashSet::new();
    let mut boundary: HashMap<CoreId, Vec<NodeId>> = HashMap::new();

    // Initial boundary: the shallowest nodes whose object is known (or
    // never got a label). Known ancestors shadow their descendants.
    let mut walk_queue = vec![tree.root()];
    while let Some(node_id) = walk_queue.pop() {
        if !seen.insert(node_id) {
            continue;
        }
        let node = tree.node(node_id);
        match store.known(node.id()) {
            Some(true) | None => {
                boundary.entry(node.id()).or_default().push(node_id);
            }
            Some(false) => {
                // The object itself is absent from the archive, but known
                // subtrees may hide below it.
                walk_queue.extend(node.entries());
            }
        }
    }

    let mut queried: u64 = 0;
    let mut planned: u64 = boundary.len() as u64;
    progress.update(Step::Provenance, queried, Some(planned));

    while !boundary.is_empty() {
        let ids: Vec<CoreId> = boundary.keys().copied().collect();
        let answers = source.provenance_batch(&ids).await?;
        let mut next_boundary: HashMap<CoreId, Vec<NodeId>> = HashMap::new();
        // The client pads or truncates replies to the request length.
        for (id, answer) in ids.into_iter().zip_eq(answers) {
            let occurrences = boundary.remove(&id).unwrap_or_default();
            queried += 1;
            match answer {
                Some(qualified) => {
                    store.set_provenance(id, qualified.clone());
                    for &occurrence in &occurrences {
                        if !tree.node(occurrence).is_directory() {
                            continue;
                        }
                        for descendant in tree.descendants(occurrence) {
                            if descendant != occurrence && !seen.insert(descendant) {
                                continue;
                            }
                            store.set_provenance(tree.node(descendant).id(), qualified.clone());
                        }
                    }
                }
                None => {
                    // Terminally unresolved for contents; directories hand
                    // the question down to their children.
                    for &occurrence in &occurrences {
                        for &child in tree.node(occurrence).entries() {
                            if !seen.insert(child) {
                                continue;
                            }
                            let bucket = next_boundary.entry(tree.node(child).id()).or_default();
                            if bucket.is_empty() {
                                planned += 1;
                            }
                            bucket.push(child);
                        }
                    }
                }
            }
            progress.update(Step::Provenance, queried, Some(planned));
        }
        boundary = next_boundary;
    }
    Ok(())
}
