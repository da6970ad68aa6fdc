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

//! Known/unknown labeling by random directory sampling.
//!
//! Directories are probed in randomly sampled batches. A directory the
//! archive knows proves every descendant known (Merkle monotonicity), so
//! its whole subtree drops out of the undecided set in one reply; an
//! unknown directory proves nothing about its ancestors or descendants and
//! only removes itself. Once every directory is decided, the contents that
//! no known directory vouched for are queried in full batches and labeled
//! verbatim. Contents below a known directory are never queried.

use std::collections::HashMap;
use std::collections::HashSet;

use rand::SeedableRng as _;
use rand::rngs::StdRng;
use rand::seq::IteratorRandom as _;

use crate::client::ArchiveError;
use crate::client::KnownSource;
use crate::client::QUERY_LIMIT;
use crate::progress::ProgressSink;
use crate::progress::Step;
use crate::store::NodeInfoStore;
use crate::swhid::CoreId;
use crate::tree::NodeId;
use crate::tree::SourceTree;

/// Ceiling on the number of identifiers probed per sampling round.
pub const SAMPLE_SIZE: usize = QUERY_LIMIT;

/// Labels every node of `tree` as known or unknown, issuing as few
/// queries as Merkle monotonicity allows.
///
/// On return every identifier in the store carries a concrete label:
/// directories and contents are either answered directly or proven known
/// through an ancestor directory.
pub async fn discover_known(
    tree: &SourceTree,
    store: &NodeInfoStore,
    source: &dyn KnownSource,
    progress: &dyn ProgressSink,
) -> Result<(), ArchiveError> {
    let total = store.len() as u64;
    let mut labeled: u64 = 0;

    // Undecided directories, each with every tree node it appears at;
    // duplicate subtrees collapse into a single query. Contents start in
    // their own pending set and leave it when a known ancestor vouches for
    // them.
    let mut undecided_dirs: HashMap<CoreId, Vec<NodeId>> = HashMap::new();
    let mut pending_contents: HashSet<CoreId> = HashSet::new();
    for node_id in tree.iter() {
        let node = tree.node(node_id);
        if node.is_directory() {
            undecided_dirs.entry(node.id()).or_default().push(node_id);
        } else {
            pending_contents.insert(node.id());
        }
    }

    let mut rng = StdRng::from_os_rng();
    while !undecided_dirs.is_empty() {
        let sample = draw_sample(&undecided_dirs, &mut rng);
        debug_assert!(!sample.is_empty() && sample.len() <= SAMPLE_SIZE);
        tracing::debug!(
            sample = sample.len(),
            undecided = undecided_dirs.len(),
            "probing directories"
        );
        let verdicts = source.known(&sample).await?;
        for id in sample {
            let Some(&known) = verdicts.get(&id) else {
                continue;
            };
            let Some(occurrences) = undecided_dirs.remove(&id) else {
                // Already settled by propagation from an earlier reply in
                // this same batch.
                continue;
            };
            if store.mark_known(id, known) {
                labeled += 1;
            }
            if known {
                // Everything below a known directory is known; drop the
                // whole subtree from the undecided sets.
                for &occurrence in &occurrences {
                    for descendant in tree.descendants(occurrence) {
                        let descendant_id = tree.node(descendant).id();
                        if descendant_id == id {
                            continue;
                        }
                        if store.mark_known(descendant_id, true) {
                            labeled += 1;
                        }
                        undecided_dirs.remove(&descendant_id);
                        pending_contents.remove(&descendant_id);
                    }
                }
            }
            // An unknown directory proves nothing about its neighborhood;
            // only the directory itself is decided.
        }
        progress.update(Step::KnownDiscovery, labeled, Some(total));
    }

    // Contents phase: whatever no directory vouched for is asked about
    // directly and labeled verbatim. The client chunks the batch at the
    // server's ceiling.
    let contents: Vec<CoreId> = pending_contents.into_iter().collect();
    if !contents.is_empty() {
        tracing::debug!(contents = contents.len(), "probing remaining contents");
        let verdicts = source.known(&contents).await?;
        for id in contents {
            let Some(&known) = verdicts.get(&id) else {
                continue;
            };
            if store.mark_known(id, known) {
                labeled += 1;
            }
        }
        progress.update(Step::KnownDiscovery, labeled, Some(total));
    }

    if cfg!(debug_assertions) {
        for node_id in tree.iter() {
            debug_assert!(
                store.known(tree.node(node_id).id()).is_some(),
                "discovery must label every identifier"
            );
        }
    }
    Ok(())
}

/// Uniformly samples up to [`SAMPLE_SIZE`] undecided directories; a set
/// that fits in one batch is queried whole.
fn draw_sample(dirs: &HashMap<CoreId, Vec<NodeId>>, rng: &mut StdRng) -> Vec<CoreId> {
    if dirs.len() <= SAMPLE_SIZE {
        dirs.keys().copied().collect()
    } else {
        dirs.keys().copied().choose_multiple(rng, SAMPLE_SIZE)
    }
}
