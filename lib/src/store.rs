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

//! Per-identifier scan results.
//!
//! The store maps every identifier present in the Merkle tree to a small
//! record: whether the archive knows the object, and (optionally) where it
//! came from. It is populated once after ingest and never grows afterward;
//! writes are serialized by a mutex, readers may observe it concurrently
//! with the discovery phase.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::swhid::CoreId;
use crate::swhid::QualifiedId;
use crate::tree::SourceTree;

/// What the scan learned about one identifier.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeInfo {
    /// `None` until the discovery phase labels the object.
    pub known: Option<bool>,
    /// Best-effort provenance; absent unless resolved.
    pub provenance: Option<QualifiedId>,
}

/// Concurrent map from identifier to [`NodeInfo`].
#[derive(Debug)]
pub struct NodeInfoStore {
    inner: Mutex<HashMap<CoreId, NodeInfo>>,
}

impl NodeInfoStore {
    /// Creates a store holding one default record per unique identifier in
    /// the tree.
    pub fn from_tree(tree: &SourceTree) -> Self {
        let mut map = HashMap::with_capacity(tree.len());
        for node_id in tree.iter() {
            map.entry(tree.node(node_id).id()).or_default();
        }
        Self {
            inner: Mutex::new(map),
        }
    }

    /// Number of unique identifiers tracked.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    pub fn get(&self, id: CoreId) -> Option<NodeInfo> {
        self.inner.lock().unwrap().get(&id).cloned()
    }

    /// The `known` label of `id`, if the id is tracked and labeled.
    pub fn known(&self, id: CoreId) -> Option<bool> {
        self.inner.lock().unwrap().get(&id).and_then(|info| info.known)
    }

    /// Labels `id`. Returns true if the record changed.
    ///
    /// `known` only moves forward: an id proven present (directly or
    /// through an ancestor directory) is never demoted, whatever a later
    /// reply claims.
    pub fn mark_known(&self, id: CoreId, known: bool) -> bool {
        let mut map = self.inner.lock().unwrap();
        let Some(info) = map.get_mut(&id) else {
            debug_assert!(false, "label for an id absent from the tree: {id}");
            return false;
        };
        match info.known {
            None => {
                info.known = Some(known);
                true
            }
            Some(true) => false,
            Some(false) if known => {
                info.known = Some(true);
                true
            }
            Some(false) => false,
        }
    }

    /// Records provenance for `id`. The first write wins; later answers
    /// for the same id are dropped.
    pub fn set_provenance(&self, id: CoreId, provenance: QualifiedId) -> bool {
        let mut map = self.inner.lock().unwrap();
        let Some(info) = map.get_mut(&id) else {
            debug_assert!(false, "provenance for an id absent from the tree: {id}");
            return false;
        };
        if info.provenance.is_none() {
            info.provenance = Some(provenance);
            true
        } else {
            false
        }
    }

    /// A point-in-time copy of every record.
    pub fn snapshot(&self) -> HashMap<CoreId, NodeInfo> {
        self.inner.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr as _;

    use super::*;
    use crate::exclude::ExclusionSet;
    use crate::progress::NoProgress;
    use crate::swhid::content_id;
    use crate::tree;

    fn store_with(ids: &[CoreId]) -> NodeInfoStore {
        // Build through a real (empty) tree, then splice in the wanted ids.
        let dir = tempfile::tempdir().unwrap();
        let tree = tree::ingest(dir.path(), &ExclusionSet::empty(), &NoProgress).unwrap();
        let store = NodeInfoStore::from_tree(&tree);
        {
            let mut map = store.inner.lock().unwrap();
            for &id in ids {
                map.entry(id).or_default();
            }
        }
        store
    }

    #[test]
    fn test_known_is_monotonic() {
        let id = content_id(b"hello\n");
        let store = store_with(&[id]);
        assert_eq!(store.known(id), None);
        assert!(store.mark_known(id, true));
        assert_eq!(store.known(id), Some(true));
        // A later contradicting reply is dropped.
        assert!(!store.mark_known(id, false));
        assert_eq!(store.known(id), Some(true));
    }

    #[test]
    fn test_unknown_may_be_promoted() {
        let id = content_id(b"hello\n");
        let store = store_with(&[id]);
        assert!(store.mark_known(id, false));
        assert!(store.mark_known(id, true));
        assert_eq!(store.known(id), Some(true));
    }

    #[test]
    fn test_provenance_first_write_wins() {
        let id = content_id(b"hello\n");
        let store = store_with(&[id]);
        let first = QualifiedId::from_str(&format!("{id};origin=https://example.org/a")).unwrap();
        let second = QualifiedId::from_str(&format!("{id};origin=https://example.org/b")).unwrap();
        assert!(store.set_provenance(id, first.clone()));
        assert!(!store.set_provenance(id, second));
        assert_eq!(store.get(id).unwrap().provenance, Some(first));
    }
}
