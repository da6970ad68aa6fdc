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

//! The on-disk Merkle tree and the ingester that builds it.
//!
//! Nodes live in an arena indexed by [`NodeId`]; each node stores its
//! parent index, so the tree carries no ownership cycles and can be read
//! concurrently once built. Every node has its identifier assigned before
//! the tree is handed to any network-facing phase.

use std::fs;
use std::io::Read as _;
use std::path::Path;
use std::path::PathBuf;

use bstr::BStr;
use thiserror::Error;

use crate::exclude::ExclusionSet;
use crate::file_util;
use crate::progress::ProgressSink;
use crate::progress::Step;
use crate::swhid;
use crate::swhid::ContentHasher;
use crate::swhid::CoreId;
use crate::swhid::DirectoryEntry;

/// Index of a node in a [`SourceTree`] arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Kind-specific node payload.
#[derive(Clone, Debug)]
pub enum NodeData {
    Content { size: u64, mode: u32 },
    Directory { entries: Vec<NodeId> },
}

/// One file or directory below the scan root.
#[derive(Clone, Debug)]
pub struct Node {
    id: CoreId,
    parent: Option<NodeId>,
    name: Vec<u8>,
    path: PathBuf,
    data: NodeData,
}

impl Node {
    /// The content-addressed identifier assigned at ingest time.
    pub fn id(&self) -> CoreId {
        self.id
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Raw bytes of the entry name; empty for the scan root.
    pub fn name(&self) -> &BStr {
        BStr::new(&self.name)
    }

    /// Absolute on-disk path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_directory(&self) -> bool {
        matches!(self.data, NodeData::Directory { .. })
    }

    /// Size in bytes; `None` for directories.
    pub fn size(&self) -> Option<u64> {
        match &self.data {
            NodeData::Content { size, .. } => Some(*size),
            NodeData::Directory { .. } => None,
        }
    }

    /// Direct children in canonical order; empty for contents.
    pub fn entries(&self) -> &[NodeId] {
        match &self.data {
            NodeData::Content { .. } => &[],
            NodeData::Directory { entries } => entries,
        }
    }
}

/// The Merkle tree of a scanned working copy.
///
/// Identical subtrees appearing at several paths are materialized once per
/// path; identity is recovered by comparing [`CoreId`]s. Traversals below
/// operate on the path-tree form.
#[derive(Clone, Debug)]
pub struct SourceTree {
    root_path: PathBuf,
    root: NodeId,
    nodes: Vec<Node>,
}

impl SourceTree {
    /// The scan root directory node.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Absolute path of the scan root.
    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    /// Total number of nodes, counting repeated subtrees per path.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Pre-order traversal of the whole tree.
    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.descendants(self.root)
    }

    /// Pre-order traversal of the subtree rooted at `start`, including
    /// `start` itself.
    pub fn descendants(&self, start: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let mut stack = vec![start];
        std::iter::from_fn(move || {
            let id = stack.pop()?;
            let entries = self.node(id).entries();
            // Reversed so that children pop in canonical order.
            stack.extend(entries.iter().rev());
            Some(id)
        })
    }

    /// Path of a node relative to the scan root, forward-slash separated,
    /// lossily decoded to UTF-8. The root itself maps to `""`.
    pub fn rel_path(&self, id: NodeId) -> String {
        let mut components = vec![];
        let mut cursor = Some(id);
        while let Some(node_id) = cursor {
            let node = self.node(node_id);
            if node.parent.is_some() {
                components.push(String::from_utf8_lossy(&node.name).into_owned());
            }
            cursor = node.parent;
        }
        components.reverse();
        components.join("/")
    }
}

/// Error that aborts the disk scan.
///
/// A file the ingester cannot read is fatal: skipping it silently would
/// change every ancestor directory digest.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("scan root {path} is not a directory", path = path.display())]
    NotADirectory { path: PathBuf },
    #[error("failed to read {path}", path = path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} changed while it was being read", path = path.display())]
    ChangedDuringScan { path: PathBuf },
}

/// Walks `root` and builds the Merkle tree of everything not excluded.
///
/// Symbolic links are not followed; they are recorded as content objects
/// over the raw link-target bytes, which is how the archive stores them.
/// Emits one `DiskScan` progress increment per node.
pub fn ingest(
    root: &Path,
    exclusions: &ExclusionSet,
    progress: &dyn ProgressSink,
) -> Result<SourceTree, IngestError> {
    let metadata = fs::symlink_metadata(root).map_err(|source| IngestError::Io {
        path: root.to_owned(),
        source,
    })?;
    if !metadata.is_dir() {
        return Err(IngestError::NotADirectory {
            path: root.to_owned(),
        });
    }
    let mut ingester = Ingester {
        exclusions,
        progress,
        nodes: vec![],
    };
    let root_id = ingester.ingest_directory(root, Path::new(""), vec![])?;
    Ok(SourceTree {
        root_path: root.to_owned(),
        root: root_id,
        nodes: ingester.nodes,
    })
}

struct Ingester<'a> {
    exclusions: &'a ExclusionSet,
    progress: &'a dyn ProgressSink,
    nodes: Vec<Node>,
}

impl Ingester<'_> {
    fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(u32::try_from(self.nodes.len()).expect("node count fits in u32"));
        self.nodes.push(node);
        self.progress.increment(Step::DiskScan, 1);
        id
    }

    fn ingest_directory(
        &mut self,
        disk_dir: &Path,
        rel_dir: &Path,
        name: Vec<u8>,
    ) -> Result<NodeId, IngestError> {
        let read_dir = disk_dir.read_dir().map_err(|source| IngestError::Io {
            path: disk_dir.to_owned(),
            source,
        })?;
        let mut children: Vec<(Vec<u8>, fs::DirEntry)> = vec![];
        for entry in read_dir {
            let entry = entry.map_err(|source| IngestError::Io {
                path: disk_dir.to_owned(),
                source,
            })?;
            children.push((file_util::os_str_to_bytes(&entry.file_name()), entry));
        }
        // Canonical entry order: directory names compare with a trailing
        // slash. Keeps the entry vector aligned with the digest input.
        children.sort_by_cached_key(|(name, entry)| {
            let mut key = name.clone();
            if entry.file_type().is_ok_and(|t| t.is_dir()) {
                key.push(b'/');
            }
            key
        });

        let mut entry_ids = vec![];
        for (child_name, entry) in children {
            let child_rel = rel_dir.join(file_util::path_from_bytes(&child_name));
            if self.exclusions.is_excluded(&child_rel) {
                tracing::debug!(path = %child_rel.display(), "excluded from the scan");
                continue;
            }
            let child_path = entry.path();
            let file_type = entry.file_type().map_err(|source| IngestError::Io {
                path: child_path.clone(),
                source,
            })?;
            let child_id = if file_type.is_dir() {
                self.ingest_directory(&child_path, &child_rel, child_name)?
            } else if file_type.is_symlink() {
                self.ingest_symlink(&child_path, child_name)?
            } else if file_type.is_file() {
                self.ingest_file(&child_path, child_name, &entry)?
            } else {
                // Sockets, fifos and devices have no archive counterpart.
                tracing::debug!(path = %child_path.display(), "skipping special file");
                continue;
            };
            entry_ids.push(child_id);
        }

        let directory_entries: Vec<DirectoryEntry<'_>> = entry_ids
            .iter()
            .map(|&child| {
                let node = &self.nodes[child.index()];
                let mode = match &node.data {
                    NodeData::Content { mode, .. } => *mode,
                    NodeData::Directory { .. } => swhid::MODE_DIRECTORY,
                };
                DirectoryEntry {
                    mode,
                    name: &node.name,
                    target: node.id,
                }
            })
            .collect();
        let id = swhid::directory_id(&directory_entries);
        let dir_id = self.push(Node {
            id,
            parent: None,
            name,
            path: disk_dir.to_owned(),
            data: NodeData::Directory {
                entries: entry_ids.clone(),
            },
        });
        for child in entry_ids {
            self.nodes[child.index()].parent = Some(dir_id);
        }
        Ok(dir_id)
    }

    fn ingest_file(
        &mut self,
        path: &Path,
        name: Vec<u8>,
        entry: &fs::DirEntry,
    ) -> Result<NodeId, IngestError> {
        let metadata = entry.metadata().map_err(|source| IngestError::Io {
            path: path.to_owned(),
            source,
        })?;
        let size = metadata.len();
        let mode = file_mode(&metadata);
        let id = hash_file(path, size)?;
        Ok(self.push(Node {
            id,
            parent: None,
            name,
            path: path.to_owned(),
            data: NodeData::Content { size, mode },
        }))
    }

    fn ingest_symlink(&mut self, path: &Path, name: Vec<u8>) -> Result<NodeId, IngestError> {
        let target = fs::read_link(path).map_err(|source| IngestError::Io {
            path: path.to_owned(),
            source,
        })?;
        let target_bytes = file_util::os_str_to_bytes(target.as_os_str());
        let id = swhid::content_id(&target_bytes);
        Ok(self.push(Node {
            id,
            parent: None,
            name,
            path: path.to_owned(),
            data: NodeData::Content {
                size: target_bytes.len() as u64,
                mode: swhid::MODE_SYMLINK,
            },
        }))
    }
}

fn file_mode(metadata: &fs::Metadata) -> u32 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt as _;
        if metadata.mode() & 0o111 != 0 {
            return swhid::MODE_EXECUTABLE;
        }
    }
    let _ = metadata;
    swhid::MODE_REGULAR
}

/// Streaming git-blob digest of a file, without buffering it whole.
fn hash_file(path: &Path, len: u64) -> Result<CoreId, IngestError> {
    let mut file = fs::File::open(path).map_err(|source| IngestError::Io {
        path: path.to_owned(),
        source,
    })?;
    let mut hasher = ContentHasher::new(len);
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf).map_err(|source| IngestError::Io {
            path: path.to_owned(),
            source,
        })?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    // The digest covers a length header; a file mutating underneath the
    // scan would yield an identifier matching nothing.
    if hasher.written() != hasher.expected() {
        return Err(IngestError::ChangedDuringScan {
            path: path.to_owned(),
        });
    }
    Ok(hasher.finish())
}
