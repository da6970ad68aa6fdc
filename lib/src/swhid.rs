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

//! Typed content-addressed identifiers and the digests behind them.
//!
//! The textual grammar (`swh:1:cnt:<40 hex>`) and the digest formulas are
//! the archive's wire contract and must match it bit for bit. Contents are
//! hashed as git blobs, directories as git trees.

use std::fmt;
use std::fmt::Debug;
use std::str::FromStr;

use sha1::Digest as _;
use sha1::Sha1;
use thiserror::Error;
use url::Url;

/// Identifier scheme prefix mandated by the archive.
pub const ID_PREFIX: &str = "swh";
/// Schema version this implementation produces and accepts.
pub const ID_VERSION: &str = "1";
/// Length in bytes of the digest carried by every identifier.
pub const DIGEST_LEN: usize = 20;

/// Kind of object an identifier points to.
///
/// The scanner only ever mints `Content` and `Directory` identifiers;
/// the remaining kinds occur as provenance anchors in archive replies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObjectKind {
    Content,
    Directory,
    Release,
    Revision,
    Snapshot,
}

impl ObjectKind {
    /// The three-letter code used in the textual identifier form.
    pub fn code(self) -> &'static str {
        match self {
            Self::Content => "cnt",
            Self::Directory => "dir",
            Self::Release => "rel",
            Self::Revision => "rev",
            Self::Snapshot => "snp",
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        match code {
            "cnt" => Some(Self::Content),
            "dir" => Some(Self::Directory),
            "rel" => Some(Self::Release),
            "rev" => Some(Self::Revision),
            "snp" => Some(Self::Snapshot),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.code())
    }
}

/// Error raised when identifier text cannot be decoded.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdParseError {
    #[error("invalid identifier syntax: {0:?}")]
    Syntax(String),
    #[error("unknown identifier scheme {scheme:?} in {text:?}")]
    Scheme { scheme: String, text: String },
    #[error("unsupported identifier version {version:?} in {text:?}")]
    Version { version: String, text: String },
    #[error("unknown object kind {kind:?} in {text:?}")]
    Kind { kind: String, text: String },
    #[error("invalid digest in {0:?}")]
    Digest(String),
    #[error("invalid qualifier {qualifier:?} in {text:?}")]
    Qualifier { qualifier: String, text: String },
}

/// A typed identifier: an object kind plus a 20-byte digest.
///
/// Identifiers are plain values, cheap to copy, compared on the
/// (kind, digest) pair.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CoreId {
    kind: ObjectKind,
    digest: [u8; DIGEST_LEN],
}

impl CoreId {
    pub fn new(kind: ObjectKind, digest: [u8; DIGEST_LEN]) -> Self {
        Self { kind, digest }
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn digest(&self) -> &[u8; DIGEST_LEN] {
        &self.digest
    }

    pub fn is_directory(&self) -> bool {
        self.kind == ObjectKind::Directory
    }

    pub fn is_content(&self) -> bool {
        self.kind == ObjectKind::Content
    }

    /// Hex string representation of the digest part.
    pub fn hex(&self) -> String {
        hex::encode(self.digest)
    }
}

impl Debug for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CoreId").field(&self.to_string()).finish()
    }
}

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{ID_PREFIX}:{ID_VERSION}:{}:{}", self.kind.code(), self.hex())
    }
}

impl FromStr for CoreId {
    type Err = IdParseError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut parts = text.splitn(4, ':');
        let (Some(scheme), Some(version), Some(kind), Some(digest)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(IdParseError::Syntax(text.to_owned()));
        };
        if scheme != ID_PREFIX {
            return Err(IdParseError::Scheme {
                scheme: scheme.to_owned(),
                text: text.to_owned(),
            });
        }
        if version != ID_VERSION {
            return Err(IdParseError::Version {
                version: version.to_owned(),
                text: text.to_owned(),
            });
        }
        let kind = ObjectKind::from_code(kind).ok_or_else(|| IdParseError::Kind {
            kind: kind.to_owned(),
            text: text.to_owned(),
        })?;
        let raw = hex::decode(digest).map_err(|_| IdParseError::Digest(text.to_owned()))?;
        let digest = <[u8; DIGEST_LEN]>::try_from(raw.as_slice())
            .map_err(|_| IdParseError::Digest(text.to_owned()))?;
        Ok(Self { kind, digest })
    }
}

impl serde::Serialize for CoreId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_string().serialize(serializer)
    }
}

/// An identifier qualified with provenance information.
///
/// The scanner never mints these; they come back from the archive with an
/// `anchor` (a release or revision containing the object) and an `origin`
/// (the URL the anchor was collected from). Unrecognized qualifiers are
/// accepted and discarded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QualifiedId {
    core: CoreId,
    anchor: Option<CoreId>,
    origin: Option<Url>,
}

impl QualifiedId {
    pub fn new(core: CoreId, anchor: Option<CoreId>, origin: Option<Url>) -> Self {
        Self {
            core,
            anchor,
            origin,
        }
    }

    pub fn core(&self) -> &CoreId {
        &self.core
    }

    pub fn anchor(&self) -> Option<&CoreId> {
        self.anchor.as_ref()
    }

    pub fn origin(&self) -> Option<&Url> {
        self.origin.as_ref()
    }
}

impl fmt::Display for QualifiedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.core)?;
        if let Some(anchor) = &self.anchor {
            write!(f, ";anchor={anchor}")?;
        }
        if let Some(origin) = &self.origin {
            write!(f, ";origin={origin}")?;
        }
        Ok(())
    }
}

impl FromStr for QualifiedId {
    type Err = IdParseError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut parts = text.split(';');
        let core = parts
            .next()
            .expect("split yields at least one part")
            .parse()?;
        let mut anchor = None;
        let mut origin = None;
        for qualifier in parts {
            let Some((key, value)) = qualifier.split_once('=') else {
                return Err(IdParseError::Qualifier {
                    qualifier: qualifier.to_owned(),
                    text: text.to_owned(),
                });
            };
            match key {
                "anchor" => anchor = Some(value.parse()?),
                "origin" => {
                    let url = Url::parse(value).map_err(|_| IdParseError::Qualifier {
                        qualifier: qualifier.to_owned(),
                        text: text.to_owned(),
                    })?;
                    origin = Some(url);
                }
                // Other qualifiers (visit, path, lines) carry no meaning
                // for the scanner.
                _ => {}
            }
        }
        Ok(Self {
            core,
            anchor,
            origin,
        })
    }
}

impl serde::Serialize for QualifiedId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_string().serialize(serializer)
    }
}

/// Streaming hasher producing a `Content` identifier.
///
/// The total length must be announced up front because the digest covers a
/// `blob <len>\0` header before the object bytes.
pub struct ContentHasher {
    inner: Sha1,
    expected: u64,
    written: u64,
}

impl ContentHasher {
    pub fn new(len: u64) -> Self {
        let mut inner = Sha1::new();
        inner.update(format!("blob {len}\0").as_bytes());
        Self {
            inner,
            expected: len,
            written: 0,
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.written += bytes.len() as u64;
        self.inner.update(bytes);
    }

    /// Number of object bytes hashed so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Total length announced at construction time.
    pub fn expected(&self) -> u64 {
        self.expected
    }

    pub fn finish(self) -> CoreId {
        CoreId::new(ObjectKind::Content, self.inner.finalize().into())
    }
}

/// Content identifier of an in-memory byte string.
pub fn content_id(bytes: &[u8]) -> CoreId {
    let mut hasher = ContentHasher::new(bytes.len() as u64);
    hasher.update(bytes);
    hasher.finish()
}

/// One entry in the canonical serialization of a directory.
#[derive(Clone, Copy, Debug)]
pub struct DirectoryEntry<'a> {
    /// Git permission mode (`0o100644`, `0o100755`, `0o120000`, `0o40000`).
    pub mode: u32,
    /// Raw entry name bytes.
    pub name: &'a [u8],
    /// Identifier of the entry's object.
    pub target: CoreId,
}

impl DirectoryEntry<'_> {
    /// Sort key of the canonical entry order: directory names compare as if
    /// they had a trailing slash.
    fn sort_key(&self) -> Vec<u8> {
        let mut key = self.name.to_vec();
        if self.mode == MODE_DIRECTORY {
            key.push(b'/');
        }
        key
    }
}

/// Permission mode of a regular file entry.
pub const MODE_REGULAR: u32 = 0o100_644;
/// Permission mode of an executable file entry.
pub const MODE_EXECUTABLE: u32 = 0o100_755;
/// Permission mode of a symbolic link entry.
pub const MODE_SYMLINK: u32 = 0o120_000;
/// Permission mode of a sub-directory entry.
pub const MODE_DIRECTORY: u32 = 0o040_000;

/// Directory identifier over the given entries.
///
/// Entries are serialized as `<octal mode> SP <name> NUL <raw digest>` in
/// canonical order and hashed under a `tree <len>\0` header. The result is
/// a deterministic function of the entries, whatever order they arrive in.
pub fn directory_id(entries: &[DirectoryEntry<'_>]) -> CoreId {
    let mut ordered: Vec<&DirectoryEntry<'_>> = entries.iter().collect();
    ordered.sort_by_key(|entry| entry.sort_key());
    let mut body = Vec::new();
    for entry in ordered {
        body.extend_from_slice(format!("{:o} ", entry.mode).as_bytes());
        body.extend_from_slice(entry.name);
        body.push(0);
        body.extend_from_slice(entry.target.digest());
    }
    let mut hasher = Sha1::new();
    hasher.update(format!("tree {}\0", body.len()).as_bytes());
    hasher.update(&body);
    CoreId::new(ObjectKind::Directory, hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    // Well-known git object digests.
    const EMPTY_TREE_HEX: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";
    const HELLO_BLOB_HEX: &str = "ce013625030ba8dba906f756967f9e9ca394464a";

    #[test]
    fn test_content_id_known_vectors() {
        assert_eq!(
            content_id(b"hello\n").to_string(),
            format!("swh:1:cnt:{HELLO_BLOB_HEX}")
        );
        assert_eq!(
            content_id(b"").hex(),
            "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391"
        );
    }

    #[test]
    fn test_content_hasher_streams() {
        let mut hasher = ContentHasher::new(6);
        hasher.update(b"hel");
        hasher.update(b"lo\n");
        assert_eq!(hasher.written(), 6);
        assert_eq!(hasher.finish().hex(), HELLO_BLOB_HEX);
    }

    #[test]
    fn test_empty_directory_id() {
        assert_eq!(directory_id(&[]).to_string(), format!("swh:1:dir:{EMPTY_TREE_HEX}"));
    }

    #[test]
    fn test_directory_id_entry_order_is_canonical() {
        let blob = content_id(b"hello\n");
        let subdir = directory_id(&[]);
        let entries = [
            DirectoryEntry {
                mode: MODE_REGULAR,
                name: b"foo.txt",
                target: blob,
            },
            DirectoryEntry {
                mode: MODE_DIRECTORY,
                name: b"foo",
                target: subdir,
            },
        ];
        let mut reversed = entries;
        reversed.reverse();
        assert_eq!(directory_id(&entries), directory_id(&reversed));
        // `foo/` sorts after `foo.txt` in the canonical order; a plain name
        // sort would put `foo` first and produce a different digest.
        // Cross-checked against `git mktree`.
        assert_eq!(
            directory_id(&entries).hex(),
            {
                let mut body = Vec::new();
                body.extend_from_slice(b"100644 foo.txt\0");
                body.extend_from_slice(blob.digest());
                body.extend_from_slice(b"40000 foo\0");
                body.extend_from_slice(subdir.digest());
                let mut hasher = Sha1::new();
                hasher.update(format!("tree {}\0", body.len()).as_bytes());
                hasher.update(&body);
                hex::encode(hasher.finalize())
            }
        );
    }

    #[test]
    fn test_core_id_round_trip() {
        let text = format!("swh:1:dir:{EMPTY_TREE_HEX}");
        let id: CoreId = text.parse().unwrap();
        assert_eq!(id.kind(), ObjectKind::Directory);
        assert_eq!(id.to_string(), text);
    }

    #[test]
    fn test_core_id_parse_errors() {
        assert_matches!(
            "swh:1:dir".parse::<CoreId>(),
            Err(IdParseError::Syntax(_))
        );
        assert_matches!(
            format!("foo:1:dir:{EMPTY_TREE_HEX}").parse::<CoreId>(),
            Err(IdParseError::Scheme { .. })
        );
        assert_matches!(
            format!("swh:2:dir:{EMPTY_TREE_HEX}").parse::<CoreId>(),
            Err(IdParseError::Version { .. })
        );
        assert_matches!(
            format!("swh:1:ori:{EMPTY_TREE_HEX}").parse::<CoreId>(),
            Err(IdParseError::Kind { .. })
        );
        assert_matches!(
            "swh:1:cnt:beef".parse::<CoreId>(),
            Err(IdParseError::Digest(_))
        );
        assert_matches!(
            "swh:1:cnt:zz013625030ba8dba906f756967f9e9ca394464a".parse::<CoreId>(),
            Err(IdParseError::Digest(_))
        );
    }

    #[test]
    fn test_qualified_id_round_trip() {
        let text = format!(
            "swh:1:cnt:{HELLO_BLOB_HEX};anchor=swh:1:rel:{EMPTY_TREE_HEX};origin=https://example.org/repo.git"
        );
        let qualified: QualifiedId = text.parse().unwrap();
        assert_eq!(qualified.core().kind(), ObjectKind::Content);
        assert_eq!(qualified.anchor().unwrap().kind(), ObjectKind::Release);
        assert_eq!(
            qualified.origin().unwrap().as_str(),
            "https://example.org/repo.git"
        );
        assert_eq!(qualified.to_string(), text);
    }

    #[test]
    fn test_qualified_id_ignores_unknown_qualifiers() {
        let text = format!("swh:1:cnt:{HELLO_BLOB_HEX};visit=swh:1:snp:{EMPTY_TREE_HEX};lines=9-15");
        let qualified: QualifiedId = text.parse().unwrap();
        assert_eq!(qualified.anchor(), None);
        assert_eq!(qualified.origin(), None);
    }

    #[test]
    fn test_qualified_id_rejects_bare_qualifier() {
        let text = format!("swh:1:cnt:{HELLO_BLOB_HEX};anchor");
        assert_matches!(
            text.parse::<QualifiedId>(),
            Err(IdParseError::Qualifier { .. })
        );
    }
}
