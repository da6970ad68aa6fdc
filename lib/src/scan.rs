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

//! The scan entry point tying the phases together.
//!
//! A scan is: assemble exclusions, ingest the working copy, then drive the
//! archive client through known-discovery and (optionally) provenance
//! resolution. Nothing persists across scans and the working copy is never
//! modified.

use std::path::PathBuf;

use thiserror::Error;
use url::Url;

use crate::client::ArchiveClient;
use crate::client::ArchiveError;
use crate::discovery;
use crate::exclude::ExcludeError;
use crate::exclude::ExclusionSetBuilder;
use crate::progress::ProgressSink;
use crate::provenance;
use crate::store::NodeInfoStore;
use crate::tree;
use crate::tree::IngestError;
use crate::tree::SourceTree;
use crate::vcs;

/// What to scan and how.
#[derive(Clone, Debug)]
pub struct ScanConfig {
    /// Absolute path of the working copy to scan.
    pub root: PathBuf,
    /// Root of the archive's web API.
    pub api_url: Url,
    /// Optional bearer token for the archive.
    pub auth_token: Option<String>,
    /// User-supplied exclusion globs.
    pub exclude: Vec<String>,
    /// Exclusion template files (one glob per line).
    pub exclude_templates: Vec<PathBuf>,
    /// Apply the built-in default exclusion patterns.
    pub default_patterns: bool,
    /// Exclude paths the working copy's VCS reports as ignored.
    pub vcs_patterns: bool,
    /// Also resolve provenance for known subtrees.
    pub provenance: bool,
}

/// A finished scan: the tree that was hashed and the labels attached to
/// its identifiers.
#[derive(Debug)]
pub struct ScanOutcome {
    pub tree: SourceTree,
    pub store: NodeInfoStore,
}

/// Error aborting a scan. Partial results are not surfaced.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Exclude(#[from] ExcludeError),
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

/// Runs a whole scan per `config`, reporting progress into `progress`.
pub async fn scan(config: &ScanConfig, progress: &dyn ProgressSink) -> Result<ScanOutcome, ScanError> {
    let mut exclusions = ExclusionSetBuilder::new();
    exclusions.add_patterns(config.exclude.iter().cloned());
    for template in &config.exclude_templates {
        exclusions.add_template_file(template)?;
    }
    if config.default_patterns {
        exclusions.add_defaults();
    }
    if config.vcs_patterns {
        exclusions.add_path_bytes(vcs::ignored_paths(&config.root));
    }
    let exclusions = exclusions.build()?;

    tracing::info!(root = %config.root.display(), "scanning the working copy");
    let tree = tree::ingest(&config.root, &exclusions, progress)?;
    tracing::info!(nodes = tree.len(), "working copy hashed");

    let store = NodeInfoStore::from_tree(&tree);
    let client = ArchiveClient::new(config.api_url.clone(), config.auth_token.as_deref())?;

    discovery::discover_known(&tree, &store, &client, progress).await?;
    if config.provenance {
        provenance::resolve_provenance(&tree, &store, &client, progress).await?;
    }
    Ok(ScanOutcome { tree, store })
}
