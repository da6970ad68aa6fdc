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

//! Composable exclusion patterns applied during the disk scan.
//!
//! An [`ExclusionSet`] is assembled once per scan from up to four sources:
//! user-supplied globs, template files (one glob per line, `#` comments),
//! paths the working copy's VCS reports as ignored, and a built-in default
//! list. A path is excluded iff any pattern matches. Patterns are compiled
//! once; `*` crosses path separators, matching the historical fnmatch
//! behavior of such pattern lists.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use globset::Glob;
use globset::GlobSet;
use globset::GlobSetBuilder;
use thiserror::Error;

use crate::file_util;

/// Pattern names every scan ignores unless explicitly asked not to.
///
/// Each pattern is also applied with a `*/` prefix so it matches at any
/// depth below the scan root.
pub const DEFAULT_EXCLUDE_PATTERNS: &[&str] = &[
    ".bzr",
    ".coverage",
    "*.egg-info",
    ".eggs",
    ".git",
    ".hg",
    ".mypy_cache",
    "__pycache__",
    ".svn",
    ".tox",
];

/// Error raised while assembling an exclusion set.
#[derive(Debug, Error)]
pub enum ExcludeError {
    #[error("invalid exclusion pattern {pattern:?}")]
    Pattern {
        pattern: String,
        #[source]
        source: Box<globset::Error>,
    },
    #[error("cannot read exclusion template {path}", path = path.display())]
    Template {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Accumulates exclusion sources before compiling them.
#[derive(Debug, Default)]
pub struct ExclusionSetBuilder {
    patterns: Vec<String>,
    paths: HashSet<PathBuf>,
}

impl ExclusionSetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a single glob pattern, matched against paths relative to the
    /// scan root.
    pub fn add_pattern(&mut self, pattern: impl Into<String>) -> &mut Self {
        self.patterns.push(pattern.into());
        self
    }

    pub fn add_patterns<I, S>(&mut self, patterns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for pattern in patterns {
            self.add_pattern(pattern);
        }
        self
    }

    /// Adds the built-in default patterns, each at the root and at any
    /// depth.
    pub fn add_defaults(&mut self) -> &mut Self {
        for pattern in DEFAULT_EXCLUDE_PATTERNS {
            self.add_pattern(*pattern);
        }
        for pattern in DEFAULT_EXCLUDE_PATTERNS {
            self.add_pattern(format!("*/{pattern}"));
        }
        self
    }

    /// Reads a template file: one glob per line, blank lines and `#`
    /// comments skipped.
    pub fn add_template_file(&mut self, path: &Path) -> Result<&mut Self, ExcludeError> {
        let text = fs::read_to_string(path).map_err(|source| ExcludeError::Template {
            path: path.to_owned(),
            source,
        })?;
        for line in text.lines() {
            let line = line.trim();
            if !line.is_empty() && !line.starts_with('#') {
                self.add_pattern(line);
            }
        }
        Ok(self)
    }

    /// Adds a resolved path (relative to the scan root), typically reported
    /// by the working copy's VCS as ignored. The path and everything below
    /// it are excluded.
    pub fn add_path(&mut self, path: PathBuf) -> &mut Self {
        self.paths.insert(path);
        self
    }

    /// Adds raw-byte relative paths as produced by the VCS status parsers.
    pub fn add_path_bytes<I>(&mut self, paths: I) -> &mut Self
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        for path in paths {
            self.add_path(file_util::path_from_bytes(&path));
        }
        self
    }

    pub fn build(self) -> Result<ExclusionSet, ExcludeError> {
        let mut globs = GlobSetBuilder::new();
        for pattern in &self.patterns {
            let glob = Glob::new(pattern).map_err(|source| ExcludeError::Pattern {
                pattern: pattern.clone(),
                source: Box::new(source),
            })?;
            globs.add(glob);
        }
        let globs = globs.build().map_err(|source| ExcludeError::Pattern {
            pattern: String::new(),
            source: Box::new(source),
        })?;
        Ok(ExclusionSet {
            globs,
            pattern_count: self.patterns.len(),
            paths: self.paths,
        })
    }
}

/// Compiled exclusion patterns; consulted read-only by the disk ingester.
#[derive(Debug)]
pub struct ExclusionSet {
    globs: GlobSet,
    pattern_count: usize,
    paths: HashSet<PathBuf>,
}

impl ExclusionSet {
    /// An exclusion set that matches nothing.
    pub fn empty() -> Self {
        ExclusionSetBuilder::new()
            .build()
            .expect("empty set always compiles")
    }

    /// Whether `rel_path` (relative to the scan root) is excluded.
    ///
    /// The ingester prunes excluded directories without descending, so a
    /// match on a directory excludes its whole subtree.
    pub fn is_excluded(&self, rel_path: &Path) -> bool {
        self.paths.contains(rel_path) || self.globs.is_match(rel_path)
    }

    pub fn is_empty(&self) -> bool {
        self.pattern_count == 0 && self.paths.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use test_case::test_case;

    use super::*;

    fn default_set() -> ExclusionSet {
        let mut builder = ExclusionSetBuilder::new();
        builder.add_defaults();
        builder.build().unwrap()
    }

    #[test_case(".git", true; "vcs dir at root")]
    #[test_case("sub/dir/.git", true; "vcs dir nested")]
    #[test_case("__pycache__", true; "cache dir at root")]
    #[test_case("a/b/pkg.egg-info", true; "egg info nested")]
    #[test_case("src/main.rs", false; "source file")]
    #[test_case("gitstuff", false; "name containing default as substring")]
    fn test_default_patterns(path: &str, excluded: bool) {
        assert_eq!(default_set().is_excluded(Path::new(path)), excluded);
    }

    #[test]
    fn test_user_patterns_cross_separators() {
        let mut builder = ExclusionSetBuilder::new();
        builder.add_pattern("*.o");
        let set = builder.build().unwrap();
        // `*` crosses `/`, so a bare suffix pattern matches at any depth.
        assert!(set.is_excluded(Path::new("main.o")));
        assert!(set.is_excluded(Path::new("deep/nested/main.o")));
        assert!(!set.is_excluded(Path::new("main.c")));
    }

    #[test]
    fn test_resolved_paths() {
        let mut builder = ExclusionSetBuilder::new();
        builder.add_path_bytes([b"build/out".to_vec()]);
        let set = builder.build().unwrap();
        assert!(set.is_excluded(Path::new("build/out")));
        assert!(!set.is_excluded(Path::new("build")));
        assert!(!set.is_excluded(Path::new("build/other")));
    }

    #[test]
    fn test_template_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# build products").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "target").unwrap();
        writeln!(file, "  *.tmp  ").unwrap();
        let mut builder = ExclusionSetBuilder::new();
        builder.add_template_file(file.path()).unwrap();
        let set = builder.build().unwrap();
        assert!(set.is_excluded(Path::new("target")));
        assert!(set.is_excluded(Path::new("scratch.tmp")));
        assert!(!set.is_excluded(Path::new("# build products")));
    }

    #[test]
    fn test_empty_set() {
        let set = ExclusionSet::empty();
        assert!(set.is_empty());
        assert!(!set.is_excluded(Path::new(".git")));
    }
}
