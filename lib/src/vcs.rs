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

//! Ignored-path detection through the working copy's version control
//! system.
//!
//! When the scan root carries a `.git`, `.hg` or `.svn` directory, the
//! corresponding status command is invoked and its stable (NUL- or
//! XML-delimited) output parsed into the set of ignored paths. A failing
//! subprocess never aborts the scan; it degrades to an empty set.

use std::path::Path;
use std::process::Command;
use std::process::Stdio;

use bstr::ByteSlice as _;
use thiserror::Error;

/// Error originating in a VCS status subprocess.
#[derive(Debug, Error)]
pub enum VcsError {
    #[error("could not execute `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` failed: {stderr}")]
    Failed { command: String, stderr: String },
    #[error("unexpected output from `{command}`")]
    Parse { command: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Vcs {
    Git,
    Hg,
    Svn,
}

impl Vcs {
    const ALL: [Self; 3] = [Self::Git, Self::Hg, Self::Svn];

    fn marker_dir(self) -> &'static str {
        match self {
            Self::Git => ".git",
            Self::Hg => ".hg",
            Self::Svn => ".svn",
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Git => "git",
            Self::Hg => "hg",
            Self::Svn => "svn",
        }
    }
}

/// Paths the working copy's VCS reports as ignored, relative to `root`, as
/// raw bytes.
///
/// The first VCS whose marker directory exists under `root` is consulted;
/// if its status command fails the failure is logged and an empty set is
/// returned.
pub fn ignored_paths(root: &Path) -> Vec<Vec<u8>> {
    for vcs in Vcs::ALL {
        if !root.join(vcs.marker_dir()).is_dir() {
            continue;
        }
        tracing::debug!(vcs = vcs.name(), "collecting VCS-ignored paths");
        return match run_status(vcs, root) {
            Ok(paths) => paths,
            Err(err) => {
                tracing::warn!(
                    vcs = vcs.name(),
                    ?err,
                    "failed to collect ignored paths, continuing without them"
                );
                vec![]
            }
        };
    }
    tracing::debug!("no VCS detected at the scan root");
    vec![]
}

fn run_status(vcs: Vcs, root: &Path) -> Result<Vec<Vec<u8>>, VcsError> {
    let output = match vcs {
        Vcs::Git => spawn_status(
            root,
            "git",
            &["status", "--ignored", "--no-renames", "-z"],
            &[],
        )?,
        Vcs::Hg => spawn_status(
            root,
            "hg",
            &["status", "--ignored", "--no-status", "-0"],
            &[("HGPLAIN", "1")],
        )?,
        Vcs::Svn => spawn_status(root, "svn", &["status", "--no-ignore", "--xml"], &[])?,
    };
    match vcs {
        Vcs::Git => Ok(parse_git_status(&output)),
        Vcs::Hg => Ok(parse_hg_status(&output)),
        Vcs::Svn => parse_svn_status(&output),
    }
}

fn spawn_status(
    root: &Path,
    program: &str,
    args: &[&str],
    envs: &[(&str, &str)],
) -> Result<Vec<u8>, VcsError> {
    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(root)
        // Locale-independent output so it can be parsed.
        .env("LC_ALL", "C")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in envs {
        command.env(key, value);
    }
    let command_display = format!("{program} {}", args.join(" "));
    tracing::debug!(command = %command_display, "spawning a VCS status subprocess");
    let output = command.output().map_err(|source| VcsError::Spawn {
        command: command_display.clone(),
        source,
    })?;
    if !output.status.success() {
        return Err(VcsError::Failed {
            command: command_display,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        });
    }
    Ok(output.stdout)
}

/// Parses `git status --ignored --no-renames -z` output: NUL-separated
/// `XY name` records, of which only `!!` (ignored) entries matter.
fn parse_git_status(stdout: &[u8]) -> Vec<Vec<u8>> {
    let mut paths = vec![];
    for record in stdout.split(|&b| b == 0) {
        if record.is_empty() {
            continue;
        }
        let Some((status, name)) = record.split_once_str(b" ") else {
            continue;
        };
        if status != b"!!" {
            continue;
        }
        let name = name.strip_suffix(b"/").unwrap_or(name);
        paths.push(name.to_vec());
    }
    paths
}

/// Parses `hg status --ignored --no-status -0` output: NUL-separated bare
/// paths.
fn parse_hg_status(stdout: &[u8]) -> Vec<Vec<u8>> {
    stdout
        .split(|&b| b == 0)
        .filter(|record| !record.is_empty())
        .map(<[u8]>::to_vec)
        .collect()
}

/// Parses `svn status --no-ignore --xml` output, keeping entries whose
/// `wc-status` item is `ignored`.
///
/// The XML shape is stable (`<entry path="..."><wc-status item="..."/>`),
/// so a targeted scan over the entry elements is enough; only the five
/// standard character entities occur in attribute values.
fn parse_svn_status(stdout: &[u8]) -> Result<Vec<Vec<u8>>, VcsError> {
    let text = std::str::from_utf8(stdout).map_err(|_| VcsError::Parse {
        command: "svn status --no-ignore --xml".to_owned(),
    })?;
    let mut paths = vec![];
    let mut rest = text;
    while let Some(start) = rest.find("<entry") {
        let entry = &rest[start..];
        let end = entry.find("</entry>").unwrap_or(entry.len());
        let (entry, tail) = entry.split_at(end);
        if let Some(path) = xml_attribute(entry, "path")
            && let Some(item) = xml_attribute(entry, "item")
            && item == "ignored"
        {
            paths.push(xml_unescape(path).into_bytes());
        }
        rest = tail;
    }
    Ok(paths)
}

fn xml_attribute<'a>(element: &'a str, name: &str) -> Option<&'a str> {
    let marker = format!("{name}=\"");
    let start = element.find(&marker)? + marker.len();
    let rest = &element[start..];
    let end = rest.find('"')?;
    Some(&rest[..end])
}

fn xml_unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_git_status() {
        let stdout = b"?? untracked.txt\0!! build/\0!! out.o\0 M modified.rs\0";
        assert_eq!(
            parse_git_status(stdout),
            vec![b"build".to_vec(), b"out.o".to_vec()]
        );
    }

    #[test]
    fn test_parse_git_status_empty() {
        assert_eq!(parse_git_status(b""), Vec::<Vec<u8>>::new());
    }

    #[test]
    fn test_parse_hg_status() {
        let stdout = b"build/out\0.coverage\0";
        assert_eq!(
            parse_hg_status(stdout),
            vec![b"build/out".to_vec(), b".coverage".to_vec()]
        );
    }

    #[test]
    fn test_parse_svn_status() {
        let stdout = br#"<?xml version="1.0" encoding="UTF-8"?>
<status>
<target path=".">
<entry path="build">
<wc-status props="none" item="ignored"></wc-status>
</entry>
<entry path="src/new.rs">
<wc-status props="none" item="unversioned"></wc-status>
</entry>
<entry path="a &amp; b">
<wc-status props="none" item="ignored"></wc-status>
</entry>
</target>
</status>
"#;
        assert_eq!(
            parse_svn_status(stdout).unwrap(),
            vec![b"build".to_vec(), b"a & b".to_vec()]
        );
    }

    #[test]
    fn test_ignored_paths_without_vcs() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(ignored_paths(dir.path()), Vec::<Vec<u8>>::new());
    }
}
