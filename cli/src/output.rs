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

//! Renderers for finished scans.

use std::collections::BTreeMap;
use std::io;
use std::io::IsTerminal as _;
use std::io::Write;

use clap::ValueEnum;
use serde_json::json;
use swh_scan_lib::report;
use swh_scan_lib::report::NodeRecord;
use swh_scan_lib::store::NodeInfoStore;
use swh_scan_lib::tree::SourceTree;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Indented tree of every scanned path
    Text,
    /// Aggregate known/unknown statistics
    Summary,
    /// One JSON object keyed by relative path
    Json,
    /// One JSON record per line
    Ndjson,
}

pub fn render(
    format: OutputFormat,
    tree: &SourceTree,
    store: &NodeInfoStore,
    mut out: impl Write,
) -> io::Result<()> {
    match format {
        OutputFormat::Text => {
            let color = io::stdout().is_terminal();
            render_text(tree, store, color, &mut out)
        }
        OutputFormat::Summary => render_summary(tree, store, &mut out),
        OutputFormat::Json => render_json(tree, store, &mut out),
        OutputFormat::Ndjson => render_ndjson(tree, store, &mut out),
    }
}

const RED: &str = "\x1b[91m";
const GREEN: &str = "\x1b[92m";
const BLUE: &str = "\x1b[94m";
const RESET: &str = "\x1b[0m";

fn render_text(
    tree: &SourceTree,
    store: &NodeInfoStore,
    color: bool,
    out: &mut impl Write,
) -> io::Result<()> {
    for node_id in tree.iter() {
        let node = tree.node(node_id);
        let rel = tree.rel_path(node_id);
        let level = if rel.is_empty() {
            0
        } else {
            rel.matches('/').count() + 1
        };
        let name = if rel.is_empty() {
            ".".to_owned()
        } else {
            node.name().to_string()
        };
        let known = store.known(node.id()).unwrap_or(false);
        let painted = if !color {
            name
        } else if !known {
            format!("{RED}{name}{RESET}")
        } else if node.is_directory() {
            format!("{BLUE}{name}{RESET}")
        } else {
            format!("{GREEN}{name}{RESET}")
        };
        let indent = "│   ".repeat(level);
        let suffix = if node.is_directory() { "/" } else { "" };
        writeln!(out, "{indent}{painted}{suffix}")?;
    }
    Ok(())
}

fn render_summary(
    tree: &SourceTree,
    store: &NodeInfoStore,
    out: &mut impl Write,
) -> io::Result<()> {
    let summary = report::summarize(tree, store);
    writeln!(out, "Files:             {:10}", summary.total_contents)?;
    writeln!(
        out,
        "            known: {:10} ({:3}%)",
        summary.known_contents,
        summary.known_contents_percent()
    )?;
    writeln!(out, "directories:       {:10}", summary.total_directories)?;
    writeln!(
        out,
        "      fully-known: {:10} ({:3}%)",
        summary.full_known_directories,
        summary.full_known_directories_percent()
    )?;
    writeln!(
        out,
        "  partially-known: {:10} ({:3}%)",
        summary.partially_known_directories,
        summary.partially_known_directories_percent()
    )?;
    Ok(())
}

/// Path-keyed object for the whole tree, alphabetical, without the path
/// repeated in the values.
fn json_object(tree: &SourceTree, store: &NodeInfoStore) -> BTreeMap<String, serde_json::Value> {
    report::node_records(tree, store)
        .into_iter()
        .map(|record| {
            let NodeRecord {
                path,
                swhid,
                directory,
                known,
                provenance,
            } = record;
            let mut value = json!({
                "swhid": swhid,
                "directory": directory,
                "known": known,
            });
            if let Some(provenance) = provenance {
                value["provenance"] = serde_json::to_value(provenance).expect("record serializes");
            }
            (path, value)
        })
        .collect()
}

fn render_json(
    tree: &SourceTree,
    store: &NodeInfoStore,
    out: &mut impl Write,
) -> io::Result<()> {
    let object = json_object(tree, store);
    serde_json::to_writer_pretty(&mut *out, &object)?;
    writeln!(out)?;
    Ok(())
}

fn render_ndjson(
    tree: &SourceTree,
    store: &NodeInfoStore,
    out: &mut impl Write,
) -> io::Result<()> {
    for (path, value) in json_object(tree, store) {
        serde_json::to_writer(&mut *out, &json!({ path: value }))?;
        writeln!(out)?;
    }
    Ok(())
}
