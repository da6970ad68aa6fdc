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

//! End-to-end scans against a mocked archive server.

mod common;

use std::collections::HashMap;

use common::write_files;
use swh_scan_lib::progress::NoProgress;
use swh_scan_lib::scan::ScanConfig;
use swh_scan_lib::scan::scan;
use url::Url;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::Request;
use wiremock::ResponseTemplate;
use wiremock::matchers::method;
use wiremock::matchers::path;

fn answer_none_known(request: &Request) -> ResponseTemplate {
    let body: Vec<String> = serde_json::from_slice(&request.body).unwrap();
    let reply: HashMap<String, serde_json::Value> = body
        .into_iter()
        .map(|id| (id, serde_json::json!({"known": false})))
        .collect();
    ResponseTemplate::new(200).set_body_json(reply)
}

fn config_for(server: &MockServer, root: std::path::PathBuf) -> ScanConfig {
    ScanConfig {
        root,
        api_url: Url::parse(&format!("{}/api/1/", server.uri())).unwrap(),
        auth_token: None,
        exclude: vec![],
        exclude_templates: vec![],
        default_patterns: true,
        vcs_patterns: false,
        provenance: false,
    }
}

#[tokio::test]
async fn test_scan_labels_everything_and_applies_default_excludes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/1/known/"))
        .respond_with(answer_none_known)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    write_files(
        dir.path(),
        &[
            ("src/main.rs", "fn main() {}\n"),
            (".git/HEAD", "ref: refs/heads/main\n"),
            ("__pycache__/mod.pyc", "\x00"),
        ],
    );
    let config = config_for(&server, dir.path().to_owned());
    let outcome = scan(&config, &NoProgress).await.unwrap();

    // Default patterns keep VCS internals and caches out of the tree.
    let paths: Vec<String> = outcome
        .tree
        .iter()
        .map(|n| outcome.tree.rel_path(n))
        .collect();
    assert_eq!(paths, ["", "src", "src/main.rs"]);
    // Every surviving node is labeled.
    for node_id in outcome.tree.iter() {
        let id = outcome.tree.node(node_id).id();
        assert_eq!(outcome.store.known(id), Some(false));
    }
}

#[tokio::test]
async fn test_scan_with_provenance_phase() {
    let server = MockServer::start().await;
    let answer_all_known = |request: &Request| {
        let body: Vec<String> = serde_json::from_slice(&request.body).unwrap();
        let reply: HashMap<String, serde_json::Value> = body
            .into_iter()
            .map(|id| (id, serde_json::json!({"known": true})))
            .collect();
        ResponseTemplate::new(200).set_body_json(reply)
    };
    let anchor_everything = |request: &Request| {
        let body: Vec<String> = serde_json::from_slice(&request.body).unwrap();
        let reply: Vec<Option<String>> = body
            .into_iter()
            .map(|id| Some(format!("{id};origin=https://example/origin.git")))
            .collect();
        ResponseTemplate::new(200).set_body_json(reply)
    };
    Mock::given(method("POST"))
        .and(path("/api/1/known/"))
        .respond_with(answer_all_known)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/1/provenance/whereare/"))
        .respond_with(anchor_everything)
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    write_files(dir.path(), &[("a.txt", "alpha"), ("sub/b.txt", "beta")]);
    let mut config = config_for(&server, dir.path().to_owned());
    config.provenance = true;
    let outcome = scan(&config, &NoProgress).await.unwrap();

    // The root was known, so one boundary query resolves the whole tree.
    for node_id in outcome.tree.iter() {
        let info = outcome.store.get(outcome.tree.node(node_id).id()).unwrap();
        assert_eq!(info.known, Some(true));
        let provenance = info.provenance.expect("whole tree inherits the root's answer");
        assert_eq!(
            provenance.origin().unwrap().as_str(),
            "https://example/origin.git"
        );
    }
}
