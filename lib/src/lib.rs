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

//! Scan a source-code working copy against a content-addressed software
//! archive.
//!
//! The library hashes every file and directory below a scan root into
//! typed SWHID-style identifiers, asks the archive which of them it
//! already holds, and optionally resolves where the known ones came from.
//! See [`scan::scan`] for the all-in-one entry point, or compose the
//! phases ([`tree::ingest`], [`discovery::discover_known`],
//! [`provenance::resolve_provenance`]) around your own
//! [`client::KnownSource`] implementation.

pub mod client;
pub mod discovery;
pub mod exclude;
pub mod file_util;
pub mod progress;
pub mod provenance;
pub mod report;
pub mod scan;
pub mod store;
pub mod swhid;
pub mod tree;
pub mod vcs;
