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

//! Step-tagged progress reporting.
//!
//! The scan phases push counters into a [`ProgressSink`]; an external
//! reporter (a terminal spinner, a log line, nothing at all) consumes them.
//! Sink calls must not block.

/// The scan phase a progress update belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Step {
    DiskScan,
    KnownDiscovery,
    Provenance,
}

/// Non-blocking observer of scan progress.
///
/// Both methods default to doing nothing, so reporters only implement what
/// they display.
pub trait ProgressSink: Send + Sync {
    /// Adds `count` processed items to `step`.
    fn increment(&self, step: Step, count: u64) {
        let _ = (step, count);
    }

    /// Reports absolute progress for `step`. `total` may be unknown, and
    /// may grow between calls.
    fn update(&self, step: Step, current: u64, total: Option<u64>) {
        let _ = (step, current, total);
    }
}

/// Sink that drops every update.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {}
