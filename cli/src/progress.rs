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

//! Single-line terminal progress reporter.

use std::io;
use std::io::IsTerminal as _;
use std::io::Write as _;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use crossterm::terminal::Clear;
use crossterm::terminal::ClearType;
use swh_scan_lib::progress::ProgressSink;
use swh_scan_lib::progress::Step;

const UPDATE_HZ: u32 = 30;
const INITIAL_DELAY: Duration = Duration::from_millis(250);

struct State {
    current: u64,
    total: Option<u64>,
    step: Option<Step>,
    next_display_time: Instant,
    drawn: bool,
}

impl State {
    fn enter_step(&mut self, step: Step) {
        if self.step != Some(step) {
            // New phase: restart the counter line.
            self.step = Some(step);
            self.current = 0;
            self.total = None;
        }
    }
}

/// Throttled `\r`-rewriting counter on stderr; inert when stderr is not a
/// terminal.
pub struct TerminalProgress {
    state: Mutex<State>,
    enabled: bool,
}

impl Default for TerminalProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalProgress {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                current: 0,
                total: None,
                step: None,
                // Don't clutter the output during fast scans.
                next_display_time: Instant::now() + INITIAL_DELAY,
                drawn: false,
            }),
            enabled: io::stderr().is_terminal(),
        }
    }

    /// Erases the progress line so results start on a clean row.
    pub fn clear(&self) {
        if !self.enabled {
            return;
        }
        let state = self.state.lock().unwrap();
        if state.drawn {
            let mut stderr = io::stderr();
            write!(stderr, "\r{}", Clear(ClearType::CurrentLine)).ok();
            stderr.flush().ok();
        }
    }

    fn label(step: Step) -> &'static str {
        match step {
            Step::DiskScan => "Hashing",
            Step::KnownDiscovery => "Querying the archive",
            Step::Provenance => "Resolving provenance",
        }
    }

    fn draw(&self) {
        if !self.enabled {
            return;
        }
        let mut state = self.state.lock().unwrap();
        let Some(step) = state.step else {
            return;
        };
        let now = Instant::now();
        if now < state.next_display_time {
            return;
        }
        state.next_display_time = now + Duration::from_secs(1) / UPDATE_HZ;
        let label = Self::label(step);
        let mut stderr = io::stderr();
        match state.total {
            Some(total) => write!(
                stderr,
                "\r{}{label}: {}/{total}",
                Clear(ClearType::CurrentLine),
                state.current
            ),
            None => write!(
                stderr,
                "\r{}{label}: {}",
                Clear(ClearType::CurrentLine),
                state.current
            ),
        }
        .ok();
        stderr.flush().ok();
        state.drawn = true;
    }
}

impl ProgressSink for TerminalProgress {
    fn increment(&self, step: Step, count: u64) {
        {
            let mut state = self.state.lock().unwrap();
            state.enter_step(step);
            state.current += count;
        }
        self.draw();
    }

    fn update(&self, step: Step, current: u64, total: Option<u64>) {
        {
            let mut state = self.state.lock().unwrap();
            state.enter_step(step);
            state.current = current;
            state.total = total;
        }
        self.draw();
    }
}
