// Copyright 2025 Netgauge Contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-stage progress reporting into the shared run state.

use netgauge_core::{ProgressWindow, RunState, Stage};
use tokio::sync::watch;

/// Publishes one stage's progress, mapped into its overall window.
///
/// Updates only ever raise the overall progress, so observers see a
/// non-decreasing value across the whole run.
#[derive(Debug)]
pub struct StageReporter<'a> {
    stage: Stage,
    window: ProgressWindow,
    state: &'a watch::Sender<RunState>,
}

impl<'a> StageReporter<'a> {
    /// Reporter for `stage`, owning `window` of the overall range.
    pub fn new(stage: Stage, window: ProgressWindow, state: &'a watch::Sender<RunState>) -> Self {
        Self {
            stage,
            window,
            state,
        }
    }

    /// Mark the stage as current.
    pub fn enter(&self) {
        let stage = self.stage;
        let start = self.window.start;
        self.state.send_modify(|state| {
            state.stage = stage;
            state.live_mbps = None;
            state.advance_progress(start);
        });
    }

    /// Report internal progress, 0-100.
    pub fn progress(&self, internal: f64) {
        let overall = self.window.map(internal);
        self.state.send_if_modified(|state| state.advance_progress(overall));
    }

    /// Report internal progress together with a live throughput reading.
    pub fn live(&self, internal: f64, mbps: f64) {
        let overall = self.window.map(internal);
        self.state.send_if_modified(|state| {
            let advanced = state.advance_progress(overall);
            let changed = state.live_mbps != Some(mbps);
            state.live_mbps = Some(mbps);
            advanced || changed
        });
    }

    /// Fill the stage's window and clear the live reading.
    pub fn finish(&self) {
        let end = self.window.end;
        self.state.send_modify(|state| {
            state.advance_progress(end);
            state.live_mbps = None;
        });
    }
}
