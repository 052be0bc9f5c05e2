// Copyright 2025 Netgauge Contributors
// SPDX-License-Identifier: Apache-2.0

//! Live run state observed by the presentation layer.
//!
//! The orchestrator owns the only mutable [`RunState`]; everything else sees
//! cloned snapshots. Stages advance strictly in order:
//!
//! ```text
//! idle -> latency -> download -> upload -> done
//!            \__________\___________\____-> aborted
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::record::{ClientAddress, RunStatus};
use crate::units::{format_latency, format_speed};

/// Stage of a test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Nothing has run yet.
    Idle,
    /// Measuring round-trip latency.
    Latency,
    /// Measuring download throughput.
    Download,
    /// Measuring upload throughput.
    Upload,
    /// Run finished (successfully or with a stage error).
    Done,
    /// Run was cancelled.
    Aborted,
}

impl Default for Stage {
    fn default() -> Self {
        Stage::Idle
    }
}

impl Stage {
    /// Whether a new run may start from this stage.
    pub fn can_start(&self) -> bool {
        matches!(self, Stage::Idle | Stage::Done | Stage::Aborted)
    }

    /// Get display label.
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Idle => "Ready",
            Stage::Latency => "Testing Latency",
            Stage::Download => "Testing Download",
            Stage::Upload => "Testing Upload",
            Stage::Done => "Complete",
            Stage::Aborted => "Aborted",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::Latency => "latency",
            Stage::Download => "download",
            Stage::Upload => "upload",
            Stage::Done => "done",
            Stage::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Linear mapping of a stage's internal 0-100 progress into the overall range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressWindow {
    /// Overall percentage at internal 0%.
    pub start: f64,
    /// Overall percentage at internal 100%.
    pub end: f64,
}

impl ProgressWindow {
    /// Latency stage slice.
    pub const LATENCY: ProgressWindow = ProgressWindow::new(0.0, 10.0);
    /// Download stage slice.
    pub const DOWNLOAD: ProgressWindow = ProgressWindow::new(10.0, 60.0);
    /// Upload stage slice.
    pub const UPLOAD: ProgressWindow = ProgressWindow::new(60.0, 100.0);

    /// Create a window.
    pub const fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    /// Map internal progress (clamped to 0-100) into this window.
    pub fn map(&self, internal: f64) -> f64 {
        let internal = if internal.is_nan() {
            0.0
        } else {
            internal.clamp(0.0, 100.0)
        };
        self.start + (self.end - self.start) * internal / 100.0
    }
}

/// Displayable state of one metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum Metric {
    /// Not measured yet in this run.
    Pending,
    /// Measured value.
    Value(f64),
    /// Stage ran but produced no usable value.
    Unavailable,
    /// Stage failed.
    Error,
}

impl Default for Metric {
    fn default() -> Self {
        Metric::Pending
    }
}

impl Metric {
    /// Metric for a stage that finished, measured or not.
    pub fn from_measurement(value: Option<f64>) -> Self {
        value.map(Metric::Value).unwrap_or(Metric::Unavailable)
    }

    /// Render as latency.
    pub fn display_latency(&self) -> String {
        match self {
            Metric::Value(v) => format_latency(*v),
            other => other.to_string(),
        }
    }

    /// Render as throughput.
    pub fn display_speed(&self) -> String {
        match self {
            Metric::Value(v) => format_speed(*v),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Pending => write!(f, "-"),
            Metric::Value(v) => write!(f, "{:.2}", v),
            Metric::Unavailable => write!(f, "unavailable"),
            Metric::Error => write!(f, "error"),
        }
    }
}

/// Snapshot of the active (or last) run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    /// Current stage.
    pub stage: Stage,
    /// Status line.
    pub status: RunStatus,
    /// Overall progress, 0-100, non-decreasing within a run.
    pub progress: f64,
    /// Instantaneous throughput of the running transfer stage.
    pub live_mbps: Option<f64>,
    /// Client address, once resolved.
    pub client_address: Option<ClientAddress>,
    /// Latency result.
    pub latency: Metric,
    /// Download result.
    pub download: Metric,
    /// Upload result.
    pub upload: Metric,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            stage: Stage::Idle,
            status: RunStatus::Idle,
            progress: 0.0,
            live_mbps: None,
            client_address: None,
            latency: Metric::Pending,
            download: Metric::Pending,
            upload: Metric::Pending,
        }
    }
}

impl RunState {
    /// Fresh state for a run that is starting now.
    pub fn starting() -> Self {
        Self {
            status: RunStatus::Running,
            ..Self::default()
        }
    }

    /// Raise progress to `overall`; lower values are ignored.
    ///
    /// Returns whether the value changed.
    pub fn advance_progress(&mut self, overall: f64) -> bool {
        let overall = overall.clamp(0.0, 100.0);
        if overall > self.progress {
            self.progress = overall;
            true
        } else {
            false
        }
    }
}
