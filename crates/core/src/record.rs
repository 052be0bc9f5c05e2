// Copyright 2025 Netgauge Contributors
// SPDX-License-Identifier: Apache-2.0

//! Result records for completed, failed and aborted test runs.
//!
//! A [`ResultRecord`] is created exactly once per run in the orchestrator's
//! finalization step and never changes afterwards. Metrics that were not
//! measured (stage failed, stage never reached, run cancelled) stay `None`
//! rather than being reported as zero.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::units::round2;

/// Sentinel stored when the client address lookup did not succeed.
pub const UNAVAILABLE: &str = "unavailable";

/// Public address of the measuring client, or the explicit sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ClientAddress {
    /// Address reported by the identity endpoint.
    Known(String),
    /// Lookup failed or was skipped.
    Unavailable,
}

impl Default for ClientAddress {
    fn default() -> Self {
        ClientAddress::Unavailable
    }
}

impl From<String> for ClientAddress {
    fn from(s: String) -> Self {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed == UNAVAILABLE {
            ClientAddress::Unavailable
        } else {
            ClientAddress::Known(trimmed.to_string())
        }
    }
}

impl From<ClientAddress> for String {
    fn from(addr: ClientAddress) -> Self {
        match addr {
            ClientAddress::Known(ip) => ip,
            ClientAddress::Unavailable => UNAVAILABLE.to_string(),
        }
    }
}

impl fmt::Display for ClientAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientAddress::Known(ip) => write!(f, "{}", ip),
            ClientAddress::Unavailable => write!(f, "{}", UNAVAILABLE),
        }
    }
}

/// Overall status of a run, ordered by severity for the status line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "reason")]
pub enum RunStatus {
    /// No run has been started yet.
    Idle,
    /// A run is in progress.
    Running,
    /// All stages ran to completion.
    Completed,
    /// The user cancelled the run.
    Aborted,
    /// A stage-fatal failure ended the run early.
    Error(String),
}

impl Default for RunStatus {
    fn default() -> Self {
        RunStatus::Completed
    }
}

impl RunStatus {
    /// Whether this status ends a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Aborted | RunStatus::Error(_)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Idle => write!(f, "idle"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Aborted => write!(f, "aborted"),
            RunStatus::Error(reason) => write!(f, "error: {}", reason),
        }
    }
}

/// One entry of the history log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    /// Time-ordered unique identifier (UUID v7).
    pub id: Uuid,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Client address at the time of the run.
    pub client_address: ClientAddress,
    /// Representative latency in milliseconds.
    pub latency_ms: Option<f64>,
    /// Download throughput in Mbps.
    pub download_mbps: Option<f64>,
    /// Upload throughput in Mbps.
    pub upload_mbps: Option<f64>,
    /// Terminal status of the run that produced this record.
    #[serde(default)]
    pub status: RunStatus,
}

impl ResultRecord {
    /// Create a new builder.
    pub fn builder() -> ResultRecordBuilder {
        ResultRecordBuilder::default()
    }

    /// Whether every metric was measured.
    pub fn is_complete(&self) -> bool {
        self.latency_ms.is_some() && self.download_mbps.is_some() && self.upload_mbps.is_some()
    }

    /// Human-readable creation time.
    pub fn display_timestamp(&self) -> String {
        self.timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string()
    }
}

/// Builder for [`ResultRecord`] instances.
#[derive(Default)]
pub struct ResultRecordBuilder {
    id: Option<Uuid>,
    timestamp: Option<DateTime<Utc>>,
    client_address: ClientAddress,
    latency_ms: Option<f64>,
    download_mbps: Option<f64>,
    upload_mbps: Option<f64>,
    status: RunStatus,
}

impl ResultRecordBuilder {
    /// Set the record ID. If not set, a UUID v7 is generated.
    pub fn id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    /// Set the creation time. Defaults to `Utc::now()`.
    pub fn timestamp(mut self, time: DateTime<Utc>) -> Self {
        self.timestamp = Some(time);
        self
    }

    /// Set the client address.
    pub fn client_address(mut self, addr: ClientAddress) -> Self {
        self.client_address = addr;
        self
    }

    /// Set the latency, if measured.
    pub fn latency_ms(mut self, value: Option<f64>) -> Self {
        self.latency_ms = value;
        self
    }

    /// Set the download rate, if measured.
    pub fn download_mbps(mut self, value: Option<f64>) -> Self {
        self.download_mbps = value;
        self
    }

    /// Set the upload rate, if measured.
    pub fn upload_mbps(mut self, value: Option<f64>) -> Self {
        self.upload_mbps = value;
        self
    }

    /// Set the terminal status.
    pub fn status(mut self, status: RunStatus) -> Self {
        self.status = status;
        self
    }

    /// Build the [`ResultRecord`].
    ///
    /// Metrics are rounded to two decimals. Returns `Err` if a metric is
    /// negative or not finite, or if the status is not terminal.
    pub fn build(self) -> crate::Result<ResultRecord> {
        let latency_ms = checked_metric("latency_ms", self.latency_ms)?;
        let download_mbps = checked_metric("download_mbps", self.download_mbps)?;
        let upload_mbps = checked_metric("upload_mbps", self.upload_mbps)?;

        if !self.status.is_terminal() {
            return Err(crate::Error::invalid_input(format!(
                "status must be terminal, got {}",
                self.status
            )));
        }

        Ok(ResultRecord {
            id: self.id.unwrap_or_else(Uuid::now_v7),
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            client_address: self.client_address,
            latency_ms,
            download_mbps,
            upload_mbps,
            status: self.status,
        })
    }
}

fn checked_metric(name: &str, value: Option<f64>) -> crate::Result<Option<f64>> {
    match value {
        Some(v) if !v.is_finite() || v < 0.0 => Err(crate::Error::invalid_input(format!(
            "{} must be a finite, non-negative number, got {}",
            name, v
        ))),
        Some(v) => Ok(Some(round2(v))),
        None => Ok(None),
    }
}
