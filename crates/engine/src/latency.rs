// Copyright 2025 Netgauge Contributors
// SPDX-License-Identifier: Apache-2.0

//! Latency estimation.
//!
//! The estimator issues a fixed number of sequential probes, discards the
//! warm-up prefix, records failed or timed-out probes as a penalty value and
//! reduces the rest to one figure with a median-relative outlier trim:
//!
//! ```text
//! threshold = min(trim_cap_ms, trim_factor * median)
//! latency   = mean(v for v in values if v <= threshold)
//! ```
//!
//! Probes go over the duplex echo channel when one could be opened, and fall
//! back to a header-only request individually whenever an exchange fails.

use netgauge_core::config::{Endpoints, LatencySettings};
use netgauge_core::Stage;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{SampleError, StageError};
use crate::progress::StageReporter;
use crate::sampler::{DuplexProbe, Sampler};

/// Summary of the retained probe values.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencySummary {
    /// Median of all recorded values.
    pub median_ms: f64,
    /// Trim ceiling applied.
    pub threshold_ms: f64,
    /// Values at or below the ceiling.
    pub retained: usize,
    /// Values discarded as outliers.
    pub discarded: usize,
    /// Mean of the retained values; `None` if nothing was retained.
    pub mean_ms: Option<f64>,
}

impl LatencySummary {
    /// Reduce recorded (post warm-up) probe values.
    ///
    /// Returns `None` for an empty input. Input order does not matter.
    pub fn from_values(values: &[f64], settings: &LatencySettings) -> Option<Self> {
        let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by(f64::total_cmp);

        let median_ms = median(&sorted);
        let threshold_ms = settings.trim_cap_ms.min(settings.trim_factor * median_ms);

        let kept: Vec<f64> = sorted.iter().copied().filter(|v| *v <= threshold_ms).collect();
        let mean_ms = if kept.is_empty() {
            None
        } else {
            Some(kept.iter().sum::<f64>() / kept.len() as f64)
        };

        Some(Self {
            median_ms,
            threshold_ms,
            retained: kept.len(),
            discarded: sorted.len() - kept.len(),
            mean_ms,
        })
    }
}

/// Median of an ascending, non-empty slice; even counts average the middle pair.
fn median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// Representative latency of recorded probe values, or `None` when
/// nothing survives trimming.
pub fn aggregate_latency(values: &[f64], settings: &LatencySettings) -> Option<f64> {
    LatencySummary::from_values(values, settings).and_then(|summary| summary.mean_ms)
}

/// Runs the latency stage.
#[derive(Debug)]
pub struct LatencyEstimator<'a> {
    sampler: &'a Sampler,
    endpoints: &'a Endpoints,
    settings: &'a LatencySettings,
}

impl<'a> LatencyEstimator<'a> {
    /// Create an estimator.
    pub fn new(
        sampler: &'a Sampler,
        endpoints: &'a Endpoints,
        settings: &'a LatencySettings,
    ) -> Self {
        Self {
            sampler,
            endpoints,
            settings,
        }
    }

    /// Measure latency in milliseconds.
    ///
    /// `Ok(None)` means no usable value survived trimming. The duplex channel,
    /// if one was opened, is closed before this returns on every path.
    pub async fn run(
        &self,
        reporter: &StageReporter<'_>,
        cancel: &CancellationToken,
    ) -> Result<Option<f64>, StageError> {
        info!(
            stage = %Stage::Latency,
            probes = self.settings.probe_count,
            warm_up = self.settings.warm_up,
            "Starting latency stage"
        );

        let mut duplex = self.open_duplex(cancel).await?;
        let collected = self.collect(&mut duplex, reporter, cancel).await;
        if let Some(probe) = duplex {
            probe.close(self.settings.probe_timeout()).await;
        }
        let values = collected?;

        let summary = LatencySummary::from_values(&values, self.settings);
        let latency = summary.as_ref().and_then(|s| s.mean_ms);
        match &summary {
            Some(s) => info!(
                stage = %Stage::Latency,
                median_ms = s.median_ms,
                threshold_ms = s.threshold_ms,
                retained = s.retained,
                discarded = s.discarded,
                latency_ms = ?latency,
                "Latency stage complete"
            ),
            None => warn!(stage = %Stage::Latency, "No latency probes recorded"),
        }
        reporter.finish();
        Ok(latency)
    }

    async fn open_duplex(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<DuplexProbe>, StageError> {
        let Some(url) = self.endpoints.duplex_echo_url() else {
            debug!("No duplex echo endpoint configured");
            return Ok(None);
        };

        match DuplexProbe::open(
            self.sampler.transport().as_ref(),
            url,
            self.settings.duplex_open_timeout(),
            cancel,
        )
        .await
        {
            Ok(probe) => {
                info!(url, "Duplex channel ready");
                Ok(Some(probe))
            }
            Err(SampleError::Cancelled) => Err(StageError::Cancelled),
            Err(e) => {
                info!(url, error = %e, "Duplex channel unavailable, using header-only probes");
                Ok(None)
            }
        }
    }

    async fn collect(
        &self,
        duplex: &mut Option<DuplexProbe>,
        reporter: &StageReporter<'_>,
        cancel: &CancellationToken,
    ) -> Result<Vec<f64>, StageError> {
        let count = self.settings.probe_count;
        let penalty = self.settings.penalty_ms as f64;
        let mut recorded = Vec::with_capacity(count.saturating_sub(self.settings.warm_up));

        for seq in 0..count {
            if seq > 0 {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(StageError::Cancelled),
                    _ = tokio::time::sleep(self.settings.probe_spacing()) => {}
                }
            }

            let value = match self.probe(seq, duplex, cancel).await {
                Ok(elapsed) => duration_ms(elapsed),
                Err(SampleError::Cancelled) => return Err(StageError::Cancelled),
                Err(e) => {
                    debug!(probe = seq, error = %e, "Probe failed, recording penalty");
                    penalty
                }
            };

            if seq >= self.settings.warm_up {
                recorded.push(value);
            }
            reporter.progress((seq + 1) as f64 * 100.0 / count as f64);
        }

        Ok(recorded)
    }

    async fn probe(
        &self,
        seq: usize,
        duplex: &mut Option<DuplexProbe>,
        cancel: &CancellationToken,
    ) -> Result<Duration, SampleError> {
        if let Some(channel) = duplex.as_mut().filter(|p| p.is_healthy()) {
            match channel.ping(seq, self.settings.probe_timeout(), cancel).await {
                Ok(rtt) => return Ok(rtt),
                Err(SampleError::Cancelled) => return Err(SampleError::Cancelled),
                Err(e) => {
                    debug!(probe = seq, error = %e, "Duplex probe failed, falling back");
                    if !channel.is_healthy() {
                        info!("Duplex channel lost, continuing with header-only probes");
                    }
                }
            }
        }
        self.sampler
            .probe_latency(&self.endpoints.latency_probe, cancel)
            .await
    }
}

fn duration_ms(elapsed: Duration) -> f64 {
    elapsed.as_nanos() as f64 / 1_000_000.0
}
