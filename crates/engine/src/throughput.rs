// Copyright 2025 Netgauge Contributors
// SPDX-License-Identifier: Apache-2.0

//! Download and upload throughput estimation.
//!
//! Both estimators run a bounded-duration transfer loop around a
//! [`ThroughputMeter`], publishing a live rate at most once per sample
//! interval and a final rate over the total elapsed time.
//!
//! They differ in how failures escalate: a broken download stream ends the
//! whole run, while a failed upload request is logged and the loop moves on.

use bytes::Bytes;
use netgauge_core::config::{DownloadSettings, Endpoints, UploadSettings, MAX_FILL_CHUNK_BYTES};
use netgauge_core::units::mbps;
use netgauge_core::Stage;
use rand::RngCore;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{SampleError, StageError};
use crate::progress::StageReporter;
use crate::sampler::{Chunk, Sampler};

/// One live reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiveSample {
    /// Stage-internal progress, 0-100.
    pub progress: f64,
    /// Instantaneous rate over the elapsed time so far.
    pub mbps: f64,
}

/// Byte counter with a fixed test window and a sampling cadence.
#[derive(Debug, Clone)]
pub struct ThroughputMeter {
    started: Instant,
    duration: Duration,
    interval: Duration,
    last_sample: Instant,
    bytes: u64,
}

impl ThroughputMeter {
    /// Start measuring now.
    pub fn start(duration: Duration, interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            started: now,
            duration,
            interval,
            last_sample: now,
            bytes: 0,
        }
    }

    /// Count transferred bytes.
    pub fn record(&mut self, bytes: usize) {
        self.bytes = self.bytes.saturating_add(bytes as u64);
    }

    /// Bytes counted so far.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Time since the meter started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Instant the test window closes.
    pub fn deadline(&self) -> Instant {
        self.started + self.duration
    }

    /// Whether the test window has closed.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline()
    }

    /// `elapsed / duration` as a percentage, capped at 100.
    pub fn progress(&self) -> f64 {
        let total = self.duration.as_secs_f64();
        if total <= 0.0 {
            return 100.0;
        }
        (self.elapsed().as_secs_f64() / total * 100.0).min(100.0)
    }

    /// A live reading, if a full sample interval passed since the last one.
    pub fn sample(&mut self) -> Option<LiveSample> {
        let now = Instant::now();
        if now.duration_since(self.last_sample) < self.interval {
            return None;
        }
        self.last_sample = now;
        let rate = mbps(self.bytes, self.elapsed())?;
        Some(LiveSample {
            progress: self.progress(),
            mbps: rate,
        })
    }

    /// Rate over everything counted so far.
    pub fn finish(&self) -> Option<f64> {
        mbps(self.bytes, self.elapsed())
    }
}

/// Runs the download stage.
#[derive(Debug)]
pub struct DownloadEstimator<'a> {
    sampler: &'a Sampler,
    endpoints: &'a Endpoints,
    settings: &'a DownloadSettings,
}

impl<'a> DownloadEstimator<'a> {
    /// Create an estimator.
    pub fn new(
        sampler: &'a Sampler,
        endpoints: &'a Endpoints,
        settings: &'a DownloadSettings,
    ) -> Self {
        Self {
            sampler,
            endpoints,
            settings,
        }
    }

    /// Measure download throughput in Mbps.
    ///
    /// Reads one large streamed payload until it ends or the test window
    /// closes, whichever comes first. Any transport failure fails the stage.
    pub async fn run(
        &self,
        reporter: &StageReporter<'_>,
        cancel: &CancellationToken,
    ) -> Result<Option<f64>, StageError> {
        let url = self.endpoints.download_url(self.settings.payload_bytes);
        info!(stage = %Stage::Download, url = %url, "Starting download stage");

        let mut meter =
            ThroughputMeter::start(self.settings.duration(), self.settings.sample_interval());
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StageError::Cancelled),
            opened = timeout_at(meter.deadline(), self.sampler.transport().open_stream(&url)) => {
                opened
            }
        };
        let mut stream = match opened {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(StageError::failed(Stage::Download, e.to_string())),
            Err(_) => {
                return Err(StageError::failed(
                    Stage::Download,
                    "no response before the test window closed",
                ))
            }
        };

        loop {
            match Sampler::read_chunk(&mut stream, meter.deadline(), cancel).await {
                Ok(Chunk::Data(len)) => {
                    meter.record(len);
                    if let Some(live) = meter.sample() {
                        reporter.live(live.progress, live.mbps);
                    }
                }
                Ok(Chunk::End) => {
                    debug!(bytes = meter.bytes(), "Download stream ended");
                    break;
                }
                Err(SampleError::TimedOut) => {
                    debug!(bytes = meter.bytes(), "Download window closed, cancelling stream");
                    break;
                }
                Err(e) => return Err(StageError::from_sample(Stage::Download, e)),
            }
        }
        drop(stream);

        let rate = meter.finish();
        info!(
            stage = %Stage::Download,
            bytes = meter.bytes(),
            elapsed_ms = meter.elapsed().as_millis() as u64,
            mbps = ?rate,
            "Download stage complete"
        );
        reporter.finish();
        Ok(rate)
    }
}

/// Runs the upload stage.
#[derive(Debug)]
pub struct UploadEstimator<'a> {
    sampler: &'a Sampler,
    endpoints: &'a Endpoints,
    settings: &'a UploadSettings,
}

impl<'a> UploadEstimator<'a> {
    /// Create an estimator.
    pub fn new(
        sampler: &'a Sampler,
        endpoints: &'a Endpoints,
        settings: &'a UploadSettings,
    ) -> Self {
        Self {
            sampler,
            endpoints,
            settings,
        }
    }

    /// Measure upload throughput in Mbps.
    ///
    /// Sends random blocks back to back until the test window closes. A
    /// request still in flight at that point completes and counts. Failed
    /// requests are skipped after a short backoff; only cancellation ends the
    /// stage early.
    pub async fn run(
        &self,
        reporter: &StageReporter<'_>,
        cancel: &CancellationToken,
    ) -> Result<Option<f64>, StageError> {
        let url = &self.endpoints.upload;
        info!(
            stage = %Stage::Upload,
            url = %url,
            block_bytes = self.settings.block_bytes,
            "Starting upload stage"
        );

        let mut meter =
            ThroughputMeter::start(self.settings.duration(), self.settings.sample_interval());
        let mut sent = 0usize;
        let mut failed = 0usize;

        while !meter.is_expired() {
            let block = random_block(self.settings.block_bytes, self.settings.fill_chunk_bytes);
            match self.sampler.send_block(url, block, cancel).await {
                Ok(len) => {
                    sent += 1;
                    meter.record(len);
                }
                Err(SampleError::Cancelled) => return Err(StageError::Cancelled),
                Err(e) => {
                    failed += 1;
                    warn!(
                        stage = %Stage::Upload,
                        request = sent + failed,
                        error = %e,
                        "Upload request failed"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(StageError::Cancelled),
                        _ = tokio::time::sleep(self.settings.failure_backoff()) => {}
                    }
                }
            }
            if let Some(live) = meter.sample() {
                reporter.live(live.progress, live.mbps);
            }
        }

        let rate = meter.finish();
        info!(
            stage = %Stage::Upload,
            bytes = meter.bytes(),
            requests = sent,
            failures = failed,
            mbps = ?rate,
            "Upload stage complete"
        );
        reporter.finish();
        Ok(rate)
    }
}

/// A block of `len` cryptographically random bytes, filled at most
/// `fill_chunk` bytes per call to the generator.
pub fn random_block(len: usize, fill_chunk: usize) -> Bytes {
    let chunk = fill_chunk.clamp(1, MAX_FILL_CHUNK_BYTES);
    let mut buf = vec![0u8; len];
    let mut rng = rand::rng();
    for part in buf.chunks_mut(chunk) {
        rng.fill_bytes(part);
    }
    Bytes::from(buf)
}
