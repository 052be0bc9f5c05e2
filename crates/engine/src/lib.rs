// Copyright 2025 Netgauge Contributors
// SPDX-License-Identifier: Apache-2.0

//! Measurement engine for netgauge.
//!
//! Turns timed network transfers into three stable figures: round-trip
//! latency, download throughput and upload throughput.
//!
//! # Quick Start
//!
//! ```no_run
//! use netgauge_core::EngineConfig;
//! use netgauge_engine::Orchestrator;
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::load(None)?;
//! let history = Arc::new(netgauge_history::open(&config.history));
//! let orchestrator = Arc::new(Orchestrator::with_http(config, history)?);
//!
//! let mut state = orchestrator.subscribe();
//! tokio::spawn(async move {
//!     while state.changed().await.is_ok() {
//!         let snapshot = state.borrow_and_update().clone();
//!         println!("{} {:.0}%", snapshot.stage, snapshot.progress);
//!     }
//! });
//!
//! let record = orchestrator.start().await?;
//! println!("{}", record.status);
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`transport`] - The `Transport` / `DuplexChannel` substrate traits
//! - [`http`] - reqwest + WebSocket implementation of the substrate
//! - [`sampler`] - Single probes, chunk reads and block sends
//! - [`latency`] - Warm-up discard, penalty and trimmed-mean latency
//! - [`throughput`] - Bounded-duration download and upload estimators
//! - [`identity`] - Client address lookup
//! - [`progress`] - Mapping stage progress into the overall range
//! - [`orchestrator`] - Stage sequencing, cancellation and finalization

#![warn(missing_docs, rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod error;
pub mod http;
pub mod identity;
pub mod latency;
pub mod orchestrator;
pub mod progress;
pub mod sampler;
pub mod throughput;
pub mod transport;

#[cfg(test)]
mod fake;

pub use error::{EngineError, Result, SampleError, StageError, TransportError};
pub use http::HttpTransport;
pub use latency::{aggregate_latency, LatencyEstimator, LatencySummary};
pub use orchestrator::Orchestrator;
pub use progress::StageReporter;
pub use sampler::{Chunk, DuplexProbe, Sampler};
pub use throughput::{DownloadEstimator, ThroughputMeter, UploadEstimator};
pub use transport::{ByteStream, DuplexChannel, Transport};
