// Copyright 2025 Netgauge Contributors
// SPDX-License-Identifier: Apache-2.0

//! Core types for netgauge.
//!
//! This crate holds everything the measurement engine, the history store
//! and the presentation layer agree on:
//!
//! - [`record`] - the immutable [`ResultRecord`] emitted once per run
//! - [`state`] - the live [`RunState`] snapshot and stage machine
//! - [`units`] - Mbps arithmetic and display formatting
//! - [`config`] - layered [`EngineConfig`] loading

#![warn(missing_docs, rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod record;
pub mod state;
pub mod units;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use record::{ClientAddress, ResultRecord, RunStatus};
pub use state::{Metric, ProgressWindow, RunState, Stage};
