// Copyright 2025 Netgauge Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error types for the measurement engine.
//!
//! Failures are layered so each boundary decides what escalates:
//!
//! - [`TransportError`] - raw request/stream/socket failures
//! - [`SampleError`] - one probe, chunk read or upload request
//! - [`StageError`] - a whole stage; only these reach the orchestrator
//! - [`EngineError`] - misuse of the orchestrator entry points

use netgauge_core::Stage;
use thiserror::Error;

/// Failures of the underlying request/response or duplex substrate.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Request could not be sent or completed.
    #[error("Request failed: {0}")]
    Request(String),

    /// Server answered with a non-success status.
    #[error("Unexpected HTTP status: {0}")]
    Status(u16),

    /// Response body stream broke mid-transfer.
    #[error("Stream error: {0}")]
    Stream(String),

    /// Duplex channel failure.
    #[error("Duplex channel error: {0}")]
    Duplex(String),

    /// Response body could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            TransportError::Status(status.as_u16())
        } else if err.is_decode() {
            TransportError::Decode(err.to_string())
        } else if err.is_body() {
            TransportError::Stream(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        TransportError::Duplex(err.to_string())
    }
}

/// Outcome of a single timed unit of work that produced no measurement.
#[derive(Debug, Error)]
pub enum SampleError {
    /// The run's cancellation token fired.
    #[error("Cancelled")]
    Cancelled,

    /// The unit of work exceeded its time bound.
    #[error("Timed out")]
    TimedOut,

    /// The transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Failure of a whole measurement stage.
#[derive(Debug, Error)]
pub enum StageError {
    /// The run was cancelled while the stage was active.
    #[error("Cancelled")]
    Cancelled,

    /// The stage hit a failure that ends the run.
    #[error("{stage}: {reason}")]
    Failed {
        /// Stage that failed.
        stage: Stage,
        /// Failure description.
        reason: String,
    },
}

impl StageError {
    /// Build a stage failure.
    pub fn failed(stage: Stage, reason: impl Into<String>) -> Self {
        StageError::Failed {
            stage,
            reason: reason.into(),
        }
    }

    /// Escalate a sample error; cancellation stays cancellation.
    pub fn from_sample(stage: Stage, err: SampleError) -> Self {
        match err {
            SampleError::Cancelled => StageError::Cancelled,
            other => StageError::failed(stage, other.to_string()),
        }
    }
}

/// Misuse of the orchestrator entry points.
#[derive(Debug, Error)]
pub enum EngineError {
    /// `start()` was called while a run is active.
    #[error("A test run is already in progress")]
    AlreadyRunning,

    /// The engine could not be constructed.
    #[error("Engine setup failed: {0}")]
    Setup(String),

    /// The result record could not be built.
    #[error("Invalid result record: {0}")]
    Record(#[from] netgauge_core::Error),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
