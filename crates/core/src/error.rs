// Copyright 2025 Netgauge Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error type shared by the netgauge core crate.

use thiserror::Error;

/// Errors raised while building records or loading configuration.
#[derive(Debug, Error)]
pub enum Error {
    /// Layered configuration could not be assembled or deserialized.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A value failed validation.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Shorthand for [`Error::InvalidInput`].
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }
}

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
