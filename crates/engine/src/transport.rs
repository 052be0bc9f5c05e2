// Copyright 2025 Netgauge Contributors
// SPDX-License-Identifier: Apache-2.0

//! The request/response and duplex substrate the engine rides on.
//!
//! The engine never talks to sockets directly. Everything goes through
//! [`Transport`], so estimators can be driven by scripted fakes in tests and
//! by [`crate::http::HttpTransport`] in production. Dropping any returned
//! future or stream aborts the underlying transfer.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::TransportError;

/// Streamed response body.
pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Host-provided network operations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue a header-only request; resolves when response headers arrive.
    async fn head(&self, url: &str) -> Result<(), TransportError>;

    /// Fetch and decode a JSON document.
    async fn get_json(&self, url: &str) -> Result<serde_json::Value, TransportError>;

    /// Start a streamed download.
    async fn open_stream(&self, url: &str) -> Result<ByteStream, TransportError>;

    /// POST a binary body; resolves when the server has accepted it.
    async fn post(&self, url: &str, body: Bytes) -> Result<(), TransportError>;

    /// Open a persistent duplex channel.
    async fn open_duplex(&self, url: &str) -> Result<Box<dyn DuplexChannel>, TransportError>;
}

/// Bidirectional text message channel.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DuplexChannel: Send {
    /// Send one text message.
    async fn send(&mut self, message: String) -> Result<(), TransportError>;

    /// Wait for the next text message. `Ok(None)` means the peer closed.
    async fn recv(&mut self) -> Result<Option<String>, TransportError>;

    /// Close the channel.
    async fn close(&mut self) -> Result<(), TransportError>;
}
