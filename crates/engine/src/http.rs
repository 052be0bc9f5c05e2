// Copyright 2025 Netgauge Contributors
// SPDX-License-Identifier: Apache-2.0

//! Production [`Transport`] backed by reqwest and a WebSocket echo channel.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use netgauge_core::config::HttpSettings;
use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE, PRAGMA};
use reqwest::Client;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::error::TransportError;
use crate::transport::{ByteStream, DuplexChannel, Transport};

/// HTTP(S) transport with a shared connection pool.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    request_timeout: Duration,
}

impl HttpTransport {
    /// Build a transport from HTTP settings.
    ///
    /// Streamed downloads carry no overall timeout; the download estimator
    /// bounds them itself.
    pub fn new(settings: &HttpSettings) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(settings.connect_timeout())
            .user_agent(settings.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            request_timeout: settings.request_timeout(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn head(&self, url: &str) -> Result<(), TransportError> {
        self.client
            .head(url)
            .header(CACHE_CONTROL, "no-store")
            .header(PRAGMA, "no-cache")
            .timeout(self.request_timeout)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn get_json(&self, url: &str) -> Result<serde_json::Value, TransportError> {
        let value = self
            .client
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await?
            .error_for_status()?
            .json::<serde_json::Value>()
            .await?;
        Ok(value)
    }

    async fn open_stream(&self, url: &str) -> Result<ByteStream, TransportError> {
        debug!(url, "Opening download stream");
        let response = self
            .client
            .get(url)
            .header(CACHE_CONTROL, "no-store")
            .send()
            .await?
            .error_for_status()?;

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| TransportError::Stream(e.to_string())))
            .boxed())
    }

    async fn post(&self, url: &str, body: Bytes) -> Result<(), TransportError> {
        self.client
            .post(url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .timeout(self.request_timeout)
            .body(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn open_duplex(&self, url: &str) -> Result<Box<dyn DuplexChannel>, TransportError> {
        let (socket, response) = connect_async(url).await?;
        debug!(url, status = response.status().as_u16(), "Duplex channel open");
        Ok(Box::new(WebSocketChannel { socket }))
    }
}

/// Text-message channel over a WebSocket connection.
struct WebSocketChannel {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl DuplexChannel for WebSocketChannel {
    async fn send(&mut self, message: String) -> Result<(), TransportError> {
        self.socket.send(Message::Text(message)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        while let Some(message) = self.socket.next().await {
            match message? {
                Message::Text(text) => return Ok(Some(text)),
                Message::Binary(data) => {
                    return Ok(Some(String::from_utf8_lossy(&data).into_owned()))
                }
                Message::Close(_) => return Ok(None),
                // control frames are answered by tungstenite itself
                _ => continue,
            }
        }
        Ok(None)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.socket.close(None).await?;
        Ok(())
    }
}
