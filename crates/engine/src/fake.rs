// Copyright 2025 Netgauge Contributors
// SPDX-License-Identifier: Apache-2.0

//! Scripted in-process transport for tests.
//!
//! Timings are expressed with tokio timers, so tests running on a paused
//! clock get exact, repeatable elapsed times.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::error::TransportError;
use crate::transport::{ByteStream, DuplexChannel, Transport};

/// Shape of a scripted download body.
#[derive(Debug, Clone)]
pub struct DownloadScript {
    chunk: Bytes,
    chunks: usize,
    interval: Duration,
    fail_after: Option<usize>,
}

impl DownloadScript {
    /// `chunks` chunks of `chunk_bytes`, the first immediately and then one
    /// per `interval`; the stream ends one `interval` after the last chunk.
    pub fn new(chunk_bytes: usize, chunks: usize, interval: Duration) -> Self {
        Self {
            chunk: Bytes::from(vec![0u8; chunk_bytes]),
            chunks,
            interval,
            fail_after: None,
        }
    }

    /// Break the stream after `chunks` chunks were delivered.
    pub fn failing_after(mut self, chunks: usize) -> Self {
        self.fail_after = Some(chunks);
        self
    }

    fn into_stream(self) -> ByteStream {
        stream::unfold((self, 0usize, false), |(script, sent, failed)| async move {
            if failed {
                return None;
            }
            if sent > 0 {
                sleep(script.interval).await;
            }
            if script.fail_after == Some(sent) {
                let err = TransportError::Stream("connection reset".to_string());
                return Some((Err(err), (script, sent, true)));
            }
            if sent >= script.chunks {
                return None;
            }
            let chunk = script.chunk.clone();
            Some((Ok(chunk), (script, sent + 1, false)))
        })
        .boxed()
    }
}

/// In-process [`Transport`] with scripted behaviour.
#[derive(Debug)]
pub struct FakeTransport {
    ip: Option<String>,
    ip_delay: Duration,
    head_delay: Duration,
    head_script: Vec<Duration>,
    heads_fail: bool,
    download: Option<DownloadScript>,
    upload_delay: Duration,
    upload_fail_every: Option<usize>,
    echo_delay: Option<Duration>,
    duplex_stalls: bool,
    heads: AtomicUsize,
    posts: AtomicUsize,
    accepted: AtomicUsize,
    closes: Arc<AtomicUsize>,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self {
            ip: Some("203.0.113.5".to_string()),
            ip_delay: Duration::ZERO,
            head_delay: Duration::from_millis(20),
            head_script: Vec::new(),
            heads_fail: false,
            download: None,
            upload_delay: Duration::from_millis(250),
            upload_fail_every: None,
            echo_delay: None,
            duplex_stalls: false,
            heads: AtomicUsize::new(0),
            posts: AtomicUsize::new(0),
            accepted: AtomicUsize::new(0),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl FakeTransport {
    /// Fake answering HEAD in 20 ms, uploads in 250 ms, with no download
    /// body and no echo endpoint.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the identity endpoint fail.
    pub fn with_failing_ip_lookup(mut self) -> Self {
        self.ip = None;
        self
    }

    /// Delay the identity response.
    pub fn with_ip_delay(mut self, delay: Duration) -> Self {
        self.ip_delay = delay;
        self
    }

    /// Answer HEAD after `delay`.
    pub fn with_head_delay(mut self, delay: Duration) -> Self {
        self.head_delay = delay;
        self
    }

    /// Answer the n-th HEAD after `delays[n]`; later ones use the fixed delay.
    pub fn with_head_delays(mut self, delays: Vec<Duration>) -> Self {
        self.head_script = delays;
        self
    }

    /// Fail every HEAD.
    pub fn with_failing_heads(mut self) -> Self {
        self.heads_fail = true;
        self
    }

    /// Serve `script` as the download body.
    pub fn with_download(mut self, script: DownloadScript) -> Self {
        self.download = Some(script);
        self
    }

    /// Accept each upload after `delay`.
    pub fn with_upload_delay(mut self, delay: Duration) -> Self {
        self.upload_delay = delay;
        self
    }

    /// Fail every `every`-th upload request.
    pub fn with_upload_failures(mut self, every: usize) -> Self {
        self.upload_fail_every = Some(every.max(1));
        self
    }

    /// Accept duplex connections that echo each message after `delay`.
    pub fn with_echo(mut self, delay: Duration) -> Self {
        self.echo_delay = Some(delay);
        self
    }

    /// Never finish opening a duplex channel.
    pub fn with_stalled_duplex(mut self) -> Self {
        self.duplex_stalls = true;
        self
    }

    /// HEAD requests issued.
    pub fn head_count(&self) -> usize {
        self.heads.load(Ordering::SeqCst)
    }

    /// Upload requests issued.
    pub fn post_count(&self) -> usize {
        self.posts.load(Ordering::SeqCst)
    }

    /// Upload requests accepted.
    pub fn accepted_posts(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Duplex channels closed.
    pub fn duplex_closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn head(&self, _url: &str) -> Result<(), TransportError> {
        let n = self.heads.fetch_add(1, Ordering::SeqCst);
        let delay = self.head_script.get(n).copied().unwrap_or(self.head_delay);
        sleep(delay).await;
        if self.heads_fail {
            return Err(TransportError::Status(503));
        }
        Ok(())
    }

    async fn get_json(&self, _url: &str) -> Result<serde_json::Value, TransportError> {
        sleep(self.ip_delay).await;
        match &self.ip {
            Some(ip) => Ok(json!({ "ip": ip })),
            None => Err(TransportError::Request("lookup refused".to_string())),
        }
    }

    async fn open_stream(&self, _url: &str) -> Result<ByteStream, TransportError> {
        match &self.download {
            Some(script) => Ok(script.clone().into_stream()),
            None => Err(TransportError::Status(404)),
        }
    }

    async fn post(&self, _url: &str, _body: Bytes) -> Result<(), TransportError> {
        let n = self.posts.fetch_add(1, Ordering::SeqCst) + 1;
        sleep(self.upload_delay).await;
        if let Some(every) = self.upload_fail_every {
            if n % every == 0 {
                return Err(TransportError::Status(502));
            }
        }
        self.accepted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn open_duplex(&self, _url: &str) -> Result<Box<dyn DuplexChannel>, TransportError> {
        if self.duplex_stalls {
            return std::future::pending().await;
        }
        match self.echo_delay {
            Some(delay) => Ok(Box::new(EchoChannel {
                pending: VecDeque::new(),
                delay,
                closes: self.closes.clone(),
            })),
            None => Err(TransportError::Duplex("connection refused".to_string())),
        }
    }
}

/// Echoes every sent message back after a fixed delay.
struct EchoChannel {
    pending: VecDeque<String>,
    delay: Duration,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl DuplexChannel for EchoChannel {
    async fn send(&mut self, message: String) -> Result<(), TransportError> {
        self.pending.push_back(message);
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        match self.pending.pop_front() {
            Some(message) => {
                sleep(self.delay).await;
                Ok(Some(message))
            }
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
