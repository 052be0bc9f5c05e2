// Copyright 2025 Netgauge Contributors
// SPDX-License-Identifier: Apache-2.0

//! Single timed units of work.
//!
//! A [`Sampler`] issues one latency probe, reads one download chunk or sends
//! one upload block. Every operation races the run's cancellation token, so
//! cancelling drops the in-flight transport future and surfaces as
//! [`SampleError::Cancelled`], never as a failure.

use bytes::Bytes;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{SampleError, TransportError};
use crate::transport::{ByteStream, DuplexChannel, Transport};

/// Result of one chunk read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    /// Bytes received.
    Data(usize),
    /// The stream finished.
    End,
}

/// Performs timed units of work over a [`Transport`].
#[derive(Clone)]
pub struct Sampler {
    transport: Arc<dyn Transport>,
    probe_timeout: Duration,
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler")
            .field("probe_timeout", &self.probe_timeout)
            .finish_non_exhaustive()
    }
}

impl Sampler {
    /// Create a sampler; `probe_timeout` bounds each latency probe.
    pub fn new(transport: Arc<dyn Transport>, probe_timeout: Duration) -> Self {
        Self {
            transport,
            probe_timeout,
        }
    }

    /// Underlying transport.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Time a header-only request from issue to response headers.
    pub async fn probe_latency(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Duration, SampleError> {
        let started = Instant::now();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SampleError::Cancelled),
            outcome = timeout(self.probe_timeout, self.transport.head(url)) => match outcome {
                Ok(Ok(())) => Ok(started.elapsed()),
                Ok(Err(e)) => Err(e.into()),
                Err(_) => Err(SampleError::TimedOut),
            },
        }
    }

    /// Read the next chunk of `stream`.
    ///
    /// Reaching `deadline` first yields [`SampleError::TimedOut`]; the caller
    /// then drops the stream, which cancels the transfer.
    pub async fn read_chunk(
        stream: &mut ByteStream,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<Chunk, SampleError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SampleError::Cancelled),
            next = timeout_at(deadline, stream.next()) => match next {
                Ok(Some(Ok(bytes))) => Ok(Chunk::Data(bytes.len())),
                Ok(Some(Err(e))) => Err(e.into()),
                Ok(None) => Ok(Chunk::End),
                Err(_) => Err(SampleError::TimedOut),
            },
        }
    }

    /// POST one block; yields its size once the server accepted it.
    pub async fn send_block(
        &self,
        url: &str,
        block: Bytes,
        cancel: &CancellationToken,
    ) -> Result<usize, SampleError> {
        let len = block.len();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SampleError::Cancelled),
            outcome = self.transport.post(url, block) => outcome.map(|()| len).map_err(Into::into),
        }
    }
}

/// Warm-connection latency probe over a duplex echo channel.
///
/// Each probe sends `ping-<seq>` and waits for that exact message to come
/// back. Echoes of earlier, timed-out probes are skipped. After the peer
/// closes or the channel errors, the probe reports itself unhealthy and the
/// caller falls back to header-only requests.
pub struct DuplexProbe {
    channel: Box<dyn DuplexChannel>,
    healthy: bool,
}

impl std::fmt::Debug for DuplexProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplexProbe")
            .field("healthy", &self.healthy)
            .finish_non_exhaustive()
    }
}

impl DuplexProbe {
    /// Wrap an already open channel.
    pub fn new(channel: Box<dyn DuplexChannel>) -> Self {
        Self {
            channel,
            healthy: true,
        }
    }

    /// Open a channel to `url`, waiting at most `open_timeout`.
    pub async fn open(
        transport: &dyn Transport,
        url: &str,
        open_timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Self, SampleError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SampleError::Cancelled),
            opened = timeout(open_timeout, transport.open_duplex(url)) => match opened {
                Ok(Ok(channel)) => Ok(Self::new(channel)),
                Ok(Err(e)) => Err(e.into()),
                Err(_) => Err(SampleError::TimedOut),
            },
        }
    }

    /// Whether the channel can still carry probes.
    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    /// Time one echo round trip.
    pub async fn ping(
        &mut self,
        seq: usize,
        wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<Duration, SampleError> {
        let payload = format!("ping-{seq}");
        let started = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SampleError::Cancelled),
            exchanged = timeout(wait, self.exchange(&payload)) => exchanged,
        };

        match outcome {
            Ok(Ok(())) => Ok(started.elapsed()),
            Ok(Err(e)) => {
                self.healthy = false;
                Err(e.into())
            }
            Err(_) => Err(SampleError::TimedOut),
        }
    }

    async fn exchange(&mut self, payload: &str) -> Result<(), TransportError> {
        self.channel.send(payload.to_string()).await?;
        loop {
            match self.channel.recv().await? {
                Some(message) if message == payload => return Ok(()),
                Some(stale) => debug!(expected = payload, got = %stale, "Skipping stale echo"),
                None => return Err(TransportError::Duplex("closed by peer".to_string())),
            }
        }
    }

    /// Close the channel, waiting at most `wait`.
    pub async fn close(mut self, wait: Duration) {
        match timeout(wait, self.channel.close()).await {
            Ok(Ok(())) => debug!("Duplex channel closed"),
            Ok(Err(e)) => debug!(error = %e, "Duplex channel close failed"),
            Err(_) => debug!("Duplex channel close timed out"),
        }
    }
}
