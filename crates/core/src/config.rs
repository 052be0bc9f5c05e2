// Copyright 2025 Netgauge Contributors
// SPDX-License-Identifier: Apache-2.0

//! Layered engine configuration.
//!
//! Values are resolved in order, later sources winning:
//!
//! 1. built-in defaults ([`EngineConfig::default`])
//! 2. an optional TOML file
//! 3. `NETGAUGE_*` environment variables, `__` separating nested keys
//!    (e.g. `NETGAUGE_LATENCY__PROBE_COUNT=20`)
//!
//! # Example
//!
//! ```no_run
//! use netgauge_core::EngineConfig;
//!
//! let config = EngineConfig::load(Some("netgauge.toml".as_ref()))?;
//! println!("{} probes", config.latency.probe_count);
//! # Ok::<(), netgauge_core::Error>(())
//! ```

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "NETGAUGE";

/// Largest buffer the randomness source fills in one call.
pub const MAX_FILL_CHUNK_BYTES: usize = 65_536;

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Third-party endpoints.
    pub endpoints: Endpoints,
    /// Latency stage tuning.
    pub latency: LatencySettings,
    /// Download stage tuning.
    pub download: DownloadSettings,
    /// Upload stage tuning.
    pub upload: UploadSettings,
    /// HTTP client settings.
    pub http: HttpSettings,
    /// History persistence.
    pub history: HistorySettings,
}

/// Public endpoints the engine talks to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    /// Identity endpoint returning `{"ip": "..."}`.
    pub ip_lookup: String,
    /// Lightweight endpoint for header-only probes.
    pub latency_probe: String,
    /// WebSocket echo endpoint for warm probes; empty disables it.
    pub duplex_echo: Option<String>,
    /// Streaming download endpoint, parametrised with `?bytes=`.
    pub download: String,
    /// Upload sink accepting binary POST bodies.
    pub upload: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            ip_lookup: "https://api.ipify.org?format=json".to_string(),
            latency_probe: "https://speed.cloudflare.com/__down?bytes=0".to_string(),
            duplex_echo: Some("wss://echo.websocket.org".to_string()),
            download: "https://speed.cloudflare.com/__down".to_string(),
            upload: "https://speed.cloudflare.com/__up".to_string(),
        }
    }
}

impl Endpoints {
    /// Duplex echo URL, if configured and non-empty.
    pub fn duplex_echo_url(&self) -> Option<&str> {
        self.duplex_echo
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    /// Download URL carrying the requested payload size.
    pub fn download_url(&self, payload_bytes: u64) -> String {
        let sep = if self.download.contains('?') { '&' } else { '?' };
        format!("{}{}bytes={}", self.download, sep, payload_bytes)
    }
}

/// Latency estimator tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencySettings {
    /// Total probes issued.
    pub probe_count: usize,
    /// Leading probes discarded.
    pub warm_up: usize,
    /// Value recorded for a failed or timed-out probe.
    pub penalty_ms: u64,
    /// Pause between probes.
    pub probe_spacing_ms: u64,
    /// Absolute trim ceiling.
    pub trim_cap_ms: f64,
    /// Trim ceiling as a multiple of the median.
    pub trim_factor: f64,
    /// Time allowed for the duplex channel to open.
    pub duplex_open_timeout_ms: u64,
    /// Time allowed for one probe round trip.
    pub probe_timeout_ms: u64,
}

impl Default for LatencySettings {
    fn default() -> Self {
        Self {
            probe_count: 100,
            warm_up: 10,
            penalty_ms: 1000,
            probe_spacing_ms: 50,
            trim_cap_ms: 300.0,
            trim_factor: 3.0,
            duplex_open_timeout_ms: 5000,
            probe_timeout_ms: 2000,
        }
    }
}

impl LatencySettings {
    /// Pause between probes.
    pub fn probe_spacing(&self) -> Duration {
        Duration::from_millis(self.probe_spacing_ms)
    }

    /// Duplex open timeout.
    pub fn duplex_open_timeout(&self) -> Duration {
        Duration::from_millis(self.duplex_open_timeout_ms)
    }

    /// Per-probe timeout.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Download estimator tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    /// Nominal payload requested from the server.
    pub payload_bytes: u64,
    /// Test duration before the stream is cut.
    pub duration_ms: u64,
    /// Minimum spacing of live reports.
    pub sample_interval_ms: u64,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            payload_bytes: 100_000_000,
            duration_ms: 10_000,
            sample_interval_ms: 200,
        }
    }
}

impl DownloadSettings {
    /// Test duration.
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    /// Live report cadence.
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

/// Upload estimator tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSettings {
    /// Bytes per upload request.
    pub block_bytes: usize,
    /// Bytes per randomness fill call.
    pub fill_chunk_bytes: usize,
    /// Test duration.
    pub duration_ms: u64,
    /// Minimum spacing of live reports.
    pub sample_interval_ms: u64,
    /// Pause after a failed request.
    pub failure_backoff_ms: u64,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            block_bytes: 1_048_576,
            fill_chunk_bytes: MAX_FILL_CHUNK_BYTES,
            duration_ms: 10_000,
            sample_interval_ms: 200,
            failure_backoff_ms: 100,
        }
    }
}

impl UploadSettings {
    /// Test duration.
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    /// Live report cadence.
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    /// Pause after a failed request.
    pub fn failure_backoff(&self) -> Duration {
        Duration::from_millis(self.failure_backoff_ms)
    }
}

/// HTTP client settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    /// TCP/TLS connect timeout.
    pub connect_timeout_ms: u64,
    /// Timeout for non-streaming requests.
    pub request_timeout_ms: u64,
    /// User-Agent header.
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            request_timeout_ms: 30_000,
            user_agent: format!("netgauge/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpSettings {
    /// Connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Where the history log lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorySettings {
    /// Directory holding the store.
    pub dir: PathBuf,
    /// Key naming the serialized log.
    pub key: String,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".netgauge"),
            key: "speedtest-history".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load defaults, then `path` (if it exists), then the environment.
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&EngineConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(
                File::from(path)
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: EngineConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the estimators cannot work with.
    pub fn validate(&self) -> crate::Result<()> {
        let latency = &self.latency;
        if latency.probe_count == 0 {
            return Err(crate::Error::invalid_input("latency.probe_count must be > 0"));
        }
        if latency.warm_up >= latency.probe_count {
            return Err(crate::Error::invalid_input(format!(
                "latency.warm_up ({}) must be less than latency.probe_count ({})",
                latency.warm_up, latency.probe_count
            )));
        }
        if latency.probe_timeout_ms == 0 {
            return Err(crate::Error::invalid_input("latency.probe_timeout_ms must be > 0"));
        }
        if !(latency.trim_cap_ms > 0.0) || !(latency.trim_factor > 0.0) {
            return Err(crate::Error::invalid_input(
                "latency.trim_cap_ms and latency.trim_factor must be positive",
            ));
        }
        if self.download.duration_ms == 0 || self.upload.duration_ms == 0 {
            return Err(crate::Error::invalid_input("test durations must be > 0"));
        }
        if self.upload.block_bytes == 0 || self.upload.fill_chunk_bytes == 0 {
            return Err(crate::Error::invalid_input(
                "upload.block_bytes and upload.fill_chunk_bytes must be > 0",
            ));
        }
        if self.upload.fill_chunk_bytes > MAX_FILL_CHUNK_BYTES {
            return Err(crate::Error::invalid_input(format!(
                "upload.fill_chunk_bytes must not exceed {}",
                MAX_FILL_CHUNK_BYTES
            )));
        }
        if self.history.key.trim().is_empty() {
            return Err(crate::Error::invalid_input("history.key must not be empty"));
        }
        Ok(())
    }
}
