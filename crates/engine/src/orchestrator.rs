// Copyright 2025 Netgauge Contributors
// SPDX-License-Identifier: Apache-2.0

//! Test run orchestration.
//!
//! The [`Orchestrator`] owns the live [`RunState`] and runs one test at a
//! time:
//!
//! 1. reset the published state
//! 2. resolve the client address (best effort)
//! 3. latency over progress `[0, 10]`
//! 4. download over `[10, 60]`
//! 5. upload over `[60, 100]`
//! 6. build the result record and append it to the history log
//!
//! Step 6 runs exactly once per accepted [`Orchestrator::start`] call,
//! whether the run completed, failed in a stage or was cancelled.
//!
//! # Example
//!
//! ```no_run
//! use netgauge_core::EngineConfig;
//! use netgauge_engine::Orchestrator;
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::default();
//! let history = Arc::new(netgauge_history::open(&config.history));
//! let orchestrator = Orchestrator::with_http(config, history)?;
//!
//! let record = orchestrator.start().await?;
//! println!("{:?} Mbps down", record.download_mbps);
//! # Ok(())
//! # }
//! ```

use netgauge_core::{
    ClientAddress, EngineConfig, Metric, ProgressWindow, ResultRecord, RunState, RunStatus, Stage,
};
use netgauge_history::HistoryLog;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result, StageError};
use crate::http::HttpTransport;
use crate::identity::resolve_client_address;
use crate::latency::LatencyEstimator;
use crate::progress::StageReporter;
use crate::sampler::Sampler;
use crate::throughput::{DownloadEstimator, UploadEstimator};
use crate::transport::Transport;

/// Values measured so far in the active run.
#[derive(Debug, Default)]
struct Measured {
    client_address: ClientAddress,
    latency_ms: Option<f64>,
    download_mbps: Option<f64>,
    upload_mbps: Option<f64>,
}

/// Marks a run as active; releases the slot when dropped.
///
/// A run dropped before it was finalized leaves the published state
/// aborted, so a later start is not refused.
struct ActiveRun<'a> {
    slot: &'a Mutex<Option<CancellationToken>>,
    state: &'a watch::Sender<RunState>,
    token: CancellationToken,
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        self.state.send_if_modified(|state| {
            if state.stage.can_start() && state.status.is_terminal() {
                return false;
            }
            state.stage = Stage::Aborted;
            state.status = RunStatus::Aborted;
            state.live_mbps = None;
            true
        });
        lock(self.slot).take();
    }
}

fn lock(slot: &Mutex<Option<CancellationToken>>) -> MutexGuard<'_, Option<CancellationToken>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Sequences the measurement stages of a test run.
pub struct Orchestrator {
    config: EngineConfig,
    sampler: Sampler,
    history: Arc<HistoryLog>,
    state: watch::Sender<RunState>,
    active: Mutex<Option<CancellationToken>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("stage", &self.state.borrow().stage)
            .field("running", &self.is_running())
            .field("history", &self.history)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Create an orchestrator over `transport`.
    pub fn new(
        config: EngineConfig,
        transport: Arc<dyn Transport>,
        history: Arc<HistoryLog>,
    ) -> Self {
        let sampler = Sampler::new(transport, config.latency.probe_timeout());
        let (state, _) = watch::channel(RunState::default());
        Self {
            config,
            sampler,
            history,
            state,
            active: Mutex::new(None),
        }
    }

    /// Create an orchestrator over the HTTP/WebSocket transport.
    pub fn with_http(config: EngineConfig, history: Arc<HistoryLog>) -> Result<Self> {
        let transport =
            HttpTransport::new(&config.http).map_err(|e| EngineError::Setup(e.to_string()))?;
        Ok(Self::new(config, Arc::new(transport), history))
    }

    /// Effective configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The history log runs are appended to.
    pub fn history(&self) -> &Arc<HistoryLog> {
        &self.history
    }

    /// Receiver of run state snapshots.
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    /// Current run state.
    pub fn state(&self) -> RunState {
        self.state.borrow().clone()
    }

    /// Whether a run is active.
    pub fn is_running(&self) -> bool {
        lock(&self.active).is_some()
    }

    /// Cancel the active run, if any. Returns whether a run was signalled.
    pub fn cancel(&self) -> bool {
        match lock(&self.active).as_ref() {
            Some(token) => {
                info!("Cancelling test run");
                token.cancel();
                true
            }
            None => {
                debug!("Cancel requested with no active run");
                false
            }
        }
    }

    /// Run a full test and return its record.
    ///
    /// Fails with [`EngineError::AlreadyRunning`] if a run is active; that
    /// call does not touch the active run or the history log. Stage failures
    /// and cancellation are not errors here: they are reflected in the
    /// record's status and in the published state.
    pub async fn start(&self) -> Result<ResultRecord> {
        let run = self.claim()?;
        let cancel = run.token.clone();

        info!("Starting test run");
        self.state.send_replace(RunState::starting());

        let mut measured = Measured::default();
        let outcome = self.measure(&mut measured, &cancel).await;
        self.finalize(run, measured, outcome).await
    }

    fn claim(&self) -> Result<ActiveRun<'_>> {
        let mut slot = lock(&self.active);
        if slot.is_some() || !self.state.borrow().stage.can_start() {
            warn!("Rejected start: a test run is already in progress");
            return Err(EngineError::AlreadyRunning);
        }
        let token = CancellationToken::new();
        *slot = Some(token.clone());
        Ok(ActiveRun {
            slot: &self.active,
            state: &self.state,
            token,
        })
    }

    async fn measure(
        &self,
        measured: &mut Measured,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), StageError> {
        let endpoints = &self.config.endpoints;

        // only cancellation escapes the lookup
        let address =
            resolve_client_address(self.sampler.transport().as_ref(), &endpoints.ip_lookup, cancel)
                .await
                .map_err(|_| StageError::Cancelled)?;
        measured.client_address = address.clone();
        self.state.send_modify(|state| state.client_address = Some(address));

        let reporter = StageReporter::new(Stage::Latency, ProgressWindow::LATENCY, &self.state);
        reporter.enter();
        let latency = LatencyEstimator::new(&self.sampler, endpoints, &self.config.latency)
            .run(&reporter, cancel)
            .await?;
        measured.latency_ms = latency;
        self.state.send_modify(|state| state.latency = Metric::from_measurement(latency));

        let reporter = StageReporter::new(Stage::Download, ProgressWindow::DOWNLOAD, &self.state);
        reporter.enter();
        let download = DownloadEstimator::new(&self.sampler, endpoints, &self.config.download)
            .run(&reporter, cancel)
            .await?;
        measured.download_mbps = download;
        self.state.send_modify(|state| state.download = Metric::from_measurement(download));

        let reporter = StageReporter::new(Stage::Upload, ProgressWindow::UPLOAD, &self.state);
        reporter.enter();
        let upload = UploadEstimator::new(&self.sampler, endpoints, &self.config.upload)
            .run(&reporter, cancel)
            .await?;
        measured.upload_mbps = upload;
        self.state.send_modify(|state| state.upload = Metric::from_measurement(upload));

        Ok(())
    }

    async fn finalize(
        &self,
        run: ActiveRun<'_>,
        measured: Measured,
        outcome: std::result::Result<(), StageError>,
    ) -> Result<ResultRecord> {
        let (stage, status, failed) = match outcome {
            Ok(()) => (Stage::Done, RunStatus::Completed, None),
            Err(StageError::Cancelled) => (Stage::Aborted, RunStatus::Aborted, None),
            Err(StageError::Failed { stage, reason }) => {
                warn!(stage = %stage, reason = %reason, "Test run failed");
                (Stage::Done, RunStatus::Error(format!("{stage}: {reason}")), Some(stage))
            }
        };

        let record = ResultRecord::builder()
            .client_address(measured.client_address.clone())
            .latency_ms(reportable(measured.latency_ms))
            .download_mbps(reportable(measured.download_mbps))
            .upload_mbps(reportable(measured.upload_mbps))
            .status(status.clone())
            .build()?;

        self.persist(record.clone()).await;

        self.state.send_modify(|state| {
            state.stage = stage;
            state.status = status.clone();
            state.live_mbps = None;
            state.client_address = Some(measured.client_address);
            state.advance_progress(100.0);
            settle(&mut state.latency, failed == Some(Stage::Latency));
            settle(&mut state.download, failed == Some(Stage::Download));
            settle(&mut state.upload, failed == Some(Stage::Upload));
        });
        drop(run);

        info!(
            id = %record.id,
            status = %status,
            latency_ms = ?record.latency_ms,
            download_mbps = ?record.download_mbps,
            upload_mbps = ?record.upload_mbps,
            "Test run finished"
        );
        Ok(record)
    }

    /// Append `record` to the history log off the async workers.
    async fn persist(&self, record: ResultRecord) {
        let history = self.history.clone();
        match tokio::task::spawn_blocking(move || history.append(record)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(
                error = %e,
                location = %self.history.location(),
                "Failed to persist history"
            ),
            Err(e) => warn!(error = %e, "History persist task did not complete"),
        }
    }
}

fn reportable(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v >= 0.0)
}

/// Resolve a metric once the run is over.
fn settle(metric: &mut Metric, failed: bool) {
    if failed {
        *metric = Metric::Error;
    } else if matches!(metric, Metric::Pending) {
        *metric = Metric::Unavailable;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{DownloadScript, FakeTransport};
    use netgauge_history::{MemoryBackend, StorageBackend};
    use std::time::Duration;

    const KEY: &str = "history";

    fn quick_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.latency.probe_count = 20;
        config.latency.warm_up = 2;
        config.endpoints.duplex_echo = None;
        config
    }

    fn full_transport() -> FakeTransport {
        FakeTransport::new().with_download(DownloadScript::new(
            1_250_000,
            100,
            Duration::from_millis(100),
        ))
    }

    fn orchestrator_with(
        transport: FakeTransport,
        backend: Arc<dyn StorageBackend>,
    ) -> Arc<Orchestrator> {
        let history = Arc::new(HistoryLog::load(backend, KEY));
        Arc::new(Orchestrator::new(quick_config(), Arc::new(transport), history))
    }

    fn orchestrator(transport: FakeTransport) -> Arc<Orchestrator> {
        orchestrator_with(transport, Arc::new(MemoryBackend::new()))
    }

    /// Memory backend remembering which thread performed each write.
    #[derive(Default)]
    struct WriterThreads {
        inner: MemoryBackend,
        writers: Mutex<Vec<std::thread::ThreadId>>,
    }

    impl StorageBackend for WriterThreads {
        fn read(&self, key: &str) -> std::io::Result<Option<String>> {
            self.inner.read(key)
        }

        fn write(&self, key: &str, value: &str) -> std::io::Result<()> {
            self.writers.lock().unwrap().push(std::thread::current().id());
            self.inner.write(key, value)
        }

        fn location(&self, key: &str) -> String {
            self.inner.location(key)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_run() {
        let orchestrator = orchestrator(full_transport());

        let record = orchestrator.start().await.unwrap();

        assert_eq!(record.status, RunStatus::Completed);
        assert_eq!(record.client_address, ClientAddress::Known("203.0.113.5".to_string()));
        assert_eq!(record.latency_ms, Some(20.0));
        assert_eq!(record.download_mbps, Some(95.37));
        assert_eq!(record.upload_mbps, Some(32.0));
        assert!(record.is_complete());

        assert_eq!(orchestrator.history().len(), 1);
        assert_eq!(orchestrator.history().snapshot()[0], record);

        let state = orchestrator.state();
        assert_eq!(state.stage, Stage::Done);
        assert_eq!(state.progress, 100.0);
        assert_eq!(state.download, Metric::Value(95.367431640625));
        assert!(!orchestrator.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_download_keeps_latency() {
        let orchestrator = orchestrator(full_transport());
        let mut rx = orchestrator.subscribe();

        let run = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move { orchestrator.start().await }
        });
        rx.wait_for(|state| state.stage == Stage::Download).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(orchestrator.cancel());

        let record = run.await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Aborted);
        assert!(record.latency_ms.is_some());
        assert_eq!(record.download_mbps, None);
        assert_eq!(record.upload_mbps, None);
        assert_eq!(orchestrator.history().len(), 1);

        let state = orchestrator.state();
        assert_eq!(state.stage, Stage::Aborted);
        assert_eq!(state.progress, 100.0);
        assert_eq!(state.download, Metric::Unavailable);
        assert_eq!(state.upload, Metric::Unavailable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_failure_ends_run_with_record() {
        // no download body: the stream request answers 404
        let orchestrator = orchestrator(FakeTransport::new());

        let record = orchestrator.start().await.unwrap();

        assert!(
            matches!(&record.status, RunStatus::Error(reason) if reason.starts_with("download:"))
        );
        assert!(record.status.to_string().starts_with("error: download:"));
        assert!(record.latency_ms.is_some());
        assert_eq!(record.download_mbps, None);
        assert_eq!(record.upload_mbps, None);
        assert_eq!(orchestrator.history().len(), 1);

        let state = orchestrator.state();
        assert_eq!(state.stage, Stage::Done);
        assert_eq!(state.progress, 100.0);
        assert_eq!(state.download, Metric::Error);
        assert_eq!(state.upload, Metric::Unavailable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_is_rejected() {
        let orchestrator = orchestrator(full_transport());
        let mut rx = orchestrator.subscribe();

        let run = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move { orchestrator.start().await }
        });
        rx.wait_for(|state| state.stage == Stage::Latency).await.unwrap();

        assert!(orchestrator.is_running());
        assert!(matches!(orchestrator.start().await, Err(EngineError::AlreadyRunning)));

        orchestrator.cancel();
        let record = run.await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Aborted);
        assert_eq!(orchestrator.history().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_is_monotonic_and_ends_at_100() {
        let orchestrator = orchestrator(full_transport());
        let mut rx = orchestrator.subscribe();

        let observer = tokio::spawn(async move {
            let mut seen = Vec::new();
            while rx.changed().await.is_ok() {
                let state = rx.borrow_and_update().clone();
                seen.push(state.progress);
                if matches!(state.stage, Stage::Done | Stage::Aborted) {
                    break;
                }
            }
            seen
        });

        orchestrator.start().await.unwrap();
        let seen = observer.await.unwrap();

        assert!(seen.len() > 3);
        assert!(seen.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(seen.last().copied(), Some(100.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_run_appends_exactly_one_record() {
        let orchestrator = orchestrator(FakeTransport::new());

        for expected in 1..=3 {
            orchestrator.start().await.unwrap();
            assert_eq!(orchestrator.history().len(), expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_failure_is_not_fatal() {
        let orchestrator = orchestrator(full_transport().with_failing_ip_lookup());

        let record = orchestrator.start().await.unwrap();

        assert_eq!(record.status, RunStatus::Completed);
        assert_eq!(record.client_address, ClientAddress::Unavailable);
        assert_eq!(orchestrator.state().client_address, Some(ClientAddress::Unavailable));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_lookup_records_nothing_measured() {
        let orchestrator = orchestrator(full_transport().with_ip_delay(Duration::from_secs(5)));

        let run = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move { orchestrator.start().await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(orchestrator.cancel());

        let record = run.await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Aborted);
        assert_eq!(record.latency_ms, None);
        assert_eq!(record.download_mbps, None);
        assert_eq!(record.upload_mbps, None);
        assert_eq!(orchestrator.history().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persist_failure_still_returns_record() {
        let orchestrator = orchestrator_with(full_transport(), Arc::new(MemoryBackend::failing()));

        let record = orchestrator.start().await.unwrap();

        assert_eq!(record.status, RunStatus::Completed);
        assert_eq!(orchestrator.history().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_is_written_off_the_runtime_thread() {
        let backend = Arc::new(WriterThreads::default());
        let orchestrator = orchestrator_with(FakeTransport::new(), backend.clone());

        orchestrator.start().await.unwrap();

        let writers = backend.writers.lock().unwrap();
        assert_eq!(writers.len(), 1);
        assert_ne!(writers[0], std::thread::current().id());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_run_leaves_state_aborted() {
        let orchestrator = orchestrator(full_transport());

        let dropped = tokio::time::timeout(Duration::from_millis(500), orchestrator.start()).await;
        assert!(dropped.is_err());

        let state = orchestrator.state();
        assert_eq!(state.stage, Stage::Aborted);
        assert_eq!(state.status, RunStatus::Aborted);
        assert!(!orchestrator.is_running());
        assert!(orchestrator.history().is_empty());

        let record = orchestrator.start().await.unwrap();
        assert_eq!(record.status, RunStatus::Completed);
        assert_eq!(orchestrator.history().len(), 1);
    }

    #[tokio::test]
    async fn test_start_refused_while_a_stage_is_published() {
        let orchestrator = orchestrator(FakeTransport::new());
        orchestrator.state.send_modify(|state| state.stage = Stage::Upload);

        assert!(matches!(orchestrator.start().await, Err(EngineError::AlreadyRunning)));
        assert!(orchestrator.history().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_when_idle_is_noop() {
        let orchestrator = orchestrator(FakeTransport::new());
        assert!(!orchestrator.cancel());
        assert_eq!(orchestrator.state().stage, Stage::Idle);
        assert!(orchestrator.history().is_empty());
    }

    #[test]
    fn test_settle_metrics() {
        let mut pending = Metric::Pending;
        settle(&mut pending, false);
        assert_eq!(pending, Metric::Unavailable);

        let mut measured = Metric::Value(12.5);
        settle(&mut measured, false);
        assert_eq!(measured, Metric::Value(12.5));

        let mut failed = Metric::Pending;
        settle(&mut failed, true);
        assert_eq!(failed, Metric::Error);
    }
}
