//! # Fleet Poller
//!
//! Background worker that keeps the [`ClusterStateStore`] in sync with the
//! backend fleet.
//!
//! ## Cycle
//!
//! 1. Query `/curstate.json` of every known server in parallel
//! 2. Feed the results into the store; collect servers whose tag changed
//! 3. Fetch `/initstate.json` for those servers, apply it, and go back to 1
//!    (bounded by `max_bootstrap_rounds`)
//!
//! Between cycles the worker sleeps for the configured interval or until it
//! is woken through [`PollerHandle::wake_and_wait_until_worked`].
//!
//! ## Wake contract
//!
//! Every wake request takes a ticket from a monotonically increasing counter.
//! The worker reads the counter when a cycle *starts* and publishes it when
//! the cycle ends, so a caller is released only by a cycle that began after
//! its request.

use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use super::backend::BackendClient;
use super::payload::{BootstrapReport, HealthReport};
use super::state::{ClusterStateStore, PollTarget};
use crate::common::config::PollerConfig;
use crate::common::directory::{ServerDirectory, ServerId};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PollerError {
    #[error("fleet poller has stopped")]
    Stopped,
}

/// Counters of one full poll cycle, mostly for logging and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub servers: usize,
    pub unreachable: usize,
    pub bootstrap_rounds: u32,
    pub bootstraps_fetched: usize,
    /// Bootstrap requests that brought back no initial state
    pub bootstraps_failed: usize,
}

struct WakeState {
    signal: Notify,
    requested: AtomicU64,
}

pub struct FleetPoller {
    store: Arc<ClusterStateStore>,
    directory: Arc<ServerDirectory>,
    backend: Arc<dyn BackendClient>,
    config: PollerConfig,
}

impl FleetPoller {
    pub fn new(
        store: Arc<ClusterStateStore>,
        directory: Arc<ServerDirectory>,
        backend: Arc<dyn BackendClient>,
        config: PollerConfig,
    ) -> Self {
        Self {
            store,
            directory,
            backend,
            config,
        }
    }

    /// Seed the store from the directory, then start the worker task.
    ///
    /// The store is fully seeded when this returns.
    pub async fn spawn(self) -> PollerHandle {
        let servers = self.directory.list_servers().await;
        self.store.reset_from_directory(&servers).await;
        info!(
            "🚀 Fleet poller started ({} server(s), interval {}s)",
            servers.len(),
            self.config.interval_secs
        );

        let wake = Arc::new(WakeState {
            signal: Notify::new(),
            requested: AtomicU64::new(0),
        });
        let (completed_tx, completed_rx) = watch::channel(0u64);
        let (stop_tx, stop_rx) = watch::channel(false);

        let task = tokio::spawn(self.run(wake.clone(), completed_tx, stop_rx));

        PollerHandle {
            wake,
            completed_rx,
            stop_tx,
            task: std::sync::Mutex::new(Some(task)),
        }
    }

    async fn run(
        self,
        wake: Arc<WakeState>,
        completed_tx: watch::Sender<u64>,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        loop {
            let ticket = wake.requested.load(Ordering::SeqCst);

            tokio::select! {
                biased;
                _ = stopped(&mut stop_rx) => break,
                report = self.run_cycle() => {
                    debug!("Poll cycle done: {:?}", report);
                }
            }
            completed_tx.send_replace(ticket);

            tokio::select! {
                biased;
                _ = stopped(&mut stop_rx) => break,
                _ = wake.signal.notified() => debug!("Poller woken up"),
                _ = tokio::time::sleep(self.config.interval()) => {}
            }
        }

        info!("🛑 Fleet poller stopped");
    }

    /// Run one full Polling/Bootstrapping cycle against the current store.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut targets = self.store.poll_targets().await;
        let mut report = CycleReport {
            servers: targets.len(),
            ..CycleReport::default()
        };

        let (mut needs_bootstrap, unreachable) = self.poll_health(&targets).await;
        report.unreachable = unreachable;

        while !needs_bootstrap.is_empty() {
            if report.bootstrap_rounds >= self.config.max_bootstrap_rounds {
                warn!(
                    "⚠️  Init state of {:?} still changing after {} bootstrap round(s), retrying next cycle",
                    needs_bootstrap, report.bootstrap_rounds
                );
                break;
            }
            report.bootstrap_rounds += 1;

            let pending: Vec<PollTarget> = targets
                .iter()
                .filter(|t| needs_bootstrap.contains(&t.server_id))
                .cloned()
                .collect();
            report.bootstraps_fetched += pending.len();
            report.bootstraps_failed += self.bootstrap(&pending).await;

            // health again, only the current-state fields were skipped
            targets = self.store.poll_targets().await;
            let (needs, unreachable) = self.poll_health(&targets).await;
            needs_bootstrap = needs;
            report.unreachable = unreachable;
        }

        report
    }

    /// Fetch and apply the health document of every target.
    async fn poll_health(&self, targets: &[PollTarget]) -> (Vec<ServerId>, usize) {
        let handles: Vec<(PollTarget, JoinHandle<_>)> = targets
            .iter()
            .map(|target| {
                let backend = self.backend.clone();
                let endpoint = target.endpoint.clone();
                let handle =
                    tokio::spawn(async move { backend.fetch_current_state(&endpoint).await });
                (target.clone(), handle)
            })
            .collect();

        let mut reports = Vec::with_capacity(handles.len());
        for (target, handle) in handles {
            let state = match handle.await {
                Ok(Ok(state)) => Some(state),
                Ok(Err(e)) => {
                    debug!("Health check of server {} failed: {}", target.server_id, e);
                    None
                }
                Err(e) => {
                    warn!("⚠️  Health task for server {} aborted: {}", target.server_id, e);
                    None
                }
            };
            reports.push(HealthReport {
                server_id: target.server_id,
                revision: target.revision,
                state,
            });
        }

        let unreachable = reports.iter().filter(|r| !r.responding()).count();
        (self.store.apply_health_update(reports).await, unreachable)
    }

    /// Fetch and apply the initial state of every target; returns how many
    /// of them failed.
    async fn bootstrap(&self, targets: &[PollTarget]) -> usize {
        let handles: Vec<(PollTarget, JoinHandle<_>)> = targets
            .iter()
            .map(|target| {
                let backend = self.backend.clone();
                let endpoint = target.endpoint.clone();
                let handle =
                    tokio::spawn(async move { backend.fetch_initial_state(&endpoint).await });
                (target.clone(), handle)
            })
            .collect();

        let mut failed = 0;
        for (target, handle) in handles {
            let state = match handle.await {
                Ok(Ok(state)) => Some(state),
                Ok(Err(e)) => {
                    warn!(
                        "⚠️  Could not fetch initial state of server {}: {}",
                        target.server_id, e
                    );
                    None
                }
                Err(e) => {
                    warn!(
                        "⚠️  Bootstrap task for server {} aborted: {}",
                        target.server_id, e
                    );
                    None
                }
            };
            let report = BootstrapReport {
                server_id: target.server_id,
                revision: target.revision,
                state,
            };
            if !report.initial_response_received() {
                failed += 1;
            }
            self.store.apply_bootstrap(report).await;
        }
        failed
    }
}

/// Resolves once the stop flag is raised or its sender is gone.
async fn stopped(stop_rx: &mut watch::Receiver<bool>) {
    while !*stop_rx.borrow_and_update() {
        if stop_rx.changed().await.is_err() {
            return;
        }
    }
}

/// Control side of a running [`FleetPoller`].
pub struct PollerHandle {
    wake: Arc<WakeState>,
    completed_rx: watch::Receiver<u64>,
    stop_tx: watch::Sender<bool>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl PollerHandle {
    /// Wake the worker and wait until a cycle that started after this call
    /// has finished.
    pub async fn wake_and_wait_until_worked(&self) -> Result<(), PollerError> {
        let ticket = self.wake.requested.fetch_add(1, Ordering::SeqCst) + 1;
        self.wake.signal.notify_one();

        let mut completed = self.completed_rx.clone();
        loop {
            if *completed.borrow_and_update() >= ticket {
                return Ok(());
            }
            if completed.changed().await.is_err() {
                return Err(PollerError::Stopped);
            }
        }
    }

    /// Ask the worker to stop. In-flight backend requests are not awaited.
    pub fn shutdown(&self) {
        self.stop_tx.send_replace(true);
        self.wake.signal.notify_one();
    }

    /// Wait for the worker task to exit.
    pub async fn join(&self) {
        let task = self.task.lock().ok().and_then(|mut task| task.take());
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("⚠️  Fleet poller task ended abnormally: {}", e);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        !*self.stop_tx.borrow() && self.completed_rx.has_changed().is_ok()
    }
}
