//! Periodic reconciliation scheduler
//!
//! Runs the late-reservation reconciler on a fixed period inside a single
//! tokio task. Passes run one after another in that task, so there is never
//! more than one pass in flight; ticks that fire during a long pass are
//! skipped. A failing or panicking pass is logged and the schedule goes on.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use super::reconciler::LateReservationReconciler;
use crate::shared::shutdown::ShutdownSignal;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between pass starts
    pub period: Duration,
    /// How long `stop` waits for an in-flight pass before aborting it
    pub stop_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(60),
            stop_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    /// The task finished within the timeout
    Graceful,
    /// The task was aborted after the timeout
    Forced,
}

/// Point-in-time copy of the scheduler counters.
///
/// The same figures are exported through `metrics` by every pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerSnapshot {
    pub passes: u64,
    pub failed_passes: u64,
    pub panicked_passes: u64,
    pub cancelled_total: usize,
    /// Start of the last pass, per the reconciler's clock
    pub last_pass_at: Option<DateTime<Utc>>,
}

struct RunningSchedule {
    stop: ShutdownSignal,
    handle: JoinHandle<()>,
}

pub struct ReconciliationScheduler {
    reconciler: Arc<LateReservationReconciler>,
    config: SchedulerConfig,
    running: Mutex<Option<RunningSchedule>>,
    stats: Arc<Mutex<SchedulerSnapshot>>,
}

impl ReconciliationScheduler {
    pub fn new(reconciler: Arc<LateReservationReconciler>, config: SchedulerConfig) -> Self {
        Self {
            reconciler,
            config,
            running: Mutex::new(None),
            stats: Arc::new(Mutex::new(SchedulerSnapshot::default())),
        }
    }

    /// Start the schedule. The first pass runs immediately. Returns `false`
    /// and does nothing if the schedule is already running.
    pub fn start(&self) -> bool {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if running.is_some() {
            info!("🅿️ Auto-cancellation scheduler is already running");
            return false;
        }

        let stop = ShutdownSignal::new();
        let handle = tokio::spawn(run_schedule(
            self.reconciler.clone(),
            self.config.period,
            stop.clone(),
            self.stats.clone(),
        ));
        *running = Some(RunningSchedule { stop, handle });

        info!(
            period_secs = self.config.period.as_secs(),
            threshold_minutes = self.reconciler.threshold_minutes(),
            "🅿️ Auto-cancellation scheduler started"
        );
        true
    }

    /// Stop future ticks and wait up to the configured timeout for the
    /// in-flight pass, aborting it after that.
    pub async fn stop(&self) -> StopOutcome {
        let schedule = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(RunningSchedule { stop, mut handle }) = schedule else {
            return StopOutcome::NotRunning;
        };

        stop.trigger();
        match tokio::time::timeout(self.config.stop_timeout, &mut handle).await {
            Ok(_) => {
                info!("🅿️ Auto-cancellation scheduler stopped");
                StopOutcome::Graceful
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.config.stop_timeout.as_secs(),
                    "🅿️ Reconciliation pass still running after timeout, aborting"
                );
                handle.abort();
                StopOutcome::Forced
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    pub fn stats(&self) -> SchedulerSnapshot {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

async fn run_schedule(
    reconciler: Arc<LateReservationReconciler>,
    period: Duration,
    stop: ShutdownSignal,
    stats: Arc<Mutex<SchedulerSnapshot>>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = stop.notified().wait() => break,
            _ = interval.tick() => {}
        }

        run_pass(&reconciler, &stop, &stats).await;
    }
}

async fn run_pass(
    reconciler: &LateReservationReconciler,
    stop: &ShutdownSignal,
    stats: &Mutex<SchedulerSnapshot>,
) {
    let started_at = reconciler.clock().now();
    let start = std::time::Instant::now();
    let result = AssertUnwindSafe(reconciler.reconcile_until(stop))
        .catch_unwind()
        .await;

    metrics::histogram!("reconciliation_pass_duration_seconds")
        .record(start.elapsed().as_secs_f64());
    metrics::counter!("reconciliation_passes_total").increment(1);

    let mut stats = stats.lock().unwrap_or_else(|e| e.into_inner());
    stats.passes += 1;
    stats.last_pass_at = Some(started_at);

    match result {
        Ok(Ok(report)) => {
            metrics::counter!("reservations_auto_cancelled_total")
                .increment(report.cancelled as u64);
            stats.cancelled_total += report.cancelled;
        }
        Ok(Err(e)) => {
            metrics::counter!("reconciliation_passes_failed_total").increment(1);
            stats.failed_passes += 1;
            error!(error = %e, "Error in auto-cancellation pass");
        }
        Err(panic) => {
            metrics::counter!("reconciliation_passes_panicked_total").increment(1);
            stats.panicked_passes += 1;
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(panic = %message, "Auto-cancellation pass panicked");
        }
    }
}
