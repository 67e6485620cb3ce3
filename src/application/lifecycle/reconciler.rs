//! Late-reservation reconciler
//!
//! One pass reads the preorders that are past the grace period and cancels
//! each of them through the executor, releasing its spot. The scan is a
//! plain read, not a transaction: each cancellation re-checks that the
//! reservation is still a preorder, so one that was activated or cancelled
//! after the scan is simply skipped.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::executor::{TransitionExecutor, TransitionRequest};
use super::notifier::CancellationNotifier;
use crate::application::events::{Event, ReconciliationCompletedEvent, SharedEventBus};
use crate::domain::{DomainResult, LatePreorder, LatenessWindow, ReservationStatus};
use crate::shared::shutdown::ShutdownSignal;
use crate::shared::types::SharedClock;

pub const DEFAULT_LATE_THRESHOLD_MINUTES: i64 = 15;

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Late preorders returned by the scan
    pub scanned: usize,
    /// Reservations this pass actually cancelled
    pub cancelled: usize,
    /// Already moved out of preorder by someone else
    pub skipped: usize,
    /// Storage faults, each rolled back
    pub failed: usize,
    pub notify_failures: usize,
    /// Stopped early on request
    pub interrupted: bool,
}

pub struct LateReservationReconciler {
    executor: Arc<TransitionExecutor>,
    notifier: Arc<dyn CancellationNotifier>,
    clock: SharedClock,
    threshold_minutes: i64,
    event_bus: Option<SharedEventBus>,
}

impl LateReservationReconciler {
    pub fn new(
        executor: Arc<TransitionExecutor>,
        notifier: Arc<dyn CancellationNotifier>,
        clock: SharedClock,
    ) -> Self {
        Self {
            executor,
            notifier,
            clock,
            threshold_minutes: DEFAULT_LATE_THRESHOLD_MINUTES,
            event_bus: None,
        }
    }

    pub fn with_threshold_minutes(mut self, minutes: i64) -> Self {
        self.threshold_minutes = minutes;
        self
    }

    /// Publish a summary event after passes that cancelled something.
    pub fn with_event_bus(mut self, event_bus: SharedEventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn threshold_minutes(&self) -> i64 {
        self.threshold_minutes
    }

    /// Time source the passes run against.
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Run one full pass.
    pub async fn reconcile_once(&self) -> DomainResult<ReconcileReport> {
        self.run(None).await
    }

    /// Run one pass, checking `stop` between reservations.
    pub async fn reconcile_until(&self, stop: &ShutdownSignal) -> DomainResult<ReconcileReport> {
        self.run(Some(stop)).await
    }

    async fn run(&self, stop: Option<&ShutdownSignal>) -> DomainResult<ReconcileReport> {
        let now = self.clock.now();
        let window = LatenessWindow::new(now, self.threshold_minutes);
        let late = self.executor.store().find_late_preorders(window).await?;

        let mut report = ReconcileReport {
            scanned: late.len(),
            ..ReconcileReport::default()
        };
        debug!(candidates = late.len(), threshold = self.threshold_minutes, "Late preorder scan");

        for candidate in late {
            if stop.is_some_and(ShutdownSignal::is_triggered) {
                info!(
                    cancelled = report.cancelled,
                    remaining = report.scanned - report.cancelled - report.skipped - report.failed,
                    "Reconciliation pass interrupted"
                );
                report.interrupted = true;
                break;
            }
            self.cancel_late(&candidate, now, &mut report).await?;
        }

        if report.cancelled > 0 || report.failed > 0 {
            info!(
                scanned = report.scanned,
                cancelled = report.cancelled,
                skipped = report.skipped,
                failed = report.failed,
                "Auto-cancellation pass completed: {} preorder reservations cancelled, {} spots freed",
                report.cancelled,
                report.cancelled
            );
        }
        if report.cancelled > 0 {
            if let Some(bus) = &self.event_bus {
                bus.publish(Event::ReconciliationCompleted(ReconciliationCompletedEvent {
                    scanned: report.scanned,
                    cancelled: report.cancelled,
                    failed: report.failed,
                    timestamp: now,
                }));
            }
        }

        Ok(report)
    }

    /// Cancel one late preorder. Only an unreachable store is returned as an
    /// error; everything else stays local to this reservation.
    async fn cancel_late(
        &self,
        candidate: &LatePreorder,
        now: chrono::DateTime<Utc>,
        report: &mut ReconcileReport,
    ) -> DomainResult<()> {
        let request = TransitionRequest::new(
            candidate.reservation_id,
            ReservationStatus::Preorder,
            ReservationStatus::Cancelled,
            Some(candidate.spot_id),
            now,
        );

        match self.executor.transition(request).await {
            Ok(outcome) if outcome.applied => {
                report.cancelled += 1;
                info!(
                    reservation_id = candidate.reservation_id,
                    spot_id = candidate.spot_id,
                    minutes_late = candidate.minutes_late,
                    "Late preorder auto-cancelled"
                );
                self.notify(candidate, report).await;
            }
            Ok(_) => {
                report.skipped += 1;
                debug!(
                    reservation_id = candidate.reservation_id,
                    "Preorder already moved on, skipping"
                );
            }
            Err(e) if e.is_store_unavailable() => {
                error!(
                    reservation_id = candidate.reservation_id,
                    error = %e,
                    "Store unavailable, aborting reconciliation pass"
                );
                return Err(e);
            }
            Err(e) => {
                report.failed += 1;
                warn!(
                    reservation_id = candidate.reservation_id,
                    error = %e,
                    "Failed to cancel late preorder"
                );
            }
        }
        Ok(())
    }

    async fn notify(&self, candidate: &LatePreorder, report: &mut ReconcileReport) {
        let Some((email, name)) = candidate
            .contact
            .as_ref()
            .and_then(|c| Some((c.email.as_deref()?, c.name.as_deref()?)))
        else {
            debug!(
                reservation_id = candidate.reservation_id,
                "No email or name on file, notice skipped"
            );
            return;
        };

        if let Err(e) = self
            .notifier
            .notify_cancelled(email, name, candidate.reservation_id)
            .await
        {
            report.notify_failures += 1;
            warn!(
                reservation_id = candidate.reservation_id,
                error = %e,
                "Cancellation notice failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DomainError, NewReservation, Reservation, ResourceStore, SubscriberContact};
    use crate::infrastructure::storage::InMemoryResourceStore;
    use crate::shared::types::ManualClock;
    use crate::shared::utills::RetryConfig;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone};
    use std::sync::Mutex;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, h, m, 0).unwrap()
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(String, String, i32)>>,
        fail: bool,
    }

    impl RecordingNotifier {
        fn sent(&self) -> Vec<(String, String, i32)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CancellationNotifier for RecordingNotifier {
        async fn notify_cancelled(
            &self,
            recipient_contact: &str,
            recipient_name: &str,
            reservation_id: i32,
        ) -> DomainResult<()> {
            if self.fail {
                return Err(DomainError::Notification("smtp down".into()));
            }
            self.sent.lock().unwrap().push((
                recipient_contact.to_string(),
                recipient_name.to_string(),
                reservation_id,
            ));
            Ok(())
        }
    }

    struct Harness {
        store: InMemoryResourceStore,
        clock: ManualClock,
        notifier: Arc<RecordingNotifier>,
        executor: Arc<TransitionExecutor>,
        reconciler: LateReservationReconciler,
    }

    async fn harness_with(notifier: RecordingNotifier) -> Harness {
        let store = InMemoryResourceStore::new();
        store
            .add_subscriber(
                1,
                SubscriberContact {
                    username: "dana".into(),
                    name: Some("Dana".into()),
                    email: Some("dana@example.com".into()),
                },
            )
            .await;
        for spot in [7, 8, 9] {
            store.add_spot(spot).await;
        }

        let clock = ManualClock::new(at(9, 0));
        let notifier = Arc::new(notifier);
        let executor = Arc::new(
            TransitionExecutor::new(Arc::new(store.clone()))
                .with_retry(RetryConfig::single_attempt()),
        );
        let reconciler =
            LateReservationReconciler::new(executor.clone(), notifier.clone(), Arc::new(clock.clone()))
                .with_threshold_minutes(15);

        Harness {
            store,
            clock,
            notifier,
            executor,
            reconciler,
        }
    }

    async fn harness() -> Harness {
        harness_with(RecordingNotifier::default()).await
    }

    async fn preorder(h: &Harness, spot: i32, eta: DateTime<Utc>) -> Reservation {
        h.store
            .open_reservation(NewReservation::preorder(1, spot, eta, at(8, 0)))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn late_preorder_is_cancelled_once() {
        let h = harness().await;
        let r = preorder(&h, 7, at(10, 0)).await;

        h.clock.set(at(10, 16));
        let report = h.reconciler.reconcile_once().await.unwrap();
        assert_eq!(report.cancelled, 1);
        assert_eq!(
            h.store.find_reservation(r.id).await.unwrap().unwrap().status,
            ReservationStatus::Cancelled
        );
        assert!(!h.store.find_spot(7).await.unwrap().unwrap().is_occupied);
        assert_eq!(
            h.notifier.sent(),
            vec![("dana@example.com".to_string(), "Dana".to_string(), r.id)]
        );

        h.clock.set(at(10, 20));
        let again = h.reconciler.reconcile_once().await.unwrap();
        assert_eq!(again.cancelled, 0);
        assert_eq!(again.scanned, 0);
        assert_eq!(h.notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn within_grace_period_is_untouched() {
        let h = harness().await;
        let r = preorder(&h, 7, at(10, 0)).await;

        h.clock.set(at(10, 14));
        let report = h.reconciler.reconcile_once().await.unwrap();
        assert_eq!(report, ReconcileReport::default());
        assert_eq!(
            h.store.find_reservation(r.id).await.unwrap().unwrap().status,
            ReservationStatus::Preorder
        );
        assert!(h.store.find_spot(7).await.unwrap().unwrap().is_occupied);
    }

    #[tokio::test]
    async fn activated_before_threshold_is_left_alone() {
        let h = harness().await;
        let r = preorder(&h, 8, at(10, 0)).await;

        let activate = TransitionRequest::new(
            r.id,
            ReservationStatus::Preorder,
            ReservationStatus::Active,
            None,
            at(10, 10),
        );
        assert!(h.executor.transition(activate).await.unwrap().applied);

        h.clock.set(at(10, 16));
        let report = h.reconciler.reconcile_once().await.unwrap();
        assert_eq!(report.scanned, 0);

        let stored = h.store.find_reservation(r.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReservationStatus::Active);
        assert_eq!(stored.actual_arrival, Some(at(10, 10)));
        assert!(h.store.find_spot(8).await.unwrap().unwrap().is_occupied);
    }

    /// Store whose scan returns a stale snapshot taken before an
    /// interactive activation landed.
    struct StaleScanStore {
        inner: InMemoryResourceStore,
        snapshot: Vec<LatePreorder>,
    }

    #[async_trait]
    impl ResourceStore for StaleScanStore {
        async fn begin(&self) -> DomainResult<Box<dyn crate::domain::UnitOfWork>> {
            self.inner.begin().await
        }
        async fn find_late_preorders(&self, _: LatenessWindow) -> DomainResult<Vec<LatePreorder>> {
            Ok(self.snapshot.clone())
        }
        async fn find_reservation(&self, id: i32) -> DomainResult<Option<Reservation>> {
            self.inner.find_reservation(id).await
        }
        async fn find_spot(&self, id: i32) -> DomainResult<Option<crate::domain::Spot>> {
            self.inner.find_spot(id).await
        }
        async fn open_reservation(&self, new: NewReservation) -> DomainResult<Reservation> {
            self.inner.open_reservation(new).await
        }
    }

    #[tokio::test]
    async fn stale_scan_does_not_double_process() {
        let h = harness().await;
        let r = preorder(&h, 7, at(10, 0)).await;
        let window = LatenessWindow::new(at(10, 16), 15);
        let snapshot = h.store.find_late_preorders(window).await.unwrap();
        assert_eq!(snapshot.len(), 1);

        // subscriber arrives after the scan but before the cancel
        let activate = TransitionRequest::new(
            r.id,
            ReservationStatus::Preorder,
            ReservationStatus::Active,
            None,
            at(10, 16),
        );
        assert!(h.executor.transition(activate).await.unwrap().applied);

        let stale = Arc::new(StaleScanStore {
            inner: h.store.clone(),
            snapshot,
        });
        let executor = Arc::new(
            TransitionExecutor::new(stale).with_retry(RetryConfig::single_attempt()),
        );
        h.clock.set(at(10, 16));
        let reconciler =
            LateReservationReconciler::new(executor, h.notifier.clone(), Arc::new(h.clock.clone()));

        let report = reconciler.reconcile_once().await.unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.cancelled, 0);
        assert_eq!(report.skipped, 1);
        assert!(h.notifier.sent().is_empty());

        let stored = h.store.find_reservation(r.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReservationStatus::Active);
        assert!(h.store.find_spot(7).await.unwrap().unwrap().is_occupied);
    }

    #[tokio::test]
    async fn racing_activation_and_auto_cancel() {
        for _ in 0..20 {
            let h = harness().await;
            let id = preorder(&h, 9, at(10, 0)).await.id;
            h.clock.set(at(10, 16));

            let executor = h.executor.clone();
            let activate = tokio::spawn(async move {
                executor
                    .transition(TransitionRequest::new(
                        id,
                        ReservationStatus::Preorder,
                        ReservationStatus::Active,
                        None,
                        at(10, 16),
                    ))
                    .await
                    .unwrap()
                    .applied
            });
            let report = h.reconciler.reconcile_once().await.unwrap();
            let activated = activate.await.unwrap();

            assert_ne!(activated, report.cancelled == 1, "exactly one side must win");

            let stored = h.store.find_reservation(id).await.unwrap().unwrap();
            let spot = h.store.find_spot(9).await.unwrap().unwrap();
            if activated {
                assert_eq!(stored.status, ReservationStatus::Active);
                assert!(spot.is_occupied);
            } else {
                assert_eq!(stored.status, ReservationStatus::Cancelled);
                assert_eq!(stored.actual_arrival, None);
                assert!(!spot.is_occupied);
            }
        }
    }

    #[tokio::test]
    async fn one_failing_row_does_not_abort_batch() {
        let h = harness().await;
        let first = preorder(&h, 7, at(9, 40)).await;
        let second = preorder(&h, 8, at(9, 50)).await;
        h.store.fail_next_release(1);

        h.clock.set(at(10, 16));
        let report = h.reconciler.reconcile_once().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.cancelled, 1);

        assert_eq!(
            h.store.find_reservation(first.id).await.unwrap().unwrap().status,
            ReservationStatus::Preorder
        );
        assert!(h.store.find_spot(7).await.unwrap().unwrap().is_occupied);
        assert_eq!(
            h.store.find_reservation(second.id).await.unwrap().unwrap().status,
            ReservationStatus::Cancelled
        );

        // next pass picks the failed one up
        let retry = h.reconciler.reconcile_once().await.unwrap();
        assert_eq!(retry.cancelled, 1);
    }

    #[tokio::test]
    async fn unavailable_store_aborts_pass() {
        let h = harness().await;
        preorder(&h, 7, at(9, 40)).await;
        h.store.fail_next_begin(1);

        h.clock.set(at(10, 16));
        let result = h.reconciler.reconcile_once().await;
        assert!(matches!(result, Err(DomainError::StoreUnavailable(_))));
    }

    #[tokio::test]
    async fn failing_scan_is_hard_failure() {
        let h = harness().await;
        h.store.fail_next_scan(1);
        assert!(h.reconciler.reconcile_once().await.is_err());
    }

    #[tokio::test]
    async fn notification_failure_keeps_cancellation() {
        let h = harness_with(RecordingNotifier {
            fail: true,
            ..RecordingNotifier::default()
        })
        .await;
        let r = preorder(&h, 7, at(10, 0)).await;

        h.clock.set(at(10, 16));
        let report = h.reconciler.reconcile_once().await.unwrap();
        assert_eq!(report.cancelled, 1);
        assert_eq!(report.notify_failures, 1);
        assert_eq!(
            h.store.find_reservation(r.id).await.unwrap().unwrap().status,
            ReservationStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn missing_contact_skips_notice() {
        let h = harness().await;
        let r = h
            .store
            .open_reservation(NewReservation::preorder(2, 7, at(10, 0), at(8, 0)))
            .await
            .unwrap();

        h.clock.set(at(10, 16));
        let report = h.reconciler.reconcile_once().await.unwrap();
        assert_eq!(report.cancelled, 1);
        assert!(h.notifier.sent().is_empty());
        assert_eq!(
            h.store.find_reservation(r.id).await.unwrap().unwrap().status,
            ReservationStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn stop_signal_interrupts_between_rows() {
        let h = harness().await;
        preorder(&h, 7, at(9, 40)).await;
        preorder(&h, 8, at(9, 50)).await;

        let stop = ShutdownSignal::new();
        stop.trigger();
        h.clock.set(at(10, 16));
        let report = h.reconciler.reconcile_until(&stop).await.unwrap();
        assert!(report.interrupted);
        assert_eq!(report.cancelled, 0);
        assert_eq!(report.scanned, 2);
    }

    #[tokio::test]
    async fn publishes_summary_event() {
        let h = harness().await;
        let bus = crate::application::events::create_event_bus();
        let mut subscriber = bus.subscribe();
        let reconciler = LateReservationReconciler::new(
            h.executor.clone(),
            h.notifier.clone(),
            Arc::new(h.clock.clone()),
        )
        .with_event_bus(bus);
        preorder(&h, 7, at(10, 0)).await;

        h.clock.set(at(10, 30));
        reconciler.reconcile_once().await.unwrap();

        let message = subscriber.recv().await.unwrap();
        match message.event {
            Event::ReconciliationCompleted(done) => {
                assert_eq!(done.cancelled, 1);
                // stamped with the pass clock, not wall time
                assert_eq!(done.timestamp, at(10, 30));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
