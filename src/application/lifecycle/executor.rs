//! State transition executor
//!
//! Moves one reservation from an expected status to a target status and,
//! for terminal targets, releases its spot, all inside one unit of work.
//! The status update is a compare-and-set on the stored status: if another
//! actor already moved the reservation, nothing is written and the outcome
//! is `applied = false`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::domain::{
    DomainError, DomainResult, ReservationStatus, ResourceStore, StatusChange, UnitOfWork,
};
use crate::shared::utills::{retry_with_backoff, RetryConfig};

/// A single requested status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRequest {
    pub reservation_id: i32,
    pub from: ReservationStatus,
    pub to: ReservationStatus,
    /// Required when `to` releases the spot
    pub spot_id: Option<i32>,
    /// Instant used for arrival/departure stamps
    pub at: DateTime<Utc>,
}

impl TransitionRequest {
    pub fn new(
        reservation_id: i32,
        from: ReservationStatus,
        to: ReservationStatus,
        spot_id: Option<i32>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            reservation_id,
            from,
            to,
            spot_id,
            at,
        }
    }

    pub fn releases_spot(&self) -> bool {
        self.to.is_terminal()
    }

    pub fn validate(&self) -> DomainResult<()> {
        if !self.from.can_transition_to(self.to) {
            return Err(DomainError::InvalidTransition {
                from: self.from.to_string(),
                to: self.to.to_string(),
            });
        }
        if self.releases_spot() && self.spot_id.is_none() {
            return Err(DomainError::MissingSpot {
                reservation_id: self.reservation_id,
                target: self.to.to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionOutcome {
    /// `false` when the reservation was no longer in the expected status
    pub applied: bool,
}

impl TransitionOutcome {
    pub fn applied() -> Self {
        Self { applied: true }
    }

    pub fn not_applied() -> Self {
        Self { applied: false }
    }
}

pub struct TransitionExecutor {
    store: Arc<dyn ResourceStore>,
    retry: RetryConfig,
}

impl TransitionExecutor {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self {
            store,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &Arc<dyn ResourceStore> {
        &self.store
    }

    /// Run the transition. Storage faults roll the unit back and are retried
    /// while transient; the last fault is returned once attempts run out.
    pub async fn transition(&self, request: TransitionRequest) -> DomainResult<TransitionOutcome> {
        request.validate()?;

        retry_with_backoff(
            &self.retry,
            || self.attempt(&request),
            DomainError::is_transient,
            "reservation_transition",
        )
        .await
    }

    async fn attempt(&self, request: &TransitionRequest) -> DomainResult<TransitionOutcome> {
        let mut uow = self.store.begin().await?;
        let change = StatusChange::to(request.to, request.at);

        let rows = match uow
            .compare_and_set_status(request.reservation_id, request.from, change)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                rollback_quietly(uow, request.reservation_id).await;
                return Err(e);
            }
        };

        if rows == 0 {
            rollback_quietly(uow, request.reservation_id).await;
            debug!(
                reservation_id = request.reservation_id,
                from = %request.from,
                to = %request.to,
                "Transition not applied, status already changed"
            );
            return Ok(TransitionOutcome::not_applied());
        }

        if let (true, Some(spot_id)) = (request.releases_spot(), request.spot_id) {
            match uow.release_spot(spot_id).await {
                Ok(0) => warn!(
                    reservation_id = request.reservation_id,
                    spot_id, "Spot not found, nothing to release"
                ),
                Ok(_) => {}
                Err(e) => {
                    rollback_quietly(uow, request.reservation_id).await;
                    return Err(e);
                }
            }
        }

        uow.commit().await?;

        debug!(
            reservation_id = request.reservation_id,
            from = %request.from,
            to = %request.to,
            spot_id = ?request.spot_id,
            "Transition applied"
        );
        Ok(TransitionOutcome::applied())
    }
}

async fn rollback_quietly(uow: Box<dyn UnitOfWork>, reservation_id: i32) {
    if let Err(e) = uow.rollback().await {
        warn!(reservation_id, error = %e, "Rollback failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NewReservation;
    use crate::infrastructure::storage::InMemoryResourceStore;
    use chrono::TimeZone;
    use std::time::Duration;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, h, m, 0).unwrap()
    }

    async fn setup() -> (InMemoryResourceStore, TransitionExecutor, i32) {
        let store = InMemoryResourceStore::new();
        store.add_spot(7).await;
        let r = store
            .open_reservation(NewReservation::preorder(1, 7, at(10, 0), at(9, 0)))
            .await
            .unwrap();
        let executor = TransitionExecutor::new(Arc::new(store.clone()))
            .with_retry(RetryConfig::single_attempt());
        (store, executor, r.id)
    }

    fn cancel(id: i32) -> TransitionRequest {
        TransitionRequest::new(
            id,
            ReservationStatus::Preorder,
            ReservationStatus::Cancelled,
            Some(7),
            at(10, 16),
        )
    }

    #[tokio::test]
    async fn cancel_releases_spot() {
        let (store, executor, id) = setup().await;

        let outcome = executor.transition(cancel(id)).await.unwrap();
        assert!(outcome.applied);

        let r = store.find_reservation(id).await.unwrap().unwrap();
        assert_eq!(r.status, ReservationStatus::Cancelled);
        assert!(!store.find_spot(7).await.unwrap().unwrap().is_occupied);
    }

    #[tokio::test]
    async fn activation_stamps_arrival_and_keeps_spot() {
        let (store, executor, id) = setup().await;

        let request = TransitionRequest::new(
            id,
            ReservationStatus::Preorder,
            ReservationStatus::Active,
            None,
            at(10, 10),
        );
        assert!(executor.transition(request).await.unwrap().applied);

        let r = store.find_reservation(id).await.unwrap().unwrap();
        assert_eq!(r.status, ReservationStatus::Active);
        assert_eq!(r.actual_arrival, Some(at(10, 10)));
        assert!(store.find_spot(7).await.unwrap().unwrap().is_occupied);
    }

    #[tokio::test]
    async fn unexpected_source_is_noop() {
        let (store, executor, id) = setup().await;
        executor.transition(cancel(id)).await.unwrap();

        let reservations_before = store.reservations().await;
        let spots_before = store.spots().await;

        let finish = TransitionRequest::new(
            id,
            ReservationStatus::Active,
            ReservationStatus::Finished,
            Some(7),
            at(12, 0),
        );
        let outcome = executor.transition(finish).await.unwrap();

        assert!(!outcome.applied);
        assert_eq!(store.reservations().await, reservations_before);
        assert_eq!(store.spots().await, spots_before);
    }

    #[tokio::test]
    async fn repeated_cancel_applies_once() {
        let (_store, executor, id) = setup().await;
        assert!(executor.transition(cancel(id)).await.unwrap().applied);
        assert!(!executor.transition(cancel(id)).await.unwrap().applied);
    }

    #[tokio::test]
    async fn rejects_invalid_edge() {
        let (_store, executor, id) = setup().await;
        let backwards = TransitionRequest::new(
            id,
            ReservationStatus::Active,
            ReservationStatus::Preorder,
            None,
            at(10, 0),
        );
        assert!(matches!(
            executor.transition(backwards).await,
            Err(DomainError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn terminal_target_requires_spot() {
        let (_store, executor, id) = setup().await;
        let mut request = cancel(id);
        request.spot_id = None;
        assert!(matches!(
            executor.transition(request).await,
            Err(DomainError::MissingSpot { reservation_id, .. }) if reservation_id == id
        ));
    }

    #[tokio::test]
    async fn release_fault_rolls_back_status() {
        let (store, executor, id) = setup().await;
        store.fail_next_release(1);

        let result = executor.transition(cancel(id)).await;
        assert!(matches!(result, Err(DomainError::Storage(_))));

        let r = store.find_reservation(id).await.unwrap().unwrap();
        assert_eq!(r.status, ReservationStatus::Preorder);
        assert!(store.find_spot(7).await.unwrap().unwrap().is_occupied);
    }

    #[tokio::test]
    async fn transient_fault_is_retried() {
        let (store, executor, id) = setup().await;
        let executor =
            executor.with_retry(RetryConfig::new(3, Duration::from_millis(1)));
        store.fail_next_release(1);
        store.fail_next_begin(1);

        assert!(executor.transition(cancel(id)).await.unwrap().applied);
        assert!(!store.find_spot(7).await.unwrap().unwrap().is_occupied);
    }

    #[tokio::test]
    async fn unavailable_store_surfaces() {
        let (store, executor, id) = setup().await;
        store.fail_next_begin(1);
        assert!(matches!(
            executor.transition(cancel(id)).await,
            Err(DomainError::StoreUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_attempts_apply_exactly_once() {
        let (store, executor, id) = setup().await;
        let executor = Arc::new(executor);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let executor = executor.clone();
                tokio::spawn(async move { executor.transition(cancel(id)).await })
            })
            .collect();

        let mut applied = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().applied {
                applied += 1;
            }
        }
        assert_eq!(applied, 1);
        assert_eq!(
            store.find_reservation(id).await.unwrap().unwrap().status,
            ReservationStatus::Cancelled
        );
    }
}
