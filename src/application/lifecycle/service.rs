//! Interactive lifecycle operations
//!
//! Entry points for the request dispatcher: arrival, departure and manual
//! cancellation. Each one is a fixed transition run through the executor.

use std::sync::Arc;

use tracing::info;

use super::executor::{TransitionExecutor, TransitionOutcome, TransitionRequest};
use crate::domain::{DomainResult, Reservation, ReservationStatus, Spot};
use crate::shared::types::SharedClock;

/// Status a manual cancellation expects the reservation to be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelFrom {
    Preorder,
    Active,
}

impl From<CancelFrom> for ReservationStatus {
    fn from(value: CancelFrom) -> Self {
        match value {
            CancelFrom::Preorder => ReservationStatus::Preorder,
            CancelFrom::Active => ReservationStatus::Active,
        }
    }
}

pub struct ReservationLifecycleService {
    executor: Arc<TransitionExecutor>,
    clock: SharedClock,
}

impl ReservationLifecycleService {
    pub fn new(executor: Arc<TransitionExecutor>, clock: SharedClock) -> Self {
        Self { executor, clock }
    }

    /// Subscriber arrived: `preorder -> active`, stamps arrival time.
    /// Loses to a concurrent auto-cancel that committed first.
    pub async fn activate(&self, reservation_id: i32) -> DomainResult<TransitionOutcome> {
        let outcome = self
            .executor
            .transition(TransitionRequest::new(
                reservation_id,
                ReservationStatus::Preorder,
                ReservationStatus::Active,
                None,
                self.clock.now(),
            ))
            .await?;

        if outcome.applied {
            info!(reservation_id, "Reservation activated (preorder → active)");
        }
        Ok(outcome)
    }

    /// Subscriber left: `active -> finished`, stamps departure, frees the spot.
    pub async fn finish(&self, reservation_id: i32, spot_id: i32) -> DomainResult<TransitionOutcome> {
        let outcome = self
            .executor
            .transition(TransitionRequest::new(
                reservation_id,
                ReservationStatus::Active,
                ReservationStatus::Finished,
                Some(spot_id),
                self.clock.now(),
            ))
            .await?;

        if outcome.applied {
            info!(reservation_id, spot_id, "Reservation finished and spot freed");
        }
        Ok(outcome)
    }

    /// Manual cancellation. Frees the spot; sends no notice, the caller
    /// answers the subscriber directly.
    pub async fn cancel(
        &self,
        reservation_id: i32,
        from: CancelFrom,
        spot_id: i32,
    ) -> DomainResult<TransitionOutcome> {
        let outcome = self
            .executor
            .transition(TransitionRequest::new(
                reservation_id,
                from.into(),
                ReservationStatus::Cancelled,
                Some(spot_id),
                self.clock.now(),
            ))
            .await?;

        if outcome.applied {
            info!(reservation_id, spot_id, ?from, "Reservation cancelled manually");
        }
        Ok(outcome)
    }

    pub async fn reservation(&self, reservation_id: i32) -> DomainResult<Option<Reservation>> {
        self.executor.store().find_reservation(reservation_id).await
    }

    pub async fn spot(&self, spot_id: i32) -> DomainResult<Option<Spot>> {
        self.executor.store().find_spot(spot_id).await
    }
}
