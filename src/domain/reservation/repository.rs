//! Resource store interface
//!
//! The store owns reservations and spots. Every status change goes through
//! a [`UnitOfWork`], which commits or rolls back as a whole.

use async_trait::async_trait;

use super::model::{
    LatePreorder, LatenessWindow, NewReservation, Reservation, ReservationStatus, Spot,
    StatusChange,
};
use crate::domain::DomainResult;

/// One atomic unit of work against the store.
///
/// Dropping a unit without calling [`UnitOfWork::commit`] rolls it back.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Set the status of reservation `id` to `change.target` only if the
    /// stored status is still `expected`. Returns rows affected (0 or 1).
    async fn compare_and_set_status(
        &mut self,
        id: i32,
        expected: ReservationStatus,
        change: StatusChange,
    ) -> DomainResult<u64>;

    /// Clear the occupied flag of a spot. Returns rows affected.
    async fn release_spot(&mut self, spot_id: i32) -> DomainResult<u64>;

    async fn commit(self: Box<Self>) -> DomainResult<()>;

    async fn rollback(self: Box<Self>) -> DomainResult<()>;
}

#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Open a unit of work. Failing here means the store is unreachable
    /// (`DomainError::StoreUnavailable`).
    async fn begin(&self) -> DomainResult<Box<dyn UnitOfWork>>;

    /// Preorders with a spot whose estimated arrival is late per `window`,
    /// oldest first.
    async fn find_late_preorders(&self, window: LatenessWindow) -> DomainResult<Vec<LatePreorder>>;

    async fn find_reservation(&self, id: i32) -> DomainResult<Option<Reservation>>;

    async fn find_spot(&self, id: i32) -> DomainResult<Option<Spot>>;

    /// Insert a reservation and occupy its spot atomically. Fails with
    /// `SpotOccupied` if the spot is already held.
    async fn open_reservation(&self, new: NewReservation) -> DomainResult<Reservation>;
}
