//! In-memory resource store
//!
//! Every unit of work holds the single state lock from `begin` until commit
//! or rollback, so units are fully serialized. Writes are recorded in an
//! undo log that rollback (or drop) replays in reverse.
//!
//! Faults can be injected to exercise rollback and retry paths.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::{
    DomainError, DomainResult, LatePreorder, LatenessWindow, NewReservation, Reservation,
    ReservationStatus, ResourceStore, Spot, StatusChange, SubscriberContact, UnitOfWork,
};

#[derive(Default)]
struct State {
    reservations: BTreeMap<i32, Reservation>,
    spots: BTreeMap<i32, Spot>,
    subscribers: BTreeMap<i32, SubscriberContact>,
}

/// Number of upcoming calls that should fail, per operation.
#[derive(Default)]
struct FaultPlan {
    begin: AtomicU32,
    release: AtomicU32,
    commit: AtomicU32,
    scan: AtomicU32,
}

fn take_fault(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// In-memory store for development and testing
#[derive(Clone, Default)]
pub struct InMemoryResourceStore {
    state: Arc<Mutex<State>>,
    faults: Arc<FaultPlan>,
}

impl InMemoryResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_spot(&self, id: i32) {
        self.state.lock().await.spots.insert(
            id,
            Spot {
                id,
                is_occupied: false,
            },
        );
    }

    pub async fn add_subscriber(&self, id: i32, contact: SubscriberContact) {
        self.state.lock().await.subscribers.insert(id, contact);
    }

    pub fn fail_next_begin(&self, times: u32) {
        self.faults.begin.store(times, Ordering::SeqCst);
    }

    pub fn fail_next_release(&self, times: u32) {
        self.faults.release.store(times, Ordering::SeqCst);
    }

    pub fn fail_next_commit(&self, times: u32) {
        self.faults.commit.store(times, Ordering::SeqCst);
    }

    pub fn fail_next_scan(&self, times: u32) {
        self.faults.scan.store(times, Ordering::SeqCst);
    }

    pub async fn reservations(&self) -> Vec<Reservation> {
        self.state.lock().await.reservations.values().cloned().collect()
    }

    pub async fn spots(&self) -> Vec<Spot> {
        self.state.lock().await.spots.values().cloned().collect()
    }
}

#[async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn begin(&self) -> DomainResult<Box<dyn UnitOfWork>> {
        if take_fault(&self.faults.begin) {
            return Err(DomainError::StoreUnavailable(
                "injected begin fault".to_string(),
            ));
        }
        let state = self.state.clone().lock_owned().await;
        Ok(Box::new(MemoryUnitOfWork {
            state,
            undo: Vec::new(),
            faults: self.faults.clone(),
            finished: false,
        }))
    }

    async fn find_late_preorders(&self, window: LatenessWindow) -> DomainResult<Vec<LatePreorder>> {
        if take_fault(&self.faults.scan) {
            return Err(DomainError::Storage("injected scan fault".to_string()));
        }
        let state = self.state.lock().await;

        let mut late: Vec<LatePreorder> = state
            .reservations
            .values()
            .filter(|r| r.status == ReservationStatus::Preorder)
            .filter_map(|r| {
                let spot_id = r.spot_id?;
                let estimated = r.estimated_arrival?;
                window.is_late(estimated).then(|| LatePreorder {
                    reservation_id: r.id,
                    subscriber_id: r.subscriber_id,
                    spot_id,
                    estimated_arrival: estimated,
                    minutes_late: window.minutes_late(estimated),
                    contact: state.subscribers.get(&r.subscriber_id).cloned(),
                })
            })
            .collect();

        late.sort_by_key(|l| (l.estimated_arrival, l.reservation_id));
        Ok(late)
    }

    async fn find_reservation(&self, id: i32) -> DomainResult<Option<Reservation>> {
        Ok(self.state.lock().await.reservations.get(&id).cloned())
    }

    async fn find_spot(&self, id: i32) -> DomainResult<Option<Spot>> {
        Ok(self.state.lock().await.spots.get(&id).cloned())
    }

    async fn open_reservation(&self, new: NewReservation) -> DomainResult<Reservation> {
        new.validate()?;
        let mut state = self.state.lock().await;

        let spot = state
            .spots
            .get_mut(&new.spot_id)
            .ok_or_else(|| DomainError::NotFound {
                entity: "Spot",
                field: "id",
                value: new.spot_id.to_string(),
            })?;
        if spot.is_occupied {
            return Err(DomainError::SpotOccupied(new.spot_id));
        }
        spot.is_occupied = true;

        let id = state.reservations.keys().next_back().copied().unwrap_or(0) + 1;
        let reservation = new.into_reservation(id);
        state.reservations.insert(id, reservation.clone());
        Ok(reservation)
    }
}

enum Undo {
    Reservation(Reservation),
    Spot(Spot),
}

struct MemoryUnitOfWork {
    state: OwnedMutexGuard<State>,
    undo: Vec<Undo>,
    faults: Arc<FaultPlan>,
    finished: bool,
}

impl MemoryUnitOfWork {
    fn undo_all(&mut self) {
        while let Some(entry) = self.undo.pop() {
            match entry {
                Undo::Reservation(r) => {
                    self.state.reservations.insert(r.id, r);
                }
                Undo::Spot(s) => {
                    self.state.spots.insert(s.id, s);
                }
            }
        }
        self.finished = true;
    }
}

impl Drop for MemoryUnitOfWork {
    fn drop(&mut self) {
        if !self.finished {
            self.undo_all();
        }
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn compare_and_set_status(
        &mut self,
        id: i32,
        expected: ReservationStatus,
        change: StatusChange,
    ) -> DomainResult<u64> {
        let Some(reservation) = self.state.reservations.get_mut(&id) else {
            return Ok(0);
        };
        if reservation.status != expected {
            return Ok(0);
        }
        let before = reservation.clone();
        change.apply(reservation);
        self.undo.push(Undo::Reservation(before));
        Ok(1)
    }

    async fn release_spot(&mut self, spot_id: i32) -> DomainResult<u64> {
        if take_fault(&self.faults.release) {
            return Err(DomainError::Storage("injected spot release fault".to_string()));
        }
        let Some(spot) = self.state.spots.get_mut(&spot_id) else {
            return Ok(0);
        };
        let before = spot.clone();
        spot.is_occupied = false;
        self.undo.push(Undo::Spot(before));
        Ok(1)
    }

    async fn commit(mut self: Box<Self>) -> DomainResult<()> {
        if take_fault(&self.faults.commit) {
            self.undo_all();
            return Err(DomainError::Storage("injected commit fault".to_string()));
        }
        self.undo.clear();
        self.finished = true;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> DomainResult<()> {
        self.undo_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, h, m, 0).unwrap()
    }

    async fn store_with_preorder() -> (InMemoryResourceStore, Reservation) {
        let store = InMemoryResourceStore::new();
        store.add_spot(7).await;
        let r = store
            .open_reservation(NewReservation::preorder(1, 7, at(10, 0), at(9, 0)))
            .await
            .unwrap();
        (store, r)
    }

    #[tokio::test]
    async fn open_reservation_occupies_spot() {
        let (store, r) = store_with_preorder().await;
        assert_eq!(r.id, 1);
        assert!(store.find_spot(7).await.unwrap().unwrap().is_occupied);

        let second = store
            .open_reservation(NewReservation::preorder(2, 7, at(11, 0), at(9, 0)))
            .await;
        assert_eq!(second, Err(DomainError::SpotOccupied(7)));
    }

    #[tokio::test]
    async fn open_reservation_unknown_spot() {
        let store = InMemoryResourceStore::new();
        let err = store
            .open_reservation(NewReservation::walk_in(1, 99, at(8, 0)))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound { entity: "Spot", .. }));
    }

    #[tokio::test]
    async fn dropped_unit_rolls_back() {
        let (store, r) = store_with_preorder().await;
        {
            let mut uow = store.begin().await.unwrap();
            let change = StatusChange::to(ReservationStatus::Cancelled, at(10, 16));
            assert_eq!(
                uow.compare_and_set_status(r.id, ReservationStatus::Preorder, change)
                    .await
                    .unwrap(),
                1
            );
            assert_eq!(uow.release_spot(7).await.unwrap(), 1);
        }

        let stored = store.find_reservation(r.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReservationStatus::Preorder);
        assert!(store.find_spot(7).await.unwrap().unwrap().is_occupied);
    }

    #[tokio::test]
    async fn commit_fault_undoes_writes() {
        let (store, r) = store_with_preorder().await;
        store.fail_next_commit(1);

        let mut uow = store.begin().await.unwrap();
        let change = StatusChange::to(ReservationStatus::Cancelled, at(10, 16));
        uow.compare_and_set_status(r.id, ReservationStatus::Preorder, change)
            .await
            .unwrap();
        uow.release_spot(7).await.unwrap();
        assert!(uow.commit().await.is_err());

        let stored = store.find_reservation(r.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReservationStatus::Preorder);
        assert!(store.find_spot(7).await.unwrap().unwrap().is_occupied);
    }

    #[tokio::test]
    async fn mismatched_status_matches_zero_rows() {
        let (store, r) = store_with_preorder().await;
        let mut uow = store.begin().await.unwrap();
        let change = StatusChange::to(ReservationStatus::Finished, at(12, 0));
        let rows = uow
            .compare_and_set_status(r.id, ReservationStatus::Active, change)
            .await
            .unwrap();
        assert_eq!(rows, 0);
        assert_eq!(uow.compare_and_set_status(999, ReservationStatus::Preorder, change).await.unwrap(), 0);
        uow.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn late_scan_filters_and_orders() {
        let store = InMemoryResourceStore::new();
        for spot in [1, 2, 3, 4] {
            store.add_spot(spot).await;
        }
        store
            .add_subscriber(
                10,
                SubscriberContact {
                    username: "dana".into(),
                    name: Some("Dana".into()),
                    email: Some("dana@example.com".into()),
                },
            )
            .await;
        let late_b = store
            .open_reservation(NewReservation::preorder(10, 1, at(9, 50), at(8, 0)))
            .await
            .unwrap();
        let late_a = store
            .open_reservation(NewReservation::preorder(10, 2, at(9, 30), at(8, 0)))
            .await
            .unwrap();
        // within grace period
        store
            .open_reservation(NewReservation::preorder(10, 3, at(10, 5), at(8, 0)))
            .await
            .unwrap();
        // walk-ins are never late
        store
            .open_reservation(NewReservation::walk_in(10, 4, at(9, 0)))
            .await
            .unwrap();

        let late = store
            .find_late_preorders(LatenessWindow::new(at(10, 16), 15))
            .await
            .unwrap();
        let ids: Vec<i32> = late.iter().map(|l| l.reservation_id).collect();
        assert_eq!(ids, vec![late_a.id, late_b.id]);
        assert_eq!(late[0].minutes_late, 46);
        assert_eq!(late[0].contact.as_ref().unwrap().username, "dana");
    }

    #[tokio::test]
    async fn begin_fault_is_unavailable() {
        let store = InMemoryResourceStore::new();
        store.fail_next_begin(1);
        assert!(matches!(
            store.begin().await.err(),
            Some(DomainError::StoreUnavailable(_))
        ));
        assert!(store.begin().await.is_ok());
    }
}
