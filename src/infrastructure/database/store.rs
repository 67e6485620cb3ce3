//! SeaORM implementation of ResourceStore
//!
//! A unit of work wraps one `DatabaseTransaction`. Status changes are
//! conditional `UPDATE ... WHERE id = ? AND status = ?` statements, so the
//! rows-affected count tells the executor whether it won the race.

use async_trait::async_trait;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, DatabaseConnection,
    DatabaseTransaction, DbErr, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
    UpdateResult,
};
use tracing::debug;

use crate::domain::{
    DomainError, DomainResult, LatePreorder, LatenessWindow, NewReservation, Reservation,
    ReservationStatus, ResourceStore, Spot, StatusChange, SubscriberContact, UnitOfWork,
};
use crate::infrastructure::database::entities::{reservation, spot, subscriber};

pub struct SeaOrmResourceStore {
    db: DatabaseConnection,
}

impl SeaOrmResourceStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }
}

// ── Conversion helpers ──────────────────────────────────────────

fn db_err(e: DbErr) -> DomainError {
    DomainError::Storage(e.to_string())
}

fn unavailable(e: DbErr) -> DomainError {
    DomainError::StoreUnavailable(e.to_string())
}

fn model_to_domain(m: reservation::Model) -> DomainResult<Reservation> {
    let status = m.status.parse::<ReservationStatus>().map_err(|_| {
        DomainError::Storage(format!(
            "reservation {} has unknown status '{}'",
            m.id, m.status
        ))
    })?;

    Ok(Reservation {
        id: m.id,
        subscriber_id: m.subscriber_id,
        spot_id: m.spot_id,
        status,
        estimated_arrival: m.estimated_arrival,
        actual_arrival: m.actual_arrival,
        actual_departure: m.actual_departure,
        created_at: m.created_at,
    })
}

fn subscriber_to_contact(m: subscriber::Model) -> SubscriberContact {
    SubscriberContact {
        username: m.username,
        name: m.name,
        email: m.email,
    }
}

// ── Unit of work ────────────────────────────────────────────────

/// Dropping the inner transaction without commit rolls it back.
pub struct SeaOrmUnitOfWork {
    txn: DatabaseTransaction,
}

#[async_trait]
impl UnitOfWork for SeaOrmUnitOfWork {
    async fn compare_and_set_status(
        &mut self,
        id: i32,
        expected: ReservationStatus,
        change: StatusChange,
    ) -> DomainResult<u64> {
        let mut update = reservation::Entity::update_many().col_expr(
            reservation::Column::Status,
            Expr::value(change.target.as_str()),
        );
        if let Some(at) = change.actual_arrival {
            update = update.col_expr(reservation::Column::ActualArrival, Expr::value(at));
        }
        if let Some(at) = change.actual_departure {
            update = update.col_expr(reservation::Column::ActualDeparture, Expr::value(at));
        }

        let result: UpdateResult = update
            .filter(reservation::Column::Id.eq(id))
            .filter(reservation::Column::Status.eq(expected.as_str()))
            .exec(&self.txn)
            .await
            .map_err(db_err)?;

        debug!(
            reservation_id = id,
            %expected,
            target = %change.target,
            rows = result.rows_affected,
            "Conditional status update"
        );
        Ok(result.rows_affected)
    }

    async fn release_spot(&mut self, spot_id: i32) -> DomainResult<u64> {
        let result: UpdateResult = spot::Entity::update_many()
            .col_expr(spot::Column::IsOccupied, Expr::value(false))
            .filter(spot::Column::Id.eq(spot_id))
            .exec(&self.txn)
            .await
            .map_err(db_err)?;

        Ok(result.rows_affected)
    }

    async fn commit(self: Box<Self>) -> DomainResult<()> {
        self.txn.commit().await.map_err(db_err)
    }

    async fn rollback(self: Box<Self>) -> DomainResult<()> {
        self.txn.rollback().await.map_err(db_err)
    }
}

// ── Store ───────────────────────────────────────────────────────

#[async_trait]
impl ResourceStore for SeaOrmResourceStore {
    async fn begin(&self) -> DomainResult<Box<dyn UnitOfWork>> {
        let txn = self.db.begin().await.map_err(unavailable)?;
        Ok(Box::new(SeaOrmUnitOfWork { txn }))
    }

    async fn find_late_preorders(&self, window: LatenessWindow) -> DomainResult<Vec<LatePreorder>> {
        let rows = reservation::Entity::find()
            .filter(reservation::Column::Status.eq(ReservationStatus::Preorder.as_str()))
            .filter(reservation::Column::SpotId.is_not_null())
            .filter(reservation::Column::EstimatedArrival.gte(window.day_start()))
            .filter(reservation::Column::EstimatedArrival.lte(window.cutoff()))
            .order_by_asc(reservation::Column::EstimatedArrival)
            .order_by_asc(reservation::Column::Id)
            .find_also_related(subscriber::Entity)
            .all(&self.db)
            .await
            .map_err(db_err)?;

        Ok(rows
            .into_iter()
            .filter_map(|(r, sub)| {
                let spot_id = r.spot_id?;
                let estimated = r.estimated_arrival?;
                Some(LatePreorder {
                    reservation_id: r.id,
                    subscriber_id: r.subscriber_id,
                    spot_id,
                    estimated_arrival: estimated,
                    minutes_late: window.minutes_late(estimated),
                    contact: sub.map(subscriber_to_contact),
                })
            })
            .collect())
    }

    async fn find_reservation(&self, id: i32) -> DomainResult<Option<Reservation>> {
        reservation::Entity::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(db_err)?
            .map(model_to_domain)
            .transpose()
    }

    async fn find_spot(&self, id: i32) -> DomainResult<Option<Spot>> {
        let model = spot::Entity::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(db_err)?;

        Ok(model.map(|m| Spot {
            id: m.id,
            is_occupied: m.is_occupied,
        }))
    }

    async fn open_reservation(&self, new: NewReservation) -> DomainResult<Reservation> {
        new.validate()?;
        let txn = self.db.begin().await.map_err(unavailable)?;

        let claimed: UpdateResult = spot::Entity::update_many()
            .col_expr(spot::Column::IsOccupied, Expr::value(true))
            .filter(spot::Column::Id.eq(new.spot_id))
            .filter(spot::Column::IsOccupied.eq(false))
            .exec(&txn)
            .await
            .map_err(db_err)?;

        if claimed.rows_affected == 0 {
            let exists = spot::Entity::find_by_id(new.spot_id)
                .one(&txn)
                .await
                .map_err(db_err)?
                .is_some();
            txn.rollback().await.map_err(db_err)?;

            return Err(if exists {
                DomainError::SpotOccupied(new.spot_id)
            } else {
                DomainError::NotFound {
                    entity: "Spot",
                    field: "id",
                    value: new.spot_id.to_string(),
                }
            });
        }

        let draft = new.into_reservation(0);
        let model = reservation::ActiveModel {
            id: NotSet,
            subscriber_id: Set(draft.subscriber_id),
            spot_id: Set(draft.spot_id),
            status: Set(draft.status.as_str().to_string()),
            estimated_arrival: Set(draft.estimated_arrival),
            actual_arrival: Set(draft.actual_arrival),
            actual_departure: Set(None),
            created_at: Set(draft.created_at),
        }
        .insert(&txn)
        .await
        .map_err(db_err)?;

        txn.commit().await.map_err(db_err)?;
        model_to_domain(model)
    }
}

// ── Tests ──────────────────────────────────────────────────────
