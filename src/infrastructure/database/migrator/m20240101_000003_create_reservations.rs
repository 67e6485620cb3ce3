//! Create reservations table

use sea_orm_migration::prelude::*;

use super::m20240101_000001_create_subscribers::Subscribers;
use super::m20240101_000002_create_spots::Spots;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Reservations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Reservations::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Reservations::SubscriberId)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Reservations::SpotId).integer())
                    .col(
                        ColumnDef::new(Reservations::Status)
                            .string_len(16)
                            .not_null()
                            .default("preorder"),
                    )
                    .col(ColumnDef::new(Reservations::EstimatedArrival).timestamp_with_time_zone())
                    .col(ColumnDef::new(Reservations::ActualArrival).timestamp_with_time_zone())
                    .col(ColumnDef::new(Reservations::ActualDeparture).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Reservations::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    // Reservations are never deleted, so neither are the rows they point at
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_reservations_subscriber")
                            .from(Reservations::Table, Reservations::SubscriberId)
                            .to(Subscribers::Table, Subscribers::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_reservations_spot")
                            .from(Reservations::Table, Reservations::SpotId)
                            .to(Spots::Table, Spots::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        // The late-arrival scan filters on status and estimated arrival
        manager
            .create_index(
                Index::create()
                    .name("idx_reservations_status")
                    .table(Reservations::Table)
                    .col(Reservations::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_reservations_estimated_arrival")
                    .table(Reservations::Table)
                    .col(Reservations::EstimatedArrival)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Reservations::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
pub enum Reservations {
    Table,
    Id,
    SubscriberId,
    SpotId,
    Status,
    EstimatedArrival,
    ActualArrival,
    ActualDeparture,
    CreatedAt,
}
