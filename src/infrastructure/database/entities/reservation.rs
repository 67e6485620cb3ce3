//! Reservation entity for database

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Reservation model.
///
/// `status` holds the lowercase status name (`preorder`, `active`,
/// `finished`, `cancelled`); conditional updates filter on it directly.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "reservations")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub subscriber_id: i32,
    pub spot_id: Option<i32>,
    pub status: String,
    pub estimated_arrival: Option<DateTime<Utc>>,
    pub actual_arrival: Option<DateTime<Utc>>,
    pub actual_departure: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::subscriber::Entity",
        from = "Column::SubscriberId",
        to = "super::subscriber::Column::Id"
    )]
    Subscriber,
    #[sea_orm(
        belongs_to = "super::spot::Entity",
        from = "Column::SpotId",
        to = "super::spot::Column::Id"
    )]
    Spot,
}

impl Related<super::subscriber::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Subscriber.def()
    }
}

impl Related<super::spot::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Spot.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
