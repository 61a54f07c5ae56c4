use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Per-day order-number counter. One row per calendar day (`YYYYMMDD`),
/// incremented atomically inside the order-creation transaction.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "order_sequences")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub day: String,
    pub counter: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
