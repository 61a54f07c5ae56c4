use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Catalog product. `stock` is only meaningful for the `merch` category;
/// digital categories are always available.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, utoipa::ToSchema)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    #[sea_orm(unique)]
    pub slug: String,
    #[sea_orm(column_type = "Text")]
    pub description: String,
    pub category: ProductCategory,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub price: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))", nullable)]
    pub compare_price: Option<Decimal>,
    pub stock: i32,
    pub sold: i32,
    pub is_active: bool,
    pub is_featured: bool,
    pub thumbnail: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    strum::Display,
    strum::EnumString,
    utoipa::ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProductCategory {
    #[sea_orm(string_value = "course")]
    Course,
    #[sea_orm(string_value = "merch")]
    Merch,
    #[sea_orm(string_value = "ebook")]
    Ebook,
    #[sea_orm(string_value = "consultation")]
    Consultation,
}

impl ProductCategory {
    /// Physical goods are the only category whose stock figure gates purchases.
    pub fn is_physical(&self) -> bool {
        matches!(self, ProductCategory::Merch)
    }
}

impl Model {
    pub fn is_available(&self) -> bool {
        if !self.is_active {
            return false;
        }
        !self.category.is_physical() || self.stock > 0
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::product_variant::Entity")]
    Variants,
}

impl Related<super::product_variant::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Variants.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
