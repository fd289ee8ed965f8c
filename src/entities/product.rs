use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// The `products` table.
///
/// `global_stock` is the denormalized total across all branches, kept in
/// base units, and is only ever written inside a movement transaction.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub name: String,
    pub category: Option<String>,
    /// Low-stock threshold in base units; branch rows may override it.
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub minimum_stock: rust_decimal::Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub global_stock: rust_decimal::Decimal,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::product_unit::Entity")]
    ProductUnits,
    #[sea_orm(has_many = "super::branch_stock::Entity")]
    BranchStocks,
    #[sea_orm(has_many = "super::stock_batch::Entity")]
    StockBatches,
}

impl Related<super::product_unit::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ProductUnits.def()
    }
}

impl Related<super::branch_stock::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::BranchStocks.def()
    }
}

impl Related<super::stock_batch::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StockBatches.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
